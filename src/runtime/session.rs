// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Client sessions and the registry that owns them.
//!
//! A session may be checked out by any number of in-flight operations
//! (`ref_count`); while checked out it cannot be expired. `closed` and
//! `expired` are monotonic once set and both refuse new query registrations.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::query_options::QueryOptions;
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::{ms_since_epoch, NetworkAddress, UniqueId};
use crate::util::pretty::format_timestamp_ms;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionKind {
    Beeswax,
    HiveServer2,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Beeswax => f.write_str("BEESWAX"),
            SessionKind::HiveServer2 => f.write_str("HIVESERVER2"),
        }
    }
}

/// Mutable session state, guarded by the session's own lock. The session
/// lock is always acquired after the registry lock.
#[derive(Debug)]
pub struct SessionInner {
    pub connected_user: String,
    /// Set only when delegation is enabled and the proxy user is authorized
    /// to act as this user.
    pub do_as_user: String,
    pub database: String,
    pub closed: bool,
    pub expired: bool,
    pub ref_count: i64,
    pub last_accessed_ms: i64,
    /// Ids only; the strong reference lives in the query registry, which
    /// keeps session and query from owning each other.
    pub inflight_queries: HashSet<UniqueId>,
    pub default_query_options: QueryOptions,
}

#[derive(Debug)]
pub struct SessionState {
    pub session_id: UniqueId,
    pub kind: SessionKind,
    pub network_address: NetworkAddress,
    pub start_time_ms: i64,
    inner: Mutex<SessionInner>,
}

impl SessionState {
    pub fn new(
        session_id: UniqueId,
        kind: SessionKind,
        network_address: NetworkAddress,
        connected_user: impl Into<String>,
        default_query_options: QueryOptions,
    ) -> Self {
        Self {
            session_id,
            kind,
            network_address,
            start_time_ms: ms_since_epoch(),
            inner: Mutex::new(SessionInner {
                connected_user: connected_user.into(),
                do_as_user: String::new(),
                database: "default".to_string(),
                closed: false,
                expired: false,
                ref_count: 0,
                last_accessed_ms: ms_since_epoch(),
                inflight_queries: HashSet::new(),
                default_query_options,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session lock")
    }

    pub fn effective_user(&self) -> String {
        let inner = self.lock();
        if inner.do_as_user.is_empty() {
            inner.connected_user.clone()
        } else {
            inner.do_as_user.clone()
        }
    }
}

/// A session picked up by an expiration sweep, with the queries that must be
/// torn down as a consequence.
pub struct ExpiredSession {
    pub session_id: UniqueId,
    pub connected_user: String,
    pub last_accessed_ms: i64,
    pub inflight_queries: Vec<UniqueId>,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<UniqueId, Arc<SessionState>>>,
    idle_session_timeout_s: i64,
}

impl SessionRegistry {
    pub fn new(idle_session_timeout_s: i64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_session_timeout_s,
        }
    }

    pub fn idle_session_timeout_s(&self) -> i64 {
        self.idle_session_timeout_s
    }

    pub fn create(&self, session: Arc<SessionState>) -> Result<()> {
        let mut sessions = self.sessions.lock().expect("session registry lock");
        if sessions.contains_key(&session.session_id) {
            return Err(Status::internal(format!(
                "session id {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id, session);
        Ok(())
    }

    /// Looks a session up. With `mark_active` the session is atomically
    /// verified live, checked out (`ref_count` bumped) and its activity
    /// timestamp refreshed; a checked-out session must be released with
    /// `mark_inactive`.
    pub fn get(&self, session_id: &UniqueId, mark_active: bool) -> Result<Arc<SessionState>> {
        let sessions = self.sessions.lock().expect("session registry lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| Status::new(StatusCode::SessionClosed, "Invalid session id"))?;
        if mark_active {
            let mut inner = session.lock();
            if inner.expired {
                return Err(Status::new(
                    StatusCode::SessionExpired,
                    format!(
                        "Client session expired due to more than {}s of inactivity \
                         (last activity was at: {}).",
                        self.idle_session_timeout_s,
                        format_timestamp_ms(inner.last_accessed_ms)
                    ),
                ));
            }
            if inner.closed {
                return Err(Status::new(StatusCode::SessionClosed, "Session is closed"));
            }
            inner.ref_count += 1;
            inner.last_accessed_ms = ms_since_epoch();
        }
        Ok(Arc::clone(session))
    }

    /// Releases a checkout made with `get(.., mark_active = true)`.
    pub fn mark_inactive(&self, session: &Arc<SessionState>) {
        let mut inner = session.lock();
        if inner.ref_count > 0 {
            inner.ref_count -= 1;
        }
        inner.last_accessed_ms = ms_since_epoch();
    }

    /// Removes a session, marks it closed and snapshots its in-flight
    /// queries. The caller unregisters the queries outside the locks.
    pub fn close(
        &self,
        session_id: &UniqueId,
        ignore_if_absent: bool,
    ) -> Result<Option<(Arc<SessionState>, Vec<UniqueId>)>> {
        let session = {
            let mut sessions = self.sessions.lock().expect("session registry lock");
            match sessions.remove(session_id) {
                Some(session) => session,
                None if ignore_if_absent => return Ok(None),
                None => {
                    return Err(Status::new(StatusCode::SessionClosed, "Invalid session ID"))
                }
            }
        };
        let inflight = {
            let mut inner = session.lock();
            inner.closed = true;
            // closed is now set, so no new queries can join the inflight set.
            inner.inflight_queries.iter().copied().collect()
        };
        Ok(Some((session, inflight)))
    }

    /// One expiration pass: marks idle sessions expired and returns them with
    /// their in-flight query snapshots. Sessions that are checked out, closed
    /// or already expired are skipped. No cancellation happens here.
    pub fn sweep_expired(&self, now_ms: i64) -> Vec<ExpiredSession> {
        let mut expired = Vec::new();
        if self.idle_session_timeout_s <= 0 {
            return expired;
        }
        let sessions = self.sessions.lock().expect("session registry lock");
        for session in sessions.values() {
            let mut inner = session.lock();
            if inner.ref_count > 0 {
                continue;
            }
            // A session closed by other means is in the process of being
            // removed; leave it alone.
            if inner.closed || inner.expired {
                continue;
            }
            if now_ms - inner.last_accessed_ms <= self.idle_session_timeout_s * 1000 {
                continue;
            }
            inner.expired = true;
            expired.push(ExpiredSession {
                session_id: session.session_id,
                connected_user: inner.connected_user.clone(),
                last_accessed_ms: inner.last_accessed_ms,
                inflight_queries: inner.inflight_queries.iter().copied().collect(),
            });
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
