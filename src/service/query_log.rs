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
//! Bounded most-recent-first archive of completed queries, plus retrieval of
//! live or archived runtime profiles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::logging::warn;
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::{ms_since_epoch, UniqueId};
use crate::runtime::frontend::StmtType;
use crate::runtime::query_exec_state::{QueryExecState, QueryPhase};
use crate::service::server::CoordinatorServer;

/// Everything worth keeping about a completed query.
#[derive(Clone, Debug)]
pub struct QueryStateRecord {
    pub id: UniqueId,
    pub stmt: String,
    pub plan: String,
    pub stmt_type: StmtType,
    pub effective_user: String,
    pub default_db: String,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub has_coord: bool,
    pub num_complete_fragments: i64,
    pub total_fragments: i64,
    pub phase: QueryPhase,
    pub num_rows_fetched: i64,
    pub query_status: Status,
    pub profile_str: String,
    pub encoded_profile_str: String,
    pub exec_summary: String,
}

impl QueryStateRecord {
    pub fn new(exec_state: &QueryExecState, encoded_profile: String) -> Self {
        let plan = exec_state
            .summary_profile()
            .info_string("Plan")
            .unwrap_or_default();
        let coord = exec_state.coord();
        let (has_coord, progress, exec_summary) = match coord {
            Some(coord) => (true, coord.progress(), coord.exec_summary()),
            None => (false, Default::default(), String::new()),
        };
        let inner = exec_state.lock();
        Self {
            id: exec_state.query_id(),
            stmt: exec_state.sql_stmt().to_string(),
            plan,
            stmt_type: inner
                .exec_request
                .as_ref()
                .map(|r| r.stmt_type)
                .unwrap_or(StmtType::Query),
            effective_user: exec_state.effective_user().to_string(),
            default_db: exec_state.default_db().to_string(),
            start_time_ms: exec_state.start_time_ms(),
            end_time_ms: inner.end_time_ms,
            has_coord,
            num_complete_fragments: progress.num_complete,
            total_fragments: progress.total,
            phase: inner.phase,
            num_rows_fetched: inner.num_rows_fetched,
            query_status: inner.query_status.clone(),
            profile_str: exec_state.profile().pretty_print(),
            encoded_profile_str: encoded_profile,
            exec_summary,
        }
    }
}

/// The in-memory archive: ids in completion order (most recent first) and an
/// id index. Guarded by the server's archive lock.
pub struct QueryLog {
    capacity: i64,
    order: VecDeque<UniqueId>,
    index: HashMap<UniqueId, Arc<QueryStateRecord>>,
}

impl QueryLog {
    /// `capacity` of -1 keeps every record; 0 disables archival.
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, record: QueryStateRecord) {
        if self.capacity == 0 {
            return;
        }
        let id = record.id;
        self.order.push_front(id);
        self.index.insert(id, Arc::new(record));
        if self.capacity > 0 {
            while self.order.len() as i64 > self.capacity {
                if let Some(evicted) = self.order.pop_back() {
                    self.index.remove(&evicted);
                }
            }
        }
    }

    pub fn get(&self, id: &UniqueId) -> Option<Arc<QueryStateRecord>> {
        self.index.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Record ids, most recently completed first.
    pub fn ids(&self) -> impl Iterator<Item = &UniqueId> {
        self.order.iter()
    }
}

fn should_log_profile_write_failure() -> bool {
    static FAILURES: AtomicU64 = AtomicU64::new(0);
    FAILURES.fetch_add(1, Ordering::Relaxed) % 1000 == 0
}

impl CoordinatorServer {
    /// Snapshots a terminally transitioned query into the archive and
    /// appends its encoded profile to the on-disk profile log.
    pub(crate) fn archive_query(&self, query: &QueryExecState) {
        let encoded_profile = query.profile().to_archive_string();

        // If archival setup failed at startup, file logging was disabled.
        if self.log_query_to_file.load(Ordering::Relaxed) {
            if let Some(logger) = self.profile_logger.as_ref() {
                let entry = format!(
                    "{} {} {}",
                    ms_since_epoch(),
                    query.query_id(),
                    encoded_profile
                );
                if let Err(e) = logger.append_entry(&entry) {
                    if should_log_profile_write_failure() {
                        warn!("Could not write to profile log file: {e}");
                        warn!("Disable query logging with log_query_to_file=false");
                    }
                }
            }
        }

        if self.config.archive.query_log_size == 0 {
            return;
        }
        let record = QueryStateRecord::new(query, encoded_profile);
        let mut log = self.query_log.lock().expect("query log lock");
        log.insert(record);
    }

    /// The runtime profile of a live or archived query, pretty printed or in
    /// its base64 archive form.
    pub fn get_runtime_profile_str(
        &self,
        query_id: &UniqueId,
        base64_encoded: bool,
    ) -> Result<String> {
        if let Some(exec_state) = self.get_query_exec_state(query_id) {
            return Ok(if base64_encoded {
                exec_state.profile().to_archive_string()
            } else {
                exec_state.profile().pretty_print()
            });
        }

        let log = self.query_log.lock().expect("query log lock");
        match log.get(query_id) {
            Some(record) => Ok(if base64_encoded {
                record.encoded_profile_str.clone()
            } else {
                record.profile_str.clone()
            }),
            None => Err(Status::new(
                StatusCode::UnknownQuery,
                format!("Query id {query_id} not found."),
            )),
        }
    }

    pub fn archived_query(&self, query_id: &UniqueId) -> Option<Arc<QueryStateRecord>> {
        self.query_log.lock().expect("query log lock").get(query_id)
    }

    pub fn num_archived_queries(&self) -> usize {
        self.query_log.lock().expect("query log lock").len()
    }

    /// The exec summary is snapshotted on completion, so only the archive is
    /// consulted.
    pub fn get_exec_summary(&self, query_id: &UniqueId) -> Result<String> {
        let log = self.query_log.lock().expect("query log lock");
        match log.get(query_id) {
            Some(record) => Ok(record.exec_summary.clone()),
            None => Err(Status::new(
                StatusCode::UnknownQuery,
                format!("Query id {query_id} not found."),
            )),
        }
    }
}
