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
//! One accepted query, from registration to archival.
//!
//! Phase transitions are monotonic toward a terminal state. The first
//! non-OK status is latched as the terminal cause; later errors only append
//! detail. Teardown (`done`) runs exactly once no matter how many paths race
//! to finish the query.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::common::query_options::QueryOptions;
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::{ms_since_epoch, UniqueId};
use crate::runtime::coordinator::{QueryCoordinator, QueryResultSet};
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::frontend::{ExecRequest, QueryContext, ResultSetMetadata, StmtType};
use crate::runtime::profile::RuntimeProfile;
use crate::runtime::session::SessionState;
use crate::service::catalog::CatalogUpdateResult;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryPhase {
    Registered,
    Planned,
    Running,
    Cancelled,
    Finished,
    Error,
}

impl QueryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryPhase::Cancelled | QueryPhase::Finished | QueryPhase::Error
        )
    }
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPhase::Registered => "REGISTERED",
            QueryPhase::Planned => "PLANNED",
            QueryPhase::Running => "RUNNING",
            QueryPhase::Cancelled => "CANCELLED",
            QueryPhase::Finished => "FINISHED",
            QueryPhase::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ResultCache {
    rows: Vec<Vec<String>>,
    max_size: i64,
    overflowed: bool,
}

/// State guarded by the exec-state lock. During `Execute` this lock is held
/// across query registration; everywhere else it is taken after the registry
/// lock has been released.
pub struct QueryInner {
    pub phase: QueryPhase,
    pub query_status: Status,
    pub end_time_ms: i64,
    pub coord: Option<Arc<dyn QueryCoordinator>>,
    pub exec_request: Option<ExecRequest>,
    pub result_metadata: Option<ResultSetMetadata>,
    pub num_rows_fetched: i64,
    /// Rows produced without a coordinator (EXPLAIN output).
    local_results: Option<Vec<Vec<String>>>,
    result_cache: Option<ResultCache>,
    coord_eos: bool,
}

impl fmt::Debug for QueryInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInner")
            .field("phase", &self.phase)
            .field("query_status", &self.query_status)
            .field("end_time_ms", &self.end_time_ms)
            .field("coord", &self.coord.as_ref().map(|_| "<coordinator>"))
            .field("exec_request", &self.exec_request)
            .field("result_metadata", &self.result_metadata)
            .field("num_rows_fetched", &self.num_rows_fetched)
            .field("local_results", &self.local_results)
            .field("result_cache", &self.result_cache)
            .field("coord_eos", &self.coord_eos)
            .finish()
    }
}

impl QueryInner {
    /// Latches `status` as the query's terminal cause if it is the first
    /// error; later errors only add detail.
    pub fn update_status(&mut self, status: &Status) {
        if status.is_ok() {
            return;
        }
        if self.query_status.is_ok() {
            self.query_status = status.clone();
        } else {
            self.query_status.add_error_msg(status.error_msg());
        }
        if !self.phase.is_terminal() {
            self.phase = QueryPhase::Error;
        }
    }
}

#[derive(Debug)]
pub struct QueryExecState {
    ctx: QueryContext,
    session: Arc<SessionState>,
    start_time_ms: i64,
    profile: RuntimeProfile,
    summary_profile: RuntimeProfile,
    last_active_ms: AtomicI64,
    client_refs: AtomicI64,
    done_called: AtomicBool,
    inner: Mutex<QueryInner>,
}

impl QueryExecState {
    pub fn new(ctx: QueryContext, session: Arc<SessionState>) -> Arc<Self> {
        let profile = RuntimeProfile::new(format!("Query (id={})", ctx.query_id));
        let summary_profile = profile.create_child("Summary");
        summary_profile.add_info_string("Session ID", ctx.session_id.to_string());
        summary_profile.add_info_string("Session Type", session.kind.to_string());
        summary_profile.add_info_string("Start Time", ctx.now_string.clone());
        summary_profile.add_info_string("User", ctx.effective_user());
        summary_profile.add_info_string("Connected User", ctx.connected_user.clone());
        summary_profile.add_info_string("Delegated User", ctx.do_as_user.clone());
        summary_profile
            .add_info_string("Network Address", session.network_address.to_string());
        summary_profile.add_info_string("Default Db", ctx.default_db.clone());
        summary_profile.add_info_string("Sql Statement", ctx.sql_stmt.clone());
        summary_profile.add_info_string("Coordinator", ctx.coord_address.to_string());
        let now = ms_since_epoch();
        Arc::new(Self {
            ctx,
            session,
            start_time_ms: now,
            profile,
            summary_profile,
            last_active_ms: AtomicI64::new(now),
            client_refs: AtomicI64::new(0),
            done_called: AtomicBool::new(false),
            inner: Mutex::new(QueryInner {
                phase: QueryPhase::Registered,
                query_status: Status::ok(),
                end_time_ms: 0,
                coord: None,
                exec_request: None,
                result_metadata: None,
                num_rows_fetched: 0,
                local_results: None,
                result_cache: None,
                coord_eos: false,
            }),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, QueryInner> {
        self.inner.lock().expect("query exec state lock")
    }

    pub fn query_id(&self) -> UniqueId {
        self.ctx.query_id
    }

    pub fn session_id(&self) -> UniqueId {
        self.ctx.session_id
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn sql_stmt(&self) -> &str {
        &self.ctx.sql_stmt
    }

    pub fn connected_user(&self) -> &str {
        &self.ctx.connected_user
    }

    pub fn do_as_user(&self) -> &str {
        &self.ctx.do_as_user
    }

    pub fn effective_user(&self) -> &str {
        self.ctx.effective_user()
    }

    pub fn default_db(&self) -> &str {
        &self.ctx.default_db
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.ctx.query_options
    }

    pub fn query_ctx(&self) -> &QueryContext {
        &self.ctx
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn summary_profile(&self) -> &RuntimeProfile {
        &self.summary_profile
    }

    pub fn phase(&self) -> QueryPhase {
        self.lock().phase
    }

    pub fn query_status(&self) -> Status {
        self.lock().query_status.clone()
    }

    pub fn coord(&self) -> Option<Arc<dyn QueryCoordinator>> {
        self.lock().coord.clone()
    }

    pub fn last_active_ms(&self) -> i64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }

    /// True while a client request currently holds this query; an active
    /// query is never expired by the idle-query sweep.
    pub fn is_active(&self) -> bool {
        self.client_refs.load(Ordering::Relaxed) > 0
    }

    pub fn mark_client_active(&self) {
        self.client_refs.fetch_add(1, Ordering::Relaxed);
        self.last_active_ms.store(ms_since_epoch(), Ordering::Relaxed);
    }

    pub fn mark_client_inactive(&self) {
        self.client_refs.fetch_sub(1, Ordering::Relaxed);
        self.last_active_ms.store(ms_since_epoch(), Ordering::Relaxed);
    }

    pub fn mark_event(&self, label: &str) {
        self.profile.mark_event(label);
    }

    /// Opts this query into result caching so fetches can be restarted.
    /// Guards against unreasonably large caches requested by clients.
    pub fn enable_result_caching(&self, requested_size: i64, max_size: i64) -> Result<()> {
        if requested_size > max_size {
            return Err(Status::internal(format!(
                "Requested result-cache size of {requested_size} exceeds the maximum of \
                 {max_size}"
            )));
        }
        let mut inner = self.lock();
        inner.result_cache = Some(ResultCache {
            rows: Vec::new(),
            max_size: requested_size,
            overflowed: false,
        });
        Ok(())
    }

    /// Starts execution of a planned statement. Distributed statements get a
    /// coordinator; EXPLAIN answers locally; DDL returns the catalog update
    /// for the caller to drive through the catalog barrier.
    pub fn exec(
        &self,
        exec_env: &ExecEnv,
        request: &ExecRequest,
    ) -> Result<Option<CatalogUpdateResult>> {
        match request.stmt_type {
            StmtType::Query | StmtType::Dml => {
                let coord = exec_env
                    .coordinator_factory()
                    .create(&self.ctx, request)?;
                coord.exec()?;
                let mut inner = self.lock();
                inner.coord = Some(coord);
                if !inner.phase.is_terminal() {
                    inner.phase = QueryPhase::Running;
                }
                Ok(None)
            }
            StmtType::Explain => {
                let rows = request
                    .plan
                    .lines()
                    .map(|line| vec![line.to_string()])
                    .collect();
                let mut inner = self.lock();
                inner.local_results = Some(rows);
                if !inner.phase.is_terminal() {
                    inner.phase = QueryPhase::Running;
                }
                Ok(None)
            }
            StmtType::Ddl => {
                let op = request
                    .catalog_op
                    .as_ref()
                    .ok_or_else(|| Status::internal("DDL request is missing its catalog op"))?;
                let result = exec_env.catalog_op_executor().exec(op)?;
                let mut inner = self.lock();
                if !inner.phase.is_terminal() {
                    inner.phase = QueryPhase::Finished;
                }
                Ok(Some(result))
            }
        }
    }

    /// Fetches up to `max_rows` result rows, replaying from the result cache
    /// when `start_over` asks for a restarted fetch.
    pub fn fetch_results(&self, max_rows: usize, start_over: bool) -> Result<QueryResultSet> {
        self.mark_client_active();
        let result = self.fetch_results_internal(max_rows, start_over);
        self.mark_client_inactive();
        result
    }

    fn fetch_results_internal(&self, max_rows: usize, start_over: bool) -> Result<QueryResultSet> {
        let coord = {
            let mut inner = self.lock();
            if !inner.query_status.is_ok() {
                return Err(inner.query_status.clone());
            }
            if inner.phase == QueryPhase::Cancelled {
                return Err(Status::cancelled("Cancelled"));
            }
            if start_over {
                match inner.result_cache.as_ref() {
                    Some(cache) if !cache.overflowed => inner.num_rows_fetched = 0,
                    Some(_) => {
                        return Err(Status::internal(
                            "The query result cache exceeded its limit; fetch cannot be \
                             restarted",
                        ))
                    }
                    None => {
                        return Err(Status::internal(
                            "Restarting of fetch requires result caching to be enabled",
                        ))
                    }
                }
            }

            // Serve cached or locally produced rows first.
            let cursor = inner.num_rows_fetched as usize;
            if let Some(cache) = inner.result_cache.as_ref() {
                if cursor < cache.rows.len() {
                    let end = cache.rows.len().min(cursor + max_rows);
                    let rows = cache.rows[cursor..end].to_vec();
                    inner.num_rows_fetched += rows.len() as i64;
                    return Ok(QueryResultSet { rows, eos: false });
                }
            }
            if let Some(local_len) = inner.local_results.as_ref().map(|rows| rows.len()) {
                let served = inner.num_rows_fetched as usize;
                if served < local_len {
                    let end = local_len.min(served + max_rows);
                    let rows = inner.local_results.as_ref().expect("local results")
                        [served..end]
                        .to_vec();
                    inner.num_rows_fetched += rows.len() as i64;
                    let eos = inner.num_rows_fetched as usize >= local_len;
                    if eos {
                        inner.phase = QueryPhase::Finished;
                    }
                    return Ok(QueryResultSet { rows, eos });
                }
                inner.phase = QueryPhase::Finished;
                return Ok(QueryResultSet {
                    rows: Vec::new(),
                    eos: true,
                });
            }
            if inner.coord_eos {
                return Ok(QueryResultSet {
                    rows: Vec::new(),
                    eos: true,
                });
            }
            match inner.coord.clone() {
                Some(coord) => coord,
                // A statement with no rows to return (DDL) is done as soon
                // as it is fetched from.
                None => {
                    inner.phase = QueryPhase::Finished;
                    return Ok(QueryResultSet {
                        rows: Vec::new(),
                        eos: true,
                    });
                }
            }
        };

        // The coordinator produces rows outside the exec-state lock so a
        // concurrent cancel can always get through.
        let batch = match coord.get_next(max_rows) {
            Ok(batch) => batch,
            Err(status) => {
                self.lock().update_status(&status);
                return Err(status);
            }
        };

        let mut inner = self.lock();
        inner.num_rows_fetched += batch.rows.len() as i64;
        if let Some(cache) = inner.result_cache.as_mut() {
            if !cache.overflowed {
                if cache.rows.len() + batch.rows.len() > cache.max_size as usize {
                    cache.overflowed = true;
                } else {
                    cache.rows.extend(batch.rows.iter().cloned());
                }
            }
        }
        if batch.eos {
            inner.coord_eos = true;
            if !inner.phase.is_terminal() {
                inner.phase = QueryPhase::Finished;
            }
        }
        Ok(batch)
    }

    /// Asynchronous, idempotent cancellation. The first cause is recorded;
    /// later causes only append detail.
    pub fn cancel(&self, cause: Option<&Status>) {
        let coord = {
            let mut inner = self.lock();
            if let Some(cause) = cause {
                if inner.query_status.is_ok() {
                    inner.query_status = cause.clone();
                } else {
                    inner.query_status.add_error_msg(cause.error_msg());
                }
            }
            if !inner.phase.is_terminal() {
                inner.phase = QueryPhase::Cancelled;
            }
            inner.coord.clone()
        };
        if let Some(coord) = coord {
            let default_cause = Status::new(StatusCode::Cancelled, "Cancelled");
            coord.cancel(cause.unwrap_or(&default_cause));
        }
    }

    /// Terminal teardown; runs exactly once. Returns false on repeat calls.
    pub fn done(&self) -> bool {
        if self.done_called.swap(true, Ordering::SeqCst) {
            return false;
        }
        let (phase, status) = {
            let mut inner = self.lock();
            inner.end_time_ms = ms_since_epoch();
            (inner.phase, inner.query_status.clone())
        };
        self.summary_profile.add_info_string(
            "End Time",
            crate::util::pretty::format_timestamp_ms(ms_since_epoch()),
        );
        self.summary_profile
            .add_info_string("Query State", phase.to_string());
        self.summary_profile
            .add_info_string("Query Status", if status.is_ok() {
                "OK".to_string()
            } else {
                status.error_msg()
            });
        true
    }
}
