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
//! The coordinator: accepts planned statements from the client protocol
//! handlers, registers them against their sessions, drives distributed
//! execution and owns every lifecycle map (sessions, queries, locations,
//! archive, expiration queues).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::common::config::OryxConfig;
use crate::common::logging::{debug, error, info, warn};
use crate::common::query_options::{parse_query_options, QueryOptions};
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::{ms_since_epoch, ms_since_epoch as now_ms, NetworkAddress, UniqueId};
use crate::runtime::coordinator::ReportExecStatusParams;
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::frontend::{QueryContext, StmtType};
use crate::runtime::query_exec_state::{QueryExecState, QueryPhase};
use crate::runtime::session::{SessionKind, SessionRegistry, SessionState};
use crate::service::cancellation_pool::{
    CancellationPool, CancellationWork, MAX_CANCELLATION_QUEUE_SIZE,
};
use crate::service::catalog::{is_authorization_error, CatalogUpdateInfo};
use crate::service::query_log::QueryLog;
use crate::util::pretty::{format_timestamp_ms, pretty_duration_ns};
use crate::util::simple_logger::SimpleLogger;

/// Prefixes of the profile and audit log filenames. The version number is
/// part of the file format, not of any release.
pub const PROFILE_LOG_FILE_PREFIX: &str = "impala_profile_log_1.0-";
pub const AUDIT_EVENT_LOG_FILE_PREFIX: &str = "impala_audit_event_log_1.0-";

const BACKGROUND_TICK: Duration = Duration::from_millis(100);

pub struct CoordinatorServer {
    pub(crate) exec_env: Arc<ExecEnv>,
    pub(crate) config: OryxConfig,
    default_query_options: QueryOptions,
    default_configs: Vec<(String, String)>,
    authorized_proxy_user_config: HashMap<String, HashSet<String>>,

    pub(crate) session_registry: SessionRegistry,
    query_exec_states: Mutex<HashMap<UniqueId, Arc<QueryExecState>>>,
    connection_to_sessions: Mutex<HashMap<UniqueId, Vec<UniqueId>>>,
    pub(crate) query_locations: Mutex<HashMap<NetworkAddress, HashSet<UniqueId>>>,
    pub(crate) query_log: Mutex<QueryLog>,
    /// Expected-expiry ordered queue for the idle-query sweep. Entries may
    /// be stale; the sweep repairs them in place.
    queries_by_timestamp: Mutex<BTreeSet<(i64, UniqueId)>>,

    pub(crate) known_backends: Mutex<HashMap<String, NetworkAddress>>,
    pub(crate) catalog_update_info: Mutex<CatalogUpdateInfo>,
    pub(crate) catalog_version_cv: Condvar,

    pub(crate) cancellation_pool: CancellationPool,
    pub(crate) profile_logger: Option<SimpleLogger>,
    pub(crate) audit_event_logger: Option<SimpleLogger>,
    pub(crate) log_query_to_file: AtomicBool,

    is_offline: AtomicBool,
    shutdown: AtomicBool,
}

impl CoordinatorServer {
    pub fn new(exec_env: Arc<ExecEnv>, config: OryxConfig) -> Result<Arc<Self>> {
        let default_query_options =
            parse_query_options(&config.lifecycle.default_query_options).map_err(|e| {
                Status::new(
                    StatusCode::InvalidOption,
                    format!(
                        "Invalid default query options. Please check default_query_options.\n{}",
                        e.error_msg()
                    ),
                )
            })?;
        let mut default_configs: Vec<(String, String)> =
            default_query_options.to_map().into_iter().collect();
        default_configs.push(("support_start_over".to_string(), "false".to_string()));

        if let Err(e) = exec_env.frontend().validate_settings() {
            error!("{}", e.error_msg());
            if config.abort_on_config_error {
                error!("Aborting coordinator startup due to improper configuration");
                return Err(e);
            }
        }

        let mut log_query_to_file = config.archive.log_query_to_file;
        let profile_logger = if log_query_to_file {
            if config.archive.profile_log_dir.is_empty() {
                warn!("profile_log_dir is not set; query profile archival is disabled");
                log_query_to_file = false;
                None
            } else {
                let logger = SimpleLogger::new(
                    &config.archive.profile_log_dir,
                    PROFILE_LOG_FILE_PREFIX,
                    config.archive.max_profile_log_file_size,
                );
                match logger.init() {
                    Ok(()) => Some(logger),
                    Err(e) => {
                        error!("Query profile archival is disabled: {e}");
                        log_query_to_file = false;
                        None
                    }
                }
            }
        } else {
            None
        };

        let audit_event_logger = if config.archive.audit_event_log_dir.is_empty() {
            info!("Event logging is disabled");
            None
        } else {
            let logger = SimpleLogger::new(
                &config.archive.audit_event_log_dir,
                AUDIT_EVENT_LOG_FILE_PREFIX,
                config.archive.max_audit_event_log_file_size,
            );
            logger.init().map_err(|e| {
                Status::internal(format!(
                    "Aborting coordinator startup due to failure initializing audit event \
                     logging: {e}"
                ))
            })?;
            Some(logger)
        };

        let authorized_proxy_user_config =
            parse_proxy_config(&config.security.authorized_proxy_user_config)?;

        let metrics = exec_env.metrics();
        metrics.start_time_ms.update(ms_since_epoch());
        metrics.server_ready.update(1);

        let server = Arc::new(Self {
            session_registry: SessionRegistry::new(config.lifecycle.idle_session_timeout),
            query_exec_states: Mutex::new(HashMap::new()),
            connection_to_sessions: Mutex::new(HashMap::new()),
            query_locations: Mutex::new(HashMap::new()),
            query_log: Mutex::new(QueryLog::new(config.archive.query_log_size)),
            queries_by_timestamp: Mutex::new(BTreeSet::new()),
            known_backends: Mutex::new(HashMap::new()),
            catalog_update_info: Mutex::new(CatalogUpdateInfo::default()),
            catalog_version_cv: Condvar::new(),
            cancellation_pool: CancellationPool::new(
                config.lifecycle.cancellation_thread_pool_size,
                MAX_CANCELLATION_QUEUE_SIZE,
            ),
            profile_logger,
            audit_event_logger,
            log_query_to_file: AtomicBool::new(log_query_to_file),
            is_offline: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            default_query_options,
            default_configs,
            authorized_proxy_user_config,
            exec_env,
            config,
        });
        if let Err(e) = server.update_catalog_metrics() {
            debug!("Couldn't update catalog metrics: {}", e.error_msg());
        }
        Ok(server)
    }

    /// Launches the expiration sweepers and the log flush threads.
    pub fn start(self: &Arc<Self>) {
        if self.config.lifecycle.idle_session_timeout > 0 {
            let server = Arc::clone(self);
            thread::Builder::new()
                .name("session-expirer".to_string())
                .spawn(move || server.expire_sessions_loop())
                .expect("spawn session expirer");
        }
        {
            let server = Arc::clone(self);
            thread::Builder::new()
                .name("query-expirer".to_string())
                .spawn(move || server.expire_queries_loop())
                .expect("spawn query expirer");
        }
        if self.profile_logger.is_some() || self.audit_event_logger.is_some() {
            let server = Arc::clone(self);
            thread::Builder::new()
                .name("log-flush".to_string())
                .spawn(move || server.log_flush_loop())
                .expect("spawn log flusher");
        }
    }

    /// Asks the background threads to exit at their next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn exec_env(&self) -> &Arc<ExecEnv> {
        &self.exec_env
    }

    pub fn default_query_options(&self) -> &QueryOptions {
        &self.default_query_options
    }

    pub fn default_configs(&self) -> &[(String, String)] {
        &self.default_configs
    }

    pub fn is_offline(&self) -> bool {
        self.is_offline.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, is_offline: bool) {
        self.is_offline.store(is_offline, Ordering::SeqCst);
        self.exec_env
            .metrics()
            .server_ready
            .update((!is_offline) as i64);
    }

    // --- connections and sessions ---------------------------------------

    /// A new Beeswax connection maps 1:1 to a session, so the connection id
    /// doubles as the session id.
    pub fn connection_start(
        &self,
        connection_id: UniqueId,
        network_address: NetworkAddress,
        username: &str,
    ) -> Result<Arc<SessionState>> {
        let session = Arc::new(SessionState::new(
            connection_id,
            SessionKind::Beeswax,
            network_address,
            username,
            self.default_query_options.clone(),
        ));
        self.session_registry.create(Arc::clone(&session))?;
        self.connection_to_sessions
            .lock()
            .expect("connection map lock")
            .entry(connection_id)
            .or_default()
            .push(connection_id);
        self.exec_env
            .metrics()
            .num_open_beeswax_sessions
            .increment(1);
        Ok(session)
    }

    /// Opens one of possibly many sessions multiplexed on an HS2 connection.
    pub fn open_hs2_session(
        &self,
        connection_id: UniqueId,
        network_address: NetworkAddress,
        username: &str,
    ) -> Result<Arc<SessionState>> {
        let session = Arc::new(SessionState::new(
            UniqueId::generate(),
            SessionKind::HiveServer2,
            network_address,
            username,
            self.default_query_options.clone(),
        ));
        self.session_registry.create(Arc::clone(&session))?;
        self.connection_to_sessions
            .lock()
            .expect("connection map lock")
            .entry(connection_id)
            .or_default()
            .push(session.session_id);
        self.exec_env.metrics().num_open_hs2_sessions.increment(1);
        Ok(session)
    }

    /// Closes every session opened on a disconnecting client connection.
    pub fn connection_end(&self, connection_id: UniqueId) {
        let session_ids = {
            let mut connections = self
                .connection_to_sessions
                .lock()
                .expect("connection map lock");
            match connections.remove(&connection_id) {
                Some(session_ids) => session_ids,
                None => return,
            }
        };
        info!(
            "Connection {connection_id} closed, closing {} associated session(s)",
            session_ids.len()
        );
        for session_id in session_ids {
            if let Err(e) = self.close_session(&session_id, true) {
                warn!("Error closing session {session_id}: {}", e.error_msg());
            }
        }
    }

    pub fn get_session(&self, session_id: &UniqueId, mark_active: bool) -> Result<Arc<SessionState>> {
        self.session_registry.get(session_id, mark_active)
    }

    pub fn mark_session_inactive(&self, session: &Arc<SessionState>) {
        self.session_registry.mark_inactive(session);
    }

    /// Removes a session and unregisters all of its in-flight queries.
    pub fn close_session(&self, session_id: &UniqueId, ignore_if_absent: bool) -> Result<()> {
        let Some((session, inflight_queries)) =
            self.session_registry.close(session_id, ignore_if_absent)?
        else {
            return Ok(());
        };
        match session.kind {
            SessionKind::Beeswax => self
                .exec_env
                .metrics()
                .num_open_beeswax_sessions
                .increment(-1),
            SessionKind::HiveServer2 => {
                self.exec_env.metrics().num_open_hs2_sessions.increment(-1)
            }
        }
        let cause = Status::cancelled("Session closed");
        for query_id in inflight_queries {
            self.unregister_query(&query_id, Some(&cause));
        }
        Ok(())
    }

    // --- query lifecycle -------------------------------------------------

    /// Assigns the query identity and coordinator-local context fields.
    fn prepare_query_context(&self, query_ctx: &mut QueryContext) {
        query_ctx.query_id = UniqueId::generate();
        query_ctx.pid = std::process::id();
        query_ctx.now_string = format_timestamp_ms(now_ms());
        query_ctx.coord_address = self.exec_env.backend_address().clone();
    }

    /// Drives a statement through registration, planning and the start of
    /// execution. On failure after registration the query is unregistered
    /// before the error is returned.
    pub fn execute(
        self: &Arc<Self>,
        query_ctx: &mut QueryContext,
        session: Arc<SessionState>,
    ) -> Result<Arc<QueryExecState>> {
        self.prepare_query_context(query_ctx);
        self.exec_env.metrics().num_queries.increment(1);
        let mut registered = false;
        match self.execute_internal(query_ctx, &session, &mut registered) {
            Ok(exec_state) => Ok(exec_state),
            Err(status) => {
                if registered {
                    self.unregister_query(&query_ctx.query_id, Some(&status));
                }
                Err(status)
            }
        }
    }

    fn execute_internal(
        self: &Arc<Self>,
        query_ctx: &QueryContext,
        session: &Arc<SessionState>,
        registered: &mut bool,
    ) -> Result<Arc<QueryExecState>> {
        *registered = false;
        if self.is_offline() {
            return Err(Status::internal(
                "This coordinator is offline. Please retry your query later.",
            ));
        }
        let exec_state = QueryExecState::new(query_ctx.clone(), Arc::clone(session));
        exec_state.mark_event("Start execution");

        let request = {
            // Hold the exec-state lock so registration and result-metadata
            // setting are atomic. This takes the exec-state lock before the
            // registry lock; the reverse-order lookup path cannot find this
            // query until registration below has finished and released the
            // registry lock, so the classic deadlock interleaving cannot
            // happen.
            let mut inner = exec_state.lock();

            // Register as early as possible so slow-planning queries are
            // visible and incoming status reports find their target.
            self.register_query(session, &exec_state)?;
            *registered = true;

            match self.exec_env.frontend().get_exec_request(query_ctx) {
                Ok(request) => {
                    exec_state.mark_event("Planning finished");
                    if !inner.phase.is_terminal() {
                        inner.phase = QueryPhase::Planned;
                    }
                    if let Some(metadata) = request.result_set_metadata.clone() {
                        inner.result_metadata = Some(metadata);
                    }
                    if !request.plan.is_empty() {
                        exec_state
                            .summary_profile()
                            .add_info_string("Plan", request.plan.clone());
                    }
                    inner.exec_request = Some(request.clone());
                    request
                }
                Err(status) => {
                    inner.update_status(&status);
                    return Err(status);
                }
            }
        };

        if self.is_audit_event_logging_enabled() {
            let _ = self.log_audit_record(&exec_state, &request);
        }

        // Start execution; fragments begin reporting status from here on.
        match exec_state.exec(&self.exec_env, &request) {
            Ok(Some(catalog_update)) => {
                let wait_for_all_subscribers = query_ctx.query_options.sync_ddl;
                if let Err(status) =
                    self.process_catalog_update_result(&catalog_update, wait_for_all_subscribers)
                {
                    exec_state.lock().update_status(&status);
                    return Err(status);
                }
                if request.stmt_type == StmtType::Ddl {
                    if let Err(e) = self.update_catalog_metrics() {
                        debug!("Couldn't update catalog metrics: {}", e.error_msg());
                    }
                }
            }
            Ok(None) => {}
            Err(status) => {
                exec_state.lock().update_status(&status);
                return Err(status);
            }
        }

        if let Some(coord) = exec_state.coord() {
            let unique_hosts = coord.participating_backends();
            if !unique_hosts.is_empty() {
                let mut locations = self.query_locations.lock().expect("query locations lock");
                for host in unique_hosts {
                    locations
                        .entry(host)
                        .or_default()
                        .insert(exec_state.query_id());
                }
            }
        }
        Ok(exec_state)
    }

    fn register_query(
        &self,
        session: &Arc<SessionState>,
        exec_state: &Arc<QueryExecState>,
    ) -> Result<()> {
        let query_id = exec_state.query_id();
        {
            let mut session_inner = session.lock();
            // The session was checked out by the caller and cannot expire
            // while checked out, but it may have been closed since.
            if session_inner.closed {
                return Err(Status::new(
                    StatusCode::SessionClosed,
                    "Session has been closed, ignoring query.",
                ));
            }
            let mut queries = self.query_exec_states.lock().expect("query map lock");
            if queries.contains_key(&query_id) {
                // query_id is globally unique; a collision is an internal
                // error, not bad input.
                return Err(Status::internal(format!(
                    "query id {query_id} already exists"
                )));
            }
            session_inner.inflight_queries.insert(query_id);
            queries.insert(query_id, Arc::clone(exec_state));
        }

        let timeout_s = self.effective_query_timeout_s(exec_state.query_options());
        if timeout_s > 0 {
            info!(
                "Query {query_id} has timeout of {}",
                pretty_duration_ns(timeout_s * 1_000_000_000)
            );
            let mut queue = self
                .queries_by_timestamp
                .lock()
                .expect("expiration queue lock");
            queue.insert((now_ms() + timeout_s * 1000, query_id));
        }
        Ok(())
    }

    /// The idle timeout a query actually gets: the tighter of the global and
    /// per-query values when both are set, otherwise whichever is set.
    fn effective_query_timeout_s(&self, options: &QueryOptions) -> i64 {
        let per_query = options.query_timeout_s as i64;
        let global = self.config.lifecycle.idle_query_timeout;
        if global > 0 && per_query > 0 {
            global.min(per_query)
        } else {
            global.max(per_query)
        }
    }

    /// Idempotent terminal teardown. Returns false when the id is unknown;
    /// the second of two racing unregisters sees false and changes nothing.
    pub fn unregister_query(&self, query_id: &UniqueId, cause: Option<&Status>) -> bool {
        info!("UnregisterQuery(): query_id={query_id}");

        // Cancel first in case the query is still running.
        let _ = self.cancel_internal(query_id, cause);

        let exec_state = {
            let mut queries = self.query_exec_states.lock().expect("query map lock");
            match queries.remove(query_id) {
                Some(exec_state) => exec_state,
                None => {
                    info!("unknown query id: {query_id}");
                    return false;
                }
            }
        };

        // Of the audit events raised at teardown, only authorization
        // failures are recorded.
        if self.is_audit_event_logging_enabled()
            && is_authorization_error(&exec_state.query_status())
        {
            let request = exec_state.lock().exec_request.clone();
            if let Some(request) = request {
                let _ = self.log_audit_record(&exec_state, &request);
            }
        }
        exec_state.done();

        {
            let mut session_inner = exec_state.session().lock();
            session_inner.inflight_queries.remove(query_id);
        }

        if let Some(coord) = exec_state.coord() {
            exec_state
                .summary_profile()
                .add_info_string("ExecSummary", coord.exec_summary());

            let unique_hosts = coord.participating_backends();
            if !unique_hosts.is_empty() {
                let mut locations = self.query_locations.lock().expect("query locations lock");
                for host in unique_hosts {
                    // The membership failure-detection path may already have
                    // removed this entry; the two paths harmlessly race.
                    if let Some(query_ids) = locations.get_mut(&host) {
                        query_ids.remove(query_id);
                        if query_ids.is_empty() {
                            locations.remove(&host);
                        }
                    }
                }
            }
        }
        self.archive_query(&exec_state);
        true
    }

    /// Cancels without unregistering. The first cause wins; all callers
    /// observe the terminal state once their call returns.
    pub fn cancel_internal(&self, query_id: &UniqueId, cause: Option<&Status>) -> Result<()> {
        info!("Cancel(): query_id={query_id}");
        let exec_state = self
            .get_query_exec_state(query_id)
            .ok_or_else(|| {
                Status::new(StatusCode::UnknownQuery, "Invalid or unknown query handle")
            })?;
        exec_state.cancel(cause);
        Ok(())
    }

    pub fn get_query_exec_state(&self, query_id: &UniqueId) -> Option<Arc<QueryExecState>> {
        let queries = self.query_exec_states.lock().expect("query map lock");
        queries.get(query_id).cloned()
    }

    pub fn get_session_id_for_query(&self, query_id: &UniqueId) -> Option<UniqueId> {
        self.get_query_exec_state(query_id)
            .map(|exec_state| exec_state.session_id())
    }

    pub fn num_registered_queries(&self) -> usize {
        self.query_exec_states.lock().expect("query map lock").len()
    }

    /// Forwards a fragment status report to the owning query's coordinator.
    /// A report racing teardown finds no query and gets a structured error.
    pub fn report_exec_status(&self, params: &ReportExecStatusParams) -> Result<()> {
        debug!(
            "ReportExecStatus() query_id={} backend#={} instance_id={} done={}",
            params.query_id, params.backend_num, params.fragment_instance_id, params.done
        );
        let Some(exec_state) = self.get_query_exec_state(&params.query_id) else {
            let err = format!(
                "ReportExecStatus(): Received report for unknown query ID (probably closed or \
                 cancelled). (query_id: {}, backend: {}, instance: {} done: {})",
                params.query_id, params.backend_num, params.fragment_instance_id, params.done
            );
            info!("{err}");
            return Err(Status::internal(err));
        };
        let Some(coord) = exec_state.coord() else {
            return Err(Status::internal(format!(
                "ReportExecStatus(): query {} has no distributed execution",
                params.query_id
            )));
        };
        coord.update_fragment_exec_status(params)
    }

    /// Dispatches one offloaded cancellation from the worker pool.
    pub(crate) fn cancel_from_pool(&self, work: CancellationWork) {
        if work.unregister {
            if !self.unregister_query(&work.query_id, Some(&work.cause)) {
                info!("Query de-registration ({}) failed", work.query_id);
            }
        } else if let Err(e) = self.cancel_internal(&work.query_id, Some(&work.cause)) {
            info!(
                "Query cancellation ({}) did not succeed: {}",
                work.query_id,
                e.error_msg()
            );
        }
    }

    // --- proxy-user delegation -------------------------------------------

    /// Checks that `user` may submit requests on behalf of `do_as_user`.
    pub fn authorize_proxy_user(&self, user: &str, do_as_user: &str) -> Result<()> {
        authorize_from_map(&self.authorized_proxy_user_config, user, do_as_user)
    }

    // --- expiration sweeps ------------------------------------------------

    fn sleep_until_shutdown(&self, total: Duration) {
        let mut remaining = total;
        while !self.shutdown.load(Ordering::SeqCst) && remaining > Duration::ZERO {
            let tick = BACKGROUND_TICK.min(remaining);
            thread::sleep(tick);
            remaining = remaining.saturating_sub(tick);
        }
    }

    fn expire_sessions_loop(self: Arc<Self>) {
        let timeout_s = self.config.lifecycle.idle_session_timeout;
        // A timeout of 0 means sessions never expire; there is nothing to
        // sweep for.
        if timeout_s <= 0 {
            return;
        }
        // Sleep for half the session timeout between passes; the maximum
        // delay between a session expiring and this thread noticing equals
        // this interval.
        let interval = Duration::from_millis((timeout_s * 500) as u64);
        while !self.shutdown.load(Ordering::SeqCst) {
            self.sleep_until_shutdown(interval);
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.expire_sessions_pass(now_ms());
        }
    }

    /// One idle-session pass: sessions past the timeout are marked expired
    /// and every in-flight query is enqueued for unregistration. Nothing is
    /// cancelled under the registry lock.
    pub fn expire_sessions_pass(self: &Arc<Self>, now_ms: i64) {
        let expired = self.session_registry.sweep_expired(now_ms);
        for session in expired {
            info!(
                "Expiring session: {}, user: {}, last active: {}",
                session.session_id,
                session.connected_user,
                format_timestamp_ms(session.last_accessed_ms)
            );
            self.exec_env.metrics().num_sessions_expired.increment(1);
            let cause = Status::cancelled("Session expired due to inactivity");
            for query_id in session.inflight_queries {
                if !self
                    .cancellation_pool
                    .offer(self, CancellationWork::unregister(query_id, cause.clone()))
                {
                    warn!("Cancellation queue is full");
                }
            }
        }
    }

    fn expire_queries_loop(self: Arc<Self>) {
        // Timeouts are at least 1s, so nothing new can expire sooner than 1s
        // from now; a 1s cadence bounds the sweep error accordingly.
        while !self.shutdown.load(Ordering::SeqCst) {
            self.sleep_until_shutdown(Duration::from_secs(1));
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.expire_queries_pass(now_ms());
        }
    }

    /// One idle-query pass over the expiration queue. Expiry timestamps only
    /// move forward, so the walk stops at the first entry in the future;
    /// stale entries are re-inserted at their corrected position.
    pub fn expire_queries_pass(self: &Arc<Self>, now_ms: i64) {
        let mut queue = self
            .queries_by_timestamp
            .lock()
            .expect("expiration queue lock");
        let due: Vec<(i64, UniqueId)> = queue
            .iter()
            .take_while(|(expiry_ms, _)| *expiry_ms <= now_ms)
            .cloned()
            .collect();
        for entry in due {
            let (recorded_expiry_ms, query_id) = entry;
            let Some(query_state) = self.get_query_exec_state(&query_id) else {
                // Already torn down through some other path.
                queue.remove(&entry);
                continue;
            };
            let timeout_s = self.effective_query_timeout_s(query_state.query_options());
            let expiration = query_state.last_active_ms() + timeout_s * 1000;
            if now_ms < expiration {
                // Activity moved the true expiry into the future; repair the
                // entry in place.
                if expiration != recorded_expiry_ms {
                    queue.remove(&entry);
                    queue.insert((expiration, query_id));
                }
            } else if !query_state.is_active() {
                info!(
                    "Expiring query due to client inactivity: {query_id}, last activity was \
                     at: {}",
                    format_timestamp_ms(query_state.last_active_ms())
                );
                let cause = Status::cancelled(format!(
                    "Query {query_id} expired due to client inactivity (timeout is {})",
                    pretty_duration_ns(timeout_s * 1_000_000_000)
                ));
                self.cancellation_pool
                    .offer(self, CancellationWork::cancel(query_id, cause));
                queue.remove(&entry);
                self.exec_env.metrics().num_queries_expired.increment(1);
            }
            // An active query past its expiry stays queued and is looked at
            // again next pass.
        }
    }

    fn log_flush_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::SeqCst) {
            self.sleep_until_shutdown(Duration::from_secs(5));
            if let Some(logger) = self.profile_logger.as_ref() {
                if let Err(e) = logger.flush() {
                    warn!("Error flushing profile log: {e}");
                }
            }
            if let Some(logger) = self.audit_event_logger.as_ref() {
                if let Err(e) = logger.flush() {
                    error!("Error flushing audit event log: {e}");
                    if self.config.archive.abort_on_failed_audit_event {
                        error!(
                            "Shutting down coordinator due to abort_on_failed_audit_event=true"
                        );
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    /// Test/seam access to the cancellation pool's drain point.
    pub fn drain_cancellation_pool(&self) {
        self.cancellation_pool.join();
    }
}

/// Parses `proxy1=user1,user2;proxy2=*` into the delegation map. A mapping
/// without a value list is a fatal configuration error.
pub(crate) fn parse_proxy_config(
    config: &str,
) -> Result<HashMap<String, HashSet<String>>> {
    let mut parsed = HashMap::new();
    for entry in config.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((proxy_user, allowed)) = entry.split_once('=') else {
            return Err(Status::new(
                StatusCode::InvalidOption,
                format!(
                    "Invalid proxy user configuration. No mapping value specified for the proxy \
                     user: {entry}"
                ),
            ));
        };
        let allowed_users: HashSet<String> = allowed
            .split(',')
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .collect();
        parsed.insert(proxy_user.trim().to_string(), allowed_users);
    }
    Ok(parsed)
}

pub(crate) fn authorize_from_map(
    proxy_config: &HashMap<String, HashSet<String>>,
    user: &str,
    do_as_user: &str,
) -> Result<()> {
    if user.is_empty() {
        return Err(Status::new(
            StatusCode::Authorization,
            "Unable to delegate using empty proxy username.",
        ));
    }
    if do_as_user.is_empty() {
        return Err(Status::new(
            StatusCode::Authorization,
            "Unable to delegate using empty doAs username.",
        ));
    }

    let mut error_msg =
        format!("User '{user}' is not authorized to delegate to '{do_as_user}'.");
    if proxy_config.is_empty() {
        error_msg.push_str(" User delegation is disabled.");
        return Err(Status::new(StatusCode::Authorization, error_msg));
    }

    // The short form of the principal: everything up to the first '/' or
    // '@', or the whole name if neither appears (or appears first).
    let end_idx = match (user.find('/'), user.find('@')) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    let short_user = match end_idx {
        None | Some(0) => user,
        Some(idx) => &user[..idx],
    };

    if let Some(allowed) = proxy_config.get(short_user) {
        if allowed.contains("*") || allowed.contains(do_as_user) {
            return Ok(());
        }
    }
    Err(Status::new(StatusCode::Authorization, error_msg))
}
