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
//! In-process fakes for the external collaborators, shared by the
//! integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use oryx::common::config::OryxConfig;
use oryx::common::status::{Result, Status};
use oryx::common::types::{make_network_address, NetworkAddress, UniqueId};
use oryx::runtime::coordinator::{
    CoordinatorFactory, QueryCoordinator, QueryProgress, QueryResultSet, ReportExecStatusParams,
};
use oryx::runtime::data_stream::{DataStreamMgr, RowBatch};
use oryx::runtime::exec_env::{
    BackendClientCache, CatalogOpExecutor, ExecEnv, FragmentExecutorFactory, LibraryCache,
    PlanFragmentExecutor,
};
use oryx::runtime::frontend::{
    CatalogOpRequest, ColumnDesc, ExecRequest, Frontend, QueryContext, ResultSetMetadata,
    StmtType,
};
use oryx::runtime::query_exec_state::QueryExecState;
use oryx::runtime::session::SessionState;
use oryx::service::catalog::{
    CatalogObject, CatalogObjectType, CatalogUpdateResult, UpdateCatalogCacheRequest,
    UpdateCatalogCacheResponse,
};
use oryx::service::fragment_service::ExecPlanFragmentParams;
use oryx::service::subscription::{BackendDescriptor, TopicDelta, TopicItem};
use oryx::CoordinatorServer;

pub struct FakeFrontend {
    pub catalog_service_id: Mutex<UniqueId>,
    pub fail_catalog_update: AtomicBool,
    pub plan_failure: Mutex<Option<Status>>,
    pub update_requests: Mutex<Vec<UpdateCatalogCacheRequest>>,
}

impl FakeFrontend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            catalog_service_id: Mutex::new(UniqueId { hi: 10, lo: 10 }),
            fail_catalog_update: AtomicBool::new(false),
            plan_failure: Mutex::new(None),
            update_requests: Mutex::new(Vec::new()),
        })
    }
}

impl Frontend for FakeFrontend {
    fn validate_settings(&self) -> Result<()> {
        Ok(())
    }

    fn get_exec_request(&self, ctx: &QueryContext) -> Result<ExecRequest> {
        if let Some(status) = self.plan_failure.lock().expect("plan failure lock").clone() {
            return Err(status);
        }
        let sql = ctx.sql_stmt.to_ascii_lowercase();
        if sql.starts_with("explain") {
            return Ok(ExecRequest {
                stmt_type: StmtType::Explain,
                plan: "PLAN-ROOT SINK\n01:EXCHANGE".to_string(),
                result_set_metadata: None,
                catalog_op: None,
                access_events: Vec::new(),
            });
        }
        if sql.starts_with("create") || sql.starts_with("drop") || sql.starts_with("alter") {
            return Ok(ExecRequest {
                stmt_type: StmtType::Ddl,
                plan: String::new(),
                result_set_metadata: None,
                catalog_op: Some(CatalogOpRequest {
                    ddl_type: "CREATE_TABLE".to_string(),
                }),
                access_events: Vec::new(),
            });
        }
        Ok(ExecRequest {
            stmt_type: StmtType::Query,
            plan: "00:UNION".to_string(),
            result_set_metadata: Some(ResultSetMetadata {
                columns: vec![ColumnDesc {
                    name: "c0".to_string(),
                    col_type: "INT".to_string(),
                }],
            }),
            catalog_op: None,
            access_events: Vec::new(),
        })
    }

    fn update_catalog_cache(
        &self,
        req: &UpdateCatalogCacheRequest,
    ) -> Result<UpdateCatalogCacheResponse> {
        if self.fail_catalog_update.load(Ordering::SeqCst) {
            return Err(Status::internal("injected catalog cache failure"));
        }
        self.update_requests
            .lock()
            .expect("update requests lock")
            .push(req.clone());
        Ok(UpdateCatalogCacheResponse {
            catalog_service_id: *self
                .catalog_service_id
                .lock()
                .expect("catalog service id lock"),
        })
    }

    fn get_catalog_object(&self, object: &CatalogObject) -> Result<CatalogObject> {
        let mut resolved = object.clone();
        resolved.catalog_version = 1;
        resolved.library_location = Some(format!("/lib/{}.so", object.name));
        Ok(resolved)
    }

    fn get_db_names(&self) -> Result<Vec<String>> {
        Ok(vec!["default".to_string()])
    }

    fn get_table_names(&self, _db: &str) -> Result<Vec<String>> {
        Ok(vec!["t1".to_string(), "t2".to_string()])
    }
}

pub struct FakeCoordinator {
    rows: Mutex<Vec<Vec<String>>>,
    backends: Vec<NetworkAddress>,
    pub cancel_cause: Mutex<Option<Status>>,
    pub reports: Mutex<Vec<ReportExecStatusParams>>,
}

impl FakeCoordinator {
    pub fn cancelled_with(&self) -> Option<Status> {
        self.cancel_cause.lock().expect("cancel cause lock").clone()
    }
}

impl QueryCoordinator for FakeCoordinator {
    fn exec(&self) -> Result<()> {
        Ok(())
    }

    fn get_next(&self, max_rows: usize) -> Result<QueryResultSet> {
        let mut rows = self.rows.lock().expect("rows lock");
        let take = rows.len().min(max_rows);
        let batch: Vec<Vec<String>> = rows.drain(..take).collect();
        Ok(QueryResultSet {
            eos: rows.is_empty(),
            rows: batch,
        })
    }

    fn cancel(&self, cause: &Status) {
        let mut stored = self.cancel_cause.lock().expect("cancel cause lock");
        if stored.is_none() {
            *stored = Some(cause.clone());
        }
    }

    fn update_fragment_exec_status(&self, params: &ReportExecStatusParams) -> Result<()> {
        self.reports.lock().expect("reports lock").push(params.clone());
        Ok(())
    }

    fn participating_backends(&self) -> Vec<NetworkAddress> {
        self.backends.clone()
    }

    fn progress(&self) -> QueryProgress {
        QueryProgress {
            num_complete: self.backends.len() as i64,
            total: self.backends.len() as i64,
        }
    }

    fn exec_summary(&self) -> String {
        "00:SCAN 1 instance".to_string()
    }
}

pub struct FakeCoordinatorFactory {
    pub rows: Mutex<Vec<Vec<String>>>,
    pub backends: Mutex<Vec<NetworkAddress>>,
    pub created: Mutex<Vec<Arc<FakeCoordinator>>>,
}

impl FakeCoordinatorFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(vec![vec!["1".to_string()]]),
            backends: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn set_backends(&self, backends: Vec<NetworkAddress>) {
        *self.backends.lock().expect("backends lock") = backends;
    }

    pub fn set_rows(&self, rows: Vec<Vec<String>>) {
        *self.rows.lock().expect("rows lock") = rows;
    }

    pub fn last_created(&self) -> Option<Arc<FakeCoordinator>> {
        self.created.lock().expect("created lock").last().cloned()
    }
}

impl CoordinatorFactory for FakeCoordinatorFactory {
    fn create(
        &self,
        _ctx: &QueryContext,
        _request: &ExecRequest,
    ) -> Result<Arc<dyn QueryCoordinator>> {
        let coordinator = Arc::new(FakeCoordinator {
            rows: Mutex::new(self.rows.lock().expect("rows lock").clone()),
            backends: self.backends.lock().expect("backends lock").clone(),
            cancel_cause: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
        });
        self.created
            .lock()
            .expect("created lock")
            .push(Arc::clone(&coordinator));
        Ok(coordinator)
    }
}

#[derive(Default)]
pub struct FakeStreamMgr {
    pub batches: Mutex<Vec<(UniqueId, i32, i32, usize)>>,
    pub closed_senders: Mutex<Vec<(UniqueId, i32, i32)>>,
}

impl DataStreamMgr for FakeStreamMgr {
    fn add_data(
        &self,
        dest_fragment_instance_id: UniqueId,
        dest_node_id: i32,
        batch: RowBatch,
        sender_id: i32,
    ) -> Result<()> {
        self.batches.lock().expect("batches lock").push((
            dest_fragment_instance_id,
            dest_node_id,
            sender_id,
            batch.num_rows(),
        ));
        Ok(())
    }

    fn close_sender(
        &self,
        dest_fragment_instance_id: UniqueId,
        dest_node_id: i32,
        sender_id: i32,
    ) -> Result<()> {
        self.closed_senders.lock().expect("closed senders lock").push((
            dest_fragment_instance_id,
            dest_node_id,
            sender_id,
        ));
        Ok(())
    }
}

pub struct FakeFragmentExecutor {
    pub fail_prepare: bool,
    pub prepared: AtomicBool,
    pub cancelled: AtomicBool,
    finished: Mutex<bool>,
    cv: Condvar,
}

impl FakeFragmentExecutor {
    fn new(fail_prepare: bool) -> Self {
        Self {
            fail_prepare,
            prepared: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            finished: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Lets a blocked exec thread run to completion.
    pub fn release(&self) {
        *self.finished.lock().expect("finished lock") = true;
        self.cv.notify_all();
    }
}

impl PlanFragmentExecutor for FakeFragmentExecutor {
    fn prepare(&self, _params: &ExecPlanFragmentParams) -> Result<()> {
        if self.fail_prepare {
            return Err(Status::internal("injected prepare failure"));
        }
        self.prepared.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn exec(&self) -> Result<()> {
        assert!(
            self.prepared.load(Ordering::SeqCst),
            "exec before prepare returned"
        );
        let mut finished = self.finished.lock().expect("finished lock");
        while !*finished && !self.cancelled.load(Ordering::SeqCst) {
            finished = self.cv.wait(finished).expect("finished wait");
        }
        Ok(())
    }

    fn cancel(&self) {
        assert!(
            self.prepared.load(Ordering::SeqCst),
            "cancel before prepare returned"
        );
        self.cancelled.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }
}

pub struct FakeFragmentExecutorFactory {
    pub fail_prepare: AtomicBool,
    pub created: Mutex<Vec<Arc<FakeFragmentExecutor>>>,
}

impl FakeFragmentExecutorFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_prepare: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn last_created(&self) -> Option<Arc<FakeFragmentExecutor>> {
        self.created.lock().expect("created lock").last().cloned()
    }
}

impl FragmentExecutorFactory for FakeFragmentExecutorFactory {
    fn create(&self) -> Arc<dyn PlanFragmentExecutor> {
        let executor = Arc::new(FakeFragmentExecutor::new(
            self.fail_prepare.load(Ordering::SeqCst),
        ));
        self.created
            .lock()
            .expect("created lock")
            .push(Arc::clone(&executor));
        executor
    }
}

#[derive(Default)]
pub struct FakeLibCache {
    pub refreshed: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub dropped: AtomicBool,
}

impl LibraryCache for FakeLibCache {
    fn set_needs_refresh(&self, location: &str) {
        self.refreshed
            .lock()
            .expect("refreshed lock")
            .push(location.to_string());
    }

    fn remove_entry(&self, location: &str) {
        self.removed
            .lock()
            .expect("removed lock")
            .push(location.to_string());
    }

    fn drop_cache(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeClientCache {
    pub closed: Mutex<Vec<NetworkAddress>>,
}

impl BackendClientCache for FakeClientCache {
    fn close_connections(&self, address: &NetworkAddress) {
        self.closed.lock().expect("closed lock").push(address.clone());
    }
}

pub struct FakeCatalogOpExecutor {
    pub result: Mutex<CatalogUpdateResult>,
}

impl FakeCatalogOpExecutor {
    pub fn new(catalog_service_id: UniqueId) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(CatalogUpdateResult {
                catalog_service_id,
                version: 1,
                updated_catalog_object: Some(CatalogObject {
                    object_type: CatalogObjectType::Table,
                    name: "default.t_new".to_string(),
                    catalog_version: 1,
                    catalog_service_id: None,
                    library_location: None,
                }),
                removed_catalog_object: None,
            }),
        })
    }
}

impl CatalogOpExecutor for FakeCatalogOpExecutor {
    fn exec(&self, _op: &CatalogOpRequest) -> Result<CatalogUpdateResult> {
        Ok(self.result.lock().expect("catalog op result lock").clone())
    }
}

pub struct TestEnv {
    pub frontend: Arc<FakeFrontend>,
    pub coord_factory: Arc<FakeCoordinatorFactory>,
    pub stream_mgr: Arc<FakeStreamMgr>,
    pub fragment_factory: Arc<FakeFragmentExecutorFactory>,
    pub lib_cache: Arc<FakeLibCache>,
    pub client_cache: Arc<FakeClientCache>,
    pub catalog_op_executor: Arc<FakeCatalogOpExecutor>,
    pub exec_env: Arc<ExecEnv>,
}

pub fn test_env() -> TestEnv {
    let frontend = FakeFrontend::new();
    let coord_factory = FakeCoordinatorFactory::new();
    let stream_mgr = Arc::new(FakeStreamMgr::default());
    let fragment_factory = FakeFragmentExecutorFactory::new();
    let lib_cache = Arc::new(FakeLibCache::default());
    let client_cache = Arc::new(FakeClientCache::default());
    let catalog_op_executor = FakeCatalogOpExecutor::new(UniqueId { hi: 10, lo: 10 });
    let exec_env = Arc::new(ExecEnv::new(
        Arc::<FakeFrontend>::clone(&frontend),
        Arc::<FakeStreamMgr>::clone(&stream_mgr),
        Arc::<FakeCoordinatorFactory>::clone(&coord_factory),
        Arc::<FakeFragmentExecutorFactory>::clone(&fragment_factory),
        Arc::<FakeLibCache>::clone(&lib_cache),
        Arc::<FakeClientCache>::clone(&client_cache),
        Arc::<FakeCatalogOpExecutor>::clone(&catalog_op_executor),
        make_network_address("coordinator-1", 22000),
    ));
    TestEnv {
        frontend,
        coord_factory,
        stream_mgr,
        fragment_factory,
        lib_cache,
        client_cache,
        catalog_op_executor,
        exec_env,
    }
}

pub fn test_server_with_config(config: OryxConfig) -> (Arc<CoordinatorServer>, TestEnv) {
    let env = test_env();
    let server = CoordinatorServer::new(Arc::clone(&env.exec_env), config)
        .expect("create coordinator server");
    (server, env)
}

pub fn test_server() -> (Arc<CoordinatorServer>, TestEnv) {
    test_server_with_config(OryxConfig::default())
}

pub fn open_beeswax_session(server: &Arc<CoordinatorServer>, user: &str) -> Arc<SessionState> {
    server
        .connection_start(
            UniqueId::generate(),
            make_network_address("client-host", 40000),
            user,
        )
        .expect("open beeswax session")
}

/// Builds a query context the way a protocol handler would, from the
/// session's current state.
pub fn make_query_ctx(session: &Arc<SessionState>, sql: &str) -> QueryContext {
    let mut ctx = QueryContext::new(session.session_id, sql);
    let inner = session.lock();
    ctx.connected_user = inner.connected_user.clone();
    ctx.do_as_user = inner.do_as_user.clone();
    ctx.default_db = inner.database.clone();
    ctx.query_options = inner.default_query_options.clone();
    ctx
}

pub fn run_statement(
    server: &Arc<CoordinatorServer>,
    session: &Arc<SessionState>,
    sql: &str,
) -> oryx::common::status::Result<Arc<QueryExecState>> {
    let checked_out = server.get_session(&session.session_id, true)?;
    let mut ctx = make_query_ctx(&checked_out, sql);
    let result = server.execute(&mut ctx, Arc::clone(&checked_out));
    server.mark_session_inactive(&checked_out);
    result
}

/// A membership topic delta listing exactly `backends` as the full topic.
pub fn full_membership_delta(backends: &[(&str, NetworkAddress)]) -> TopicDelta {
    TopicDelta {
        topic_name: oryx::service::subscription::MEMBERSHIP_TOPIC.to_string(),
        is_delta: false,
        from_version: None,
        to_version: 1,
        min_subscriber_topic_version: 1,
        topic_entries: backends
            .iter()
            .map(|(key, address)| TopicItem {
                key: key.to_string(),
                value: serde_json::to_vec(&BackendDescriptor {
                    address: address.clone(),
                })
                .expect("serialize backend descriptor"),
            })
            .collect(),
        topic_deletions: Vec::new(),
    }
}
