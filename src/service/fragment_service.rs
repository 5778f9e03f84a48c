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
//! Backend-side endpoint hosting remote plan-fragment instances.
//!
//! A fragment is prepared synchronously before it becomes visible in the
//! fragment map, so an asynchronous cancel can never reach an unprepared
//! executor. Each accepted fragment runs on its own exec thread; the map
//! entry is removed when that thread exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::common::logging::{debug, error, info};
use crate::common::query_options::QueryOptions;
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::{NetworkAddress, UniqueId};
use crate::runtime::coordinator::ReportExecStatusParams;
use crate::runtime::data_stream::RowBatch;
use crate::runtime::exec_env::{ExecEnv, PlanFragmentExecutor};
use crate::service::server::CoordinatorServer;

#[derive(Clone, Debug)]
pub struct OutputSink {
    pub sink_type: String,
}

#[derive(Clone, Debug)]
pub struct FragmentPlan {
    pub plan_desc: String,
    pub output_sink: Option<OutputSink>,
}

#[derive(Clone, Debug)]
pub struct FragmentInstanceCtx {
    pub query_id: UniqueId,
    pub fragment_instance_id: UniqueId,
    pub backend_num: i32,
    pub coord_address: NetworkAddress,
}

#[derive(Clone, Debug)]
pub struct ExecPlanFragmentParams {
    pub fragment: FragmentPlan,
    pub instance_ctx: FragmentInstanceCtx,
    pub query_options: QueryOptions,
}

#[derive(Clone, Debug)]
pub struct TransmitDataParams {
    pub dest_fragment_instance_id: UniqueId,
    pub dest_node_id: i32,
    pub sender_id: i32,
    pub eos: bool,
    pub row_batch: RowBatch,
}

#[derive(Clone, Debug)]
pub struct CancelPlanFragmentParams {
    pub fragment_instance_id: UniqueId,
}

/// One running fragment instance and its executor.
pub struct FragmentExecState {
    instance_ctx: FragmentInstanceCtx,
    executor: Arc<dyn PlanFragmentExecutor>,
}

impl FragmentExecState {
    fn new(instance_ctx: FragmentInstanceCtx, executor: Arc<dyn PlanFragmentExecutor>) -> Self {
        Self {
            instance_ctx,
            executor,
        }
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.instance_ctx.fragment_instance_id
    }

    pub fn query_id(&self) -> UniqueId {
        self.instance_ctx.query_id
    }

    fn prepare(&self, params: &ExecPlanFragmentParams) -> Result<()> {
        self.executor.prepare(params)
    }

    fn exec(&self) -> Result<()> {
        self.executor.exec()
    }

    fn cancel(&self) {
        self.executor.cancel();
    }
}

pub struct FragmentMgr {
    exec_env: Arc<ExecEnv>,
    fragments: Mutex<HashMap<UniqueId, Arc<FragmentExecState>>>,
}

impl FragmentMgr {
    pub fn new(exec_env: Arc<ExecEnv>) -> Arc<Self> {
        Arc::new(Self {
            exec_env,
            fragments: Mutex::new(HashMap::new()),
        })
    }

    /// Accepts a plan fragment, prepares it synchronously and launches its
    /// exec thread. Preparation errors return to the caller and leave no
    /// trace in the fragment map.
    pub fn exec_plan_fragment(self: &Arc<Self>, params: ExecPlanFragmentParams) -> Result<()> {
        info!(
            "ExecPlanFragment() instance_id={} coord={} backend#={}",
            params.instance_ctx.fragment_instance_id,
            params.instance_ctx.coord_address,
            params.instance_ctx.backend_num
        );
        if params.fragment.output_sink.is_none() {
            return Err(Status::internal("missing sink in plan fragment"));
        }

        let executor = self.exec_env.fragment_executor_factory().create();
        let exec_state = Arc::new(FragmentExecState::new(params.instance_ctx.clone(), executor));
        // Prepare before registering so a racing cancel can never observe an
        // unprepared fragment.
        exec_state.prepare(&params)?;

        let instance_id = exec_state.fragment_instance_id();
        {
            let mut fragments = self.fragments.lock().expect("fragment map lock");
            if fragments.contains_key(&instance_id) {
                return Err(Status::internal(format!(
                    "fragment instance id {instance_id} already registered"
                )));
            }
            fragments.insert(instance_id, Arc::clone(&exec_state));
        }

        let mgr = Arc::clone(self);
        thread::Builder::new()
            .name("exec-plan-fragment".to_string())
            .spawn(move || mgr.run_exec_plan_fragment(exec_state))
            .map_err(|e| Status::internal(format!("failed to spawn fragment exec thread: {e}")))?;
        Ok(())
    }

    fn run_exec_plan_fragment(&self, exec_state: Arc<FragmentExecState>) {
        self.exec_env.metrics().num_fragments.increment(1);
        if let Err(e) = exec_state.exec() {
            debug!(
                "fragment instance {} finished with error: {}",
                exec_state.fragment_instance_id(),
                e.error_msg()
            );
        }

        // The fragment is finished; drop it from the map.
        let mut fragments = self.fragments.lock().expect("fragment map lock");
        if fragments
            .remove(&exec_state.fragment_instance_id())
            .is_none()
        {
            error!(
                "missing entry in fragment exec state map: instance_id={}",
                exec_state.fragment_instance_id()
            );
        }
    }

    /// Initiates asynchronous cancellation only; the map entry and state are
    /// removed when the exec thread exits.
    pub fn cancel_plan_fragment(&self, params: &CancelPlanFragmentParams) -> Result<()> {
        info!(
            "CancelPlanFragment(): instance_id={}",
            params.fragment_instance_id
        );
        let exec_state = {
            let fragments = self.fragments.lock().expect("fragment map lock");
            fragments.get(&params.fragment_instance_id).cloned()
        };
        match exec_state {
            Some(exec_state) => {
                exec_state.cancel();
                Ok(())
            }
            None => Err(Status::new(
                StatusCode::UnknownFragment,
                format!("unknown fragment id: {}", params.fragment_instance_id),
            )),
        }
    }

    /// Routes a row batch (and/or end-of-stream) to the stream manager.
    pub fn transmit_data(&self, params: TransmitDataParams) -> Result<()> {
        debug!(
            "TransmitData(): instance_id={} node_id={} #rows={} sender_id={} eos={}",
            params.dest_fragment_instance_id,
            params.dest_node_id,
            params.row_batch.num_rows(),
            params.sender_id,
            params.eos
        );
        if params.row_batch.num_rows() > 0 {
            self.exec_env.stream_mgr().add_data(
                params.dest_fragment_instance_id,
                params.dest_node_id,
                params.row_batch,
                params.sender_id,
            )?;
        }
        if params.eos {
            self.exec_env.stream_mgr().close_sender(
                params.dest_fragment_instance_id,
                params.dest_node_id,
                params.sender_id,
            )?;
        }
        Ok(())
    }

    pub fn num_registered_fragments(&self) -> usize {
        self.fragments.lock().expect("fragment map lock").len()
    }
}

/// The four RPC handlers every backend exposes to its coordinators.
pub struct BackendService {
    server: Arc<CoordinatorServer>,
    fragment_mgr: Arc<FragmentMgr>,
}

impl BackendService {
    pub fn new(server: Arc<CoordinatorServer>, fragment_mgr: Arc<FragmentMgr>) -> Self {
        Self {
            server,
            fragment_mgr,
        }
    }

    pub fn exec_plan_fragment(&self, params: ExecPlanFragmentParams) -> Result<()> {
        self.fragment_mgr.exec_plan_fragment(params)
    }

    pub fn report_exec_status(&self, params: &ReportExecStatusParams) -> Result<()> {
        self.server.report_exec_status(params)
    }

    pub fn cancel_plan_fragment(&self, params: &CancelPlanFragmentParams) -> Result<()> {
        self.fragment_mgr.cancel_plan_fragment(params)
    }

    pub fn transmit_data(&self, params: TransmitDataParams) -> Result<()> {
        self.fragment_mgr.transmit_data(params)
    }
}
