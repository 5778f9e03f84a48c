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
//! The backend fragment-executor endpoint.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use oryx::common::query_options::QueryOptions;
use oryx::common::status::{Status, StatusCode};
use oryx::common::types::{make_network_address, UniqueId};
use oryx::runtime::coordinator::ReportExecStatusParams;
use oryx::runtime::data_stream::RowBatch;
use oryx::service::fragment_service::{
    CancelPlanFragmentParams, ExecPlanFragmentParams, FragmentInstanceCtx, FragmentPlan,
    OutputSink, TransmitDataParams,
};
use oryx::{BackendService, FragmentMgr};

mod common;
use common::{open_beeswax_session, run_statement, test_server};

fn exec_params(instance_lo: i64, with_sink: bool) -> ExecPlanFragmentParams {
    ExecPlanFragmentParams {
        fragment: FragmentPlan {
            plan_desc: "00:SCAN".to_string(),
            output_sink: with_sink.then(|| OutputSink {
                sink_type: "EXCHANGE".to_string(),
            }),
        },
        instance_ctx: FragmentInstanceCtx {
            query_id: UniqueId { hi: 1, lo: 1 },
            fragment_instance_id: UniqueId {
                hi: 1,
                lo: instance_lo,
            },
            backend_num: 0,
            coord_address: make_network_address("coordinator-1", 22000),
        },
        query_options: QueryOptions::default(),
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn fragment_without_sink_is_rejected() {
    let (_server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());
    let err = mgr
        .exec_plan_fragment(exec_params(1, false))
        .expect_err("no sink");
    assert_eq!(err.error_msg(), "missing sink in plan fragment");
    assert_eq!(mgr.num_registered_fragments(), 0);
}

#[test]
fn fragment_runs_on_its_own_thread_and_unregisters_on_exit() {
    let (_server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());

    mgr.exec_plan_fragment(exec_params(2, true)).expect("exec");
    assert_eq!(mgr.num_registered_fragments(), 1);
    let executor = env.fragment_factory.last_created().expect("executor");
    assert!(executor.prepared.load(Ordering::SeqCst));

    // The exec thread is parked inside the executor; let it finish.
    executor.release();
    assert!(wait_until(Duration::from_secs(5), || {
        mgr.num_registered_fragments() == 0
    }));
}

#[test]
fn cancel_reaches_a_prepared_fragment_only() {
    let (_server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());

    mgr.exec_plan_fragment(exec_params(3, true)).expect("exec");
    let executor = env.fragment_factory.last_created().expect("executor");

    // Cancellation is asynchronous: it flips the executor and the exec
    // thread exits, removing the map entry.
    mgr.cancel_plan_fragment(&CancelPlanFragmentParams {
        fragment_instance_id: UniqueId { hi: 1, lo: 3 },
    })
    .expect("cancel");
    assert!(executor.cancelled.load(Ordering::SeqCst));
    assert!(wait_until(Duration::from_secs(5), || {
        mgr.num_registered_fragments() == 0
    }));
}

#[test]
fn cancelling_an_unknown_fragment_is_an_error() {
    let (_server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());
    let err = mgr
        .cancel_plan_fragment(&CancelPlanFragmentParams {
            fragment_instance_id: UniqueId { hi: 9, lo: 9 },
        })
        .expect_err("unknown fragment");
    assert_eq!(err.code(), StatusCode::UnknownFragment);
    assert!(err.error_msg().contains("unknown fragment id"));
}

#[test]
fn prepare_failure_returns_synchronously_without_registering() {
    let (_server, env) = test_server();
    env.fragment_factory.fail_prepare.store(true, Ordering::SeqCst);
    let mgr = FragmentMgr::new(env.exec_env.clone());
    let err = mgr
        .exec_plan_fragment(exec_params(4, true))
        .expect_err("prepare fails");
    assert!(err.error_msg().contains("injected prepare failure"));
    assert_eq!(mgr.num_registered_fragments(), 0);
}

#[test]
fn transmit_data_routes_rows_and_eos() {
    let (_server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());
    let dest = UniqueId { hi: 5, lo: 5 };

    mgr.transmit_data(TransmitDataParams {
        dest_fragment_instance_id: dest,
        dest_node_id: 2,
        sender_id: 7,
        eos: false,
        row_batch: RowBatch {
            rows: vec![vec![1u8], vec![2u8]],
        },
    })
    .expect("transmit rows");
    mgr.transmit_data(TransmitDataParams {
        dest_fragment_instance_id: dest,
        dest_node_id: 2,
        sender_id: 7,
        eos: true,
        row_batch: RowBatch::default(),
    })
    .expect("transmit eos");

    let batches = env.stream_mgr.batches.lock().expect("batches");
    assert_eq!(batches.as_slice(), &[(dest, 2, 7, 2)]);
    let closed = env.stream_mgr.closed_senders.lock().expect("closed");
    assert_eq!(closed.as_slice(), &[(dest, 2, 7)]);
}

#[test]
fn status_reports_reach_the_query_coordinator() {
    let (server, env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");

    let mgr = FragmentMgr::new(env.exec_env.clone());
    let backend = BackendService::new(server.clone(), mgr);

    backend
        .report_exec_status(&ReportExecStatusParams {
            query_id: exec_state.query_id(),
            backend_num: 0,
            fragment_instance_id: UniqueId { hi: 1, lo: 6 },
            done: false,
            status: Status::ok(),
            profile: None,
        })
        .expect("report");
    let coordinator = env.coord_factory.last_created().expect("coordinator");
    assert_eq!(coordinator.reports.lock().expect("reports").len(), 1);
}

#[test]
fn status_reports_for_unknown_queries_get_a_diagnostic() {
    let (server, env) = test_server();
    let mgr = FragmentMgr::new(env.exec_env.clone());
    let backend = BackendService::new(server.clone(), mgr);

    let err = backend
        .report_exec_status(&ReportExecStatusParams {
            query_id: UniqueId { hi: 8, lo: 8 },
            backend_num: 1,
            fragment_instance_id: UniqueId { hi: 8, lo: 9 },
            done: true,
            status: Status::ok(),
            profile: None,
        })
        .expect_err("unknown query");
    assert_eq!(err.code(), StatusCode::InternalError);
    assert!(err
        .error_msg()
        .contains("Received report for unknown query ID"));
}
