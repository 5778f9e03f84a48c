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
//! Query and session lifecycle scenarios against the coordinator.

use std::sync::Arc;

use oryx::common::config::OryxConfig;
use oryx::common::status::{Status, StatusCode};
use oryx::common::types::{ms_since_epoch, UniqueId};
use oryx::runtime::frontend::StmtType;
use oryx::runtime::query_exec_state::QueryPhase;

mod common;
use common::{open_beeswax_session, run_statement, test_server, test_server_with_config};

#[test]
fn select_runs_to_completion_and_is_archived() {
    let (server, env) = test_server();
    let session = open_beeswax_session(&server, "alice");

    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    let query_id = exec_state.query_id();
    assert_eq!(exec_state.phase(), QueryPhase::Running);
    assert!(session.lock().inflight_queries.contains(&query_id));

    let batch = exec_state.fetch_results(100, false).expect("fetch");
    assert_eq!(batch.rows, vec![vec!["1".to_string()]]);
    assert!(batch.eos);
    assert_eq!(exec_state.phase(), QueryPhase::Finished);

    assert!(server.unregister_query(&query_id, None));
    assert!(!session.lock().inflight_queries.contains(&query_id));

    // The archive record captures the terminal snapshot.
    let record = server.archived_query(&query_id).expect("archived record");
    assert_eq!(record.stmt_type, StmtType::Query);
    assert_eq!(record.num_rows_fetched, 1);
    assert!(record.query_status.is_ok());
    assert_eq!(record.phase, QueryPhase::Finished);
    assert!(record.has_coord);

    // Profile and exec-summary retrieval now come from the archive.
    assert!(server.get_query_exec_state(&query_id).is_none());
    let profile = server
        .get_runtime_profile_str(&query_id, false)
        .expect("archived profile");
    assert!(profile.contains(&format!("Query (id={query_id})")));
    let summary = server.get_exec_summary(&query_id).expect("exec summary");
    assert!(!summary.is_empty());
    let _ = env;
}

#[test]
fn cached_results_support_restarted_fetches() {
    let (server, env) = test_server();
    env.coord_factory
        .set_rows(vec![vec!["1".to_string()], vec!["2".to_string()]]);
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    exec_state
        .enable_result_caching(100, 100_000)
        .expect("enable caching");

    let first = exec_state.fetch_results(10, false).expect("fetch");
    assert_eq!(first.rows.len(), 2);
    let replay = exec_state.fetch_results(10, true).expect("restarted fetch");
    assert_eq!(replay.rows, first.rows);
}

#[test]
fn hs2_connections_multiplex_sessions() {
    let (server, _env) = test_server();
    let connection_id = UniqueId::generate();
    let addr = oryx::common::types::make_network_address("client", 40000);
    let s1 = server
        .open_hs2_session(connection_id, addr.clone(), "alice")
        .expect("session 1");
    let s2 = server
        .open_hs2_session(connection_id, addr, "alice")
        .expect("session 2");
    assert_ne!(s1.session_id, s2.session_id);

    // Closing the connection closes every session opened on it.
    server.connection_end(connection_id);
    assert!(server.get_session(&s1.session_id, false).is_err());
    assert!(server.get_session(&s2.session_id, false).is_err());
}

#[test]
fn unregister_is_idempotent() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    let query_id = exec_state.query_id();

    assert!(server.unregister_query(&query_id, None));
    assert!(!server.unregister_query(&query_id, None));
}

#[test]
fn operations_on_unknown_queries_fail_cleanly() {
    let (server, _env) = test_server();
    let missing = UniqueId { hi: 42, lo: 42 };

    let err = server
        .get_runtime_profile_str(&missing, false)
        .expect_err("unknown query");
    assert_eq!(err.code(), StatusCode::UnknownQuery);
    assert_eq!(err.error_msg(), format!("Query id {missing} not found."));

    let err = server.cancel_internal(&missing, None).expect_err("unknown");
    assert_eq!(err.code(), StatusCode::UnknownQuery);
}

#[test]
fn planning_failure_unregisters_the_query() {
    let (server, env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    *env.frontend.plan_failure.lock().expect("plan failure lock") = Some(Status::new(
        StatusCode::PlanningError,
        "AnalysisException: table not found",
    ));

    let err = run_statement(&server, &session, "select * from nope").expect_err("plan error");
    assert_eq!(err.code(), StatusCode::PlanningError);
    assert_eq!(server.num_registered_queries(), 0);
    assert!(session.lock().inflight_queries.is_empty());
}

#[test]
fn close_session_cancels_inflight_queries() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    let query_id = exec_state.query_id();

    server
        .close_session(&session.session_id, false)
        .expect("close session");

    assert!(server.get_query_exec_state(&query_id).is_none());
    let status = exec_state.query_status();
    assert_eq!(status.error_msg(), "Session closed");

    // New requests on the closed session are refused.
    let err = server
        .get_session(&session.session_id, true)
        .expect_err("closed");
    assert_eq!(err.code(), StatusCode::SessionClosed);
}

#[test]
fn connection_end_closes_all_its_sessions() {
    let (server, _env) = test_server();
    let connection_id = UniqueId::generate();
    let session = server
        .connection_start(
            connection_id,
            oryx::common::types::make_network_address("client", 40000),
            "alice",
        )
        .expect("session");

    server.connection_end(connection_id);
    assert!(server.get_session(&session.session_id, false).is_err());
}

#[test]
fn registering_on_a_closed_session_is_refused() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    // Check the session out like a protocol handler, then lose the race
    // with a concurrent close.
    let checked_out = server
        .get_session(&session.session_id, true)
        .expect("checkout");
    server
        .close_session(&session.session_id, false)
        .expect("close");

    let mut ctx = common::make_query_ctx(&checked_out, "select 1");
    let err = server
        .execute(&mut ctx, Arc::clone(&checked_out))
        .expect_err("closed session");
    assert_eq!(err.code(), StatusCode::SessionClosed);
    assert!(err.error_msg().contains("Session has been closed"));
    server.mark_session_inactive(&checked_out);
}

#[test]
fn idle_sessions_expire_and_cascade() {
    let mut config = OryxConfig::default();
    config.lifecycle.idle_session_timeout = 5;
    let (server, _env) = test_server_with_config(config);
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    let query_id = exec_state.query_id();

    // Not yet idle long enough: nothing happens.
    server.expire_sessions_pass(ms_since_epoch());
    assert!(!session.lock().expired);

    // Pretend more than the timeout has elapsed since the last activity.
    server.expire_sessions_pass(ms_since_epoch() + 6_000);
    assert!(session.lock().expired);
    server.drain_cancellation_pool();

    // The cascade unregistered the in-flight query with the idle cause.
    assert!(server.get_query_exec_state(&query_id).is_none());
    assert_eq!(
        exec_state.query_status().error_msg(),
        "Session expired due to inactivity"
    );

    // The expired session refuses further requests with the diagnostic.
    let err = server
        .get_session(&session.session_id, true)
        .expect_err("expired");
    assert_eq!(err.code(), StatusCode::SessionExpired);
    assert!(err
        .error_msg()
        .contains("expired due to more than 5s of inactivity"));
}

#[test]
fn idle_queries_expire_with_their_timeout_in_the_cause() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let checked_out = server
        .get_session(&session.session_id, true)
        .expect("checkout");
    let mut ctx = common::make_query_ctx(&checked_out, "select 1");
    ctx.query_options.query_timeout_s = 2;
    let exec_state = server
        .execute(&mut ctx, Arc::clone(&checked_out))
        .expect("execute");
    server.mark_session_inactive(&checked_out);
    let query_id = exec_state.query_id();

    // Within the timeout nothing expires.
    server.expire_queries_pass(ms_since_epoch());
    assert_eq!(exec_state.phase(), QueryPhase::Running);

    // Three seconds later with no client activity the query is cancelled.
    server.expire_queries_pass(ms_since_epoch() + 3_000);
    server.drain_cancellation_pool();

    assert_eq!(exec_state.phase(), QueryPhase::Cancelled);
    let status = exec_state.query_status();
    assert_eq!(
        status.error_msg(),
        format!("Query {query_id} expired due to client inactivity (timeout is 2s000ms)")
    );
    // Cancelled but still registered; a later fetch observes the cause.
    assert!(server.get_query_exec_state(&query_id).is_some());
}

#[test]
fn client_activity_pushes_expiration_forward() {
    let (server, env) = test_server();
    env.coord_factory
        .set_rows(vec![vec!["1".to_string()], vec!["2".to_string()]]);
    let session = open_beeswax_session(&server, "alice");
    let checked_out = server
        .get_session(&session.session_id, true)
        .expect("checkout");
    let mut ctx = common::make_query_ctx(&checked_out, "select 1");
    ctx.query_options.query_timeout_s = 2;
    let t0 = ms_since_epoch();
    let exec_state = server
        .execute(&mut ctx, Arc::clone(&checked_out))
        .expect("execute");
    server.mark_session_inactive(&checked_out);

    // A later partial fetch refreshes the activity timestamp, so a pass
    // shortly after the originally recorded deadline finds the entry stale,
    // repairs it in place and does not cancel.
    std::thread::sleep(std::time::Duration::from_millis(1_200));
    let _ = exec_state.fetch_results(1, false).expect("fetch");
    server.expire_queries_pass(t0 + 2_500);
    server.drain_cancellation_pool();
    assert_ne!(exec_state.phase(), QueryPhase::Cancelled);

    // Once the corrected deadline passes too, the query expires.
    server.expire_queries_pass(t0 + 10_000);
    server.drain_cancellation_pool();
    assert_eq!(exec_state.phase(), QueryPhase::Cancelled);
}

#[test]
fn explain_statements_answer_locally() {
    let (server, env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "explain select 1").expect("execute");

    let batch = exec_state.fetch_results(100, false).expect("fetch");
    assert_eq!(batch.rows.len(), 2);
    assert!(batch.eos);
    assert_eq!(exec_state.phase(), QueryPhase::Finished);
    // No distributed execution was started.
    assert!(env.coord_factory.last_created().is_none());
}

#[test]
fn ddl_applies_the_catalog_update() {
    let (server, env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "create table t (c int)").expect("ddl");
    assert_eq!(exec_state.phase(), QueryPhase::Finished);

    // The direct-object fast path applied the update locally.
    let requests = env.frontend.update_requests.lock().expect("requests");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].updated_objects.len(), 1);
}

#[test]
fn offline_coordinator_refuses_new_queries() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    server.set_offline(true);
    let err = run_statement(&server, &session, "select 1").expect_err("offline");
    assert!(err.error_msg().contains("offline"));
    server.set_offline(false);
    assert!(run_statement(&server, &session, "select 1").is_ok());
}

#[test]
fn proxy_user_delegation_end_to_end() {
    let mut config = OryxConfig::default();
    config.security.authorized_proxy_user_config = "root=alice,bob; svc=*".to_string();
    let (server, _env) = test_server_with_config(config);

    assert!(server.authorize_proxy_user("root@EXAMPLE", "alice").is_ok());
    assert!(server.authorize_proxy_user("svc", "anyone").is_ok());
    let err = server
        .authorize_proxy_user("root/host@EXAMPLE", "carol")
        .expect_err("not allowed");
    assert_eq!(err.code(), StatusCode::Authorization);
    assert!(err
        .error_msg()
        .contains("not authorized to delegate to 'carol'"));
}

#[test]
fn invalid_default_query_options_fail_startup() {
    let mut config = OryxConfig::default();
    config.lifecycle.default_query_options = "bogus_option=1".to_string();
    let env = common::test_env();
    let err = oryx::CoordinatorServer::new(Arc::clone(&env.exec_env), config)
        .err()
        .expect("startup failure");
    assert_eq!(err.code(), StatusCode::InvalidOption);
    assert!(err.error_msg().contains("Invalid default query options"));
}

#[test]
fn default_configs_include_start_over_marker() {
    let mut config = OryxConfig::default();
    config.lifecycle.default_query_options = "explain_level=verbose".to_string();
    let (server, _env) = test_server_with_config(config);
    assert_eq!(server.default_query_options().explain_level as i32, 3);
    assert!(server
        .default_configs()
        .iter()
        .any(|(k, v)| k == "support_start_over" && v == "false"));
}

#[test]
fn session_id_is_recoverable_from_query_id() {
    let (server, _env) = test_server();
    let session = open_beeswax_session(&server, "alice");
    let exec_state = run_statement(&server, &session, "select 1").expect("execute");
    assert_eq!(
        server.get_session_id_for_query(&exec_state.query_id()),
        Some(session.session_id)
    );
    server.unregister_query(&exec_state.query_id(), None);
    assert_eq!(server.get_session_id_for_query(&exec_state.query_id()), None);
}

#[test]
fn archive_capacity_evicts_oldest_records() {
    let mut config = OryxConfig::default();
    config.archive.query_log_size = 2;
    let (server, _env) = test_server_with_config(config);
    let session = open_beeswax_session(&server, "alice");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let exec_state = run_statement(&server, &session, "select 1").expect("execute");
        ids.push(exec_state.query_id());
        server.unregister_query(&exec_state.query_id(), None);
    }

    assert_eq!(server.num_archived_queries(), 2);
    assert!(server.archived_query(&ids[0]).is_none());
    assert!(server.archived_query(&ids[1]).is_some());
    assert!(server.archived_query(&ids[2]).is_some());
}
