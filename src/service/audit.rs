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
//! Audit event records: one JSON object per statement, wrapped by its
//! timestamp key, written through the rotating audit log.

use serde_json::{json, Value};

use crate::common::logging::error;
use crate::common::status::{Result, Status};
use crate::common::types::ms_since_epoch;
use crate::runtime::frontend::{ExecRequest, StmtType};
use crate::runtime::query_exec_state::QueryExecState;
use crate::service::catalog::is_authorization_error;
use crate::service::server::CoordinatorServer;

/// Builds the JSON audit entry for one statement.
pub fn build_audit_record(exec_state: &QueryExecState, request: &ExecRequest) -> String {
    let query_status = exec_state.query_status();
    let impersonator = if exec_state.do_as_user().is_empty() {
        // Without delegation there is no impersonator.
        Value::Null
    } else {
        Value::String(exec_state.connected_user().to_string())
    };
    let statement_type = match (&request.stmt_type, request.catalog_op.as_ref()) {
        (StmtType::Ddl, Some(op)) => op.ddl_type.clone(),
        (stmt_type, _) => stmt_type.to_string(),
    };
    let catalog_objects: Vec<Value> = request
        .access_events
        .iter()
        .map(|event| {
            json!({
                "name": event.name,
                "object_type": event.object_type,
                "privilege": event.privilege,
            })
        })
        .collect();

    // Each log entry is a timestamp mapped to a JSON object.
    let timestamp_key = ms_since_epoch().to_string();
    json!({
        timestamp_key: {
            "query_id": exec_state.query_id().to_string(),
            "session_id": exec_state.session_id().to_string(),
            "start_time": exec_state.start_time_ms().to_string(),
            "authorization_failure": is_authorization_error(&query_status),
            "status": query_status.error_msg(),
            "user": exec_state.effective_user(),
            "impersonator": impersonator,
            "statement_type": statement_type,
            "network_address": exec_state.session().network_address.to_string(),
            "sql_statement": exec_state.sql_stmt().replace('\n', " "),
            "catalog_objects": catalog_objects,
        }
    })
    .to_string()
}

impl CoordinatorServer {
    pub fn is_audit_event_logging_enabled(&self) -> bool {
        self.audit_event_logger.is_some()
    }

    /// Writes one audit entry. A write failure shuts the process down when
    /// the configuration demands it.
    pub(crate) fn log_audit_record(
        &self,
        exec_state: &QueryExecState,
        request: &ExecRequest,
    ) -> Result<()> {
        let Some(logger) = self.audit_event_logger.as_ref() else {
            return Ok(());
        };
        let entry = build_audit_record(exec_state, request);
        if let Err(e) = logger.append_entry(&entry) {
            error!("Unable to record audit event record: {e}");
            if self.config.archive.abort_on_failed_audit_event {
                error!("Shutting down coordinator due to abort_on_failed_audit_event=true");
                std::process::exit(1);
            }
            return Err(Status::internal(format!(
                "Unable to record audit event record: {e}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::build_audit_record;
    use crate::common::query_options::QueryOptions;
    use crate::common::types::{make_network_address, UniqueId};
    use crate::runtime::frontend::{AccessEvent, ExecRequest, QueryContext};
    use crate::runtime::query_exec_state::QueryExecState;
    use crate::runtime::session::{SessionKind, SessionState};

    #[test]
    fn audit_record_fields() {
        let session = Arc::new(SessionState::new(
            UniqueId { hi: 1, lo: 2 },
            SessionKind::HiveServer2,
            make_network_address("client", 40000),
            "root@EXAMPLE",
            QueryOptions::default(),
        ));
        let mut ctx = QueryContext::new(session.session_id, "select *\nfrom t");
        ctx.query_id = UniqueId { hi: 3, lo: 4 };
        ctx.connected_user = "root@EXAMPLE".to_string();
        ctx.do_as_user = "alice".to_string();
        let exec_state = QueryExecState::new(ctx, session);

        let mut request = ExecRequest::query();
        request.access_events.push(AccessEvent {
            name: "functional.t".to_string(),
            object_type: "TABLE".to_string(),
            privilege: "SELECT".to_string(),
        });

        let record = build_audit_record(&exec_state, &request);
        let parsed: serde_json::Value = serde_json::from_str(&record).expect("valid json");
        let (_, entry) = parsed
            .as_object()
            .expect("outer object")
            .iter()
            .next()
            .expect("one entry");
        assert_eq!(entry["user"], "alice");
        assert_eq!(entry["impersonator"], "root@EXAMPLE");
        // Newlines in the statement are flattened to spaces.
        assert_eq!(entry["sql_statement"], "select * from t");
        assert_eq!(entry["authorization_failure"], false);
        assert_eq!(entry["catalog_objects"][0]["privilege"], "SELECT");
    }
}
