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
//! The per-query distributed-execution seam. A coordinator object fans a
//! plan out to backends, aggregates their status reports and assembles
//! result rows; this crate only drives its lifecycle.

use std::sync::Arc;

use crate::common::status::{Result, Status};
use crate::common::types::{NetworkAddress, UniqueId};
use crate::runtime::frontend::{ExecRequest, QueryContext};

/// Fragment completion progress, for archive records.
#[derive(Copy, Clone, Debug, Default)]
pub struct QueryProgress {
    pub num_complete: i64,
    pub total: i64,
}

/// One page of result rows. `eos` marks the final page.
#[derive(Clone, Debug, Default)]
pub struct QueryResultSet {
    pub rows: Vec<Vec<String>>,
    pub eos: bool,
}

/// A status report from one fragment instance, forwarded by the backend
/// service to the owning query's coordinator.
#[derive(Clone, Debug)]
pub struct ReportExecStatusParams {
    pub query_id: UniqueId,
    pub backend_num: i32,
    pub fragment_instance_id: UniqueId,
    pub done: bool,
    pub status: Status,
    pub profile: Option<String>,
}

pub trait QueryCoordinator: Send + Sync {
    /// Starts distributed execution; fragments begin reporting status once
    /// this returns.
    fn exec(&self) -> Result<()>;

    fn get_next(&self, max_rows: usize) -> Result<QueryResultSet>;

    /// Idempotent; the first cause observed by the coordinator wins.
    fn cancel(&self, cause: &Status);

    fn update_fragment_exec_status(&self, params: &ReportExecStatusParams) -> Result<()>;

    /// The distinct backends hosting at least one fragment of this query.
    fn participating_backends(&self) -> Vec<NetworkAddress>;

    fn progress(&self) -> QueryProgress;

    fn exec_summary(&self) -> String;
}

/// Creates one coordinator per distributed statement.
pub trait CoordinatorFactory: Send + Sync {
    fn create(
        &self,
        ctx: &QueryContext,
        request: &ExecRequest,
    ) -> Result<Arc<dyn QueryCoordinator>>;
}
