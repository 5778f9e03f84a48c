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
//! Process-wide execution environment: every external collaborator the
//! lifecycle engine talks to, passed explicitly instead of reached through
//! ambient globals.

use std::sync::Arc;

use crate::common::status::Result;
use crate::common::types::NetworkAddress;
use crate::runtime::coordinator::CoordinatorFactory;
use crate::runtime::data_stream::DataStreamMgr;
use crate::runtime::frontend::{CatalogOpRequest, Frontend};
use crate::runtime::metrics::CoordinatorMetrics;
use crate::service::catalog::CatalogUpdateResult;
use crate::service::fragment_service::ExecPlanFragmentParams;

/// Runs one plan-fragment instance. `cancel` is only ever invoked after
/// `prepare` has returned.
pub trait PlanFragmentExecutor: Send + Sync {
    fn prepare(&self, params: &ExecPlanFragmentParams) -> Result<()>;

    /// Runs the fragment to completion. Blocking; called on the fragment's
    /// dedicated exec thread.
    fn exec(&self) -> Result<()>;

    /// Initiates asynchronous cancellation of a prepared fragment.
    fn cancel(&self);
}

pub trait FragmentExecutorFactory: Send + Sync {
    fn create(&self) -> Arc<dyn PlanFragmentExecutor>;
}

/// Code libraries (UDFs, data sources) cached on local disk. Mutation is
/// thread-safe on the collaborator side.
pub trait LibraryCache: Send + Sync {
    fn set_needs_refresh(&self, location: &str);
    fn remove_entry(&self, location: &str);
    fn drop_cache(&self);
}

/// Cached RPC connections to other coordinators/backends.
pub trait BackendClientCache: Send + Sync {
    fn close_connections(&self, address: &NetworkAddress);
}

/// Executes catalog mutations (DDL) against the catalog service.
pub trait CatalogOpExecutor: Send + Sync {
    fn exec(&self, op: &CatalogOpRequest) -> Result<CatalogUpdateResult>;
}

pub struct ExecEnv {
    frontend: Arc<dyn Frontend>,
    stream_mgr: Arc<dyn DataStreamMgr>,
    coordinator_factory: Arc<dyn CoordinatorFactory>,
    fragment_executor_factory: Arc<dyn FragmentExecutorFactory>,
    lib_cache: Arc<dyn LibraryCache>,
    client_cache: Arc<dyn BackendClientCache>,
    catalog_op_executor: Arc<dyn CatalogOpExecutor>,
    metrics: Arc<CoordinatorMetrics>,
    backend_address: NetworkAddress,
}

impl ExecEnv {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frontend: Arc<dyn Frontend>,
        stream_mgr: Arc<dyn DataStreamMgr>,
        coordinator_factory: Arc<dyn CoordinatorFactory>,
        fragment_executor_factory: Arc<dyn FragmentExecutorFactory>,
        lib_cache: Arc<dyn LibraryCache>,
        client_cache: Arc<dyn BackendClientCache>,
        catalog_op_executor: Arc<dyn CatalogOpExecutor>,
        backend_address: NetworkAddress,
    ) -> Self {
        Self {
            frontend,
            stream_mgr,
            coordinator_factory,
            fragment_executor_factory,
            lib_cache,
            client_cache,
            catalog_op_executor,
            metrics: Arc::new(CoordinatorMetrics::new()),
            backend_address,
        }
    }

    pub fn frontend(&self) -> &Arc<dyn Frontend> {
        &self.frontend
    }

    pub fn stream_mgr(&self) -> &Arc<dyn DataStreamMgr> {
        &self.stream_mgr
    }

    pub fn coordinator_factory(&self) -> &Arc<dyn CoordinatorFactory> {
        &self.coordinator_factory
    }

    pub fn fragment_executor_factory(&self) -> &Arc<dyn FragmentExecutorFactory> {
        &self.fragment_executor_factory
    }

    pub fn lib_cache(&self) -> &Arc<dyn LibraryCache> {
        &self.lib_cache
    }

    pub fn client_cache(&self) -> &Arc<dyn BackendClientCache> {
        &self.client_cache
    }

    pub fn catalog_op_executor(&self) -> &Arc<dyn CatalogOpExecutor> {
        &self.catalog_op_executor
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    pub fn backend_address(&self) -> &NetworkAddress {
        &self.backend_address
    }
}
