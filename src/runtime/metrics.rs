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
use std::sync::atomic::{AtomicI64, Ordering};

/// A single lock-free integer metric, usable as a counter or a gauge.
#[derive(Default)]
pub struct IntMetric(AtomicI64);

impl IntMetric {
    pub fn increment(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide coordinator metrics, shared through the exec environment.
#[derive(Default)]
pub struct CoordinatorMetrics {
    /// Wall-clock start of this coordinator, ms since epoch.
    pub start_time_ms: IntMetric,
    pub num_queries: IntMetric,
    pub num_fragments: IntMetric,
    pub num_open_beeswax_sessions: IntMetric,
    pub num_open_hs2_sessions: IntMetric,
    pub num_sessions_expired: IntMetric,
    pub num_queries_expired: IntMetric,
    pub catalog_num_dbs: IntMetric,
    pub catalog_num_tables: IntMetric,
    /// 1 once a catalog version > 0 has been applied locally.
    pub catalog_ready: IntMetric,
    /// 0 while the server is offline and refusing new queries.
    pub server_ready: IntMetric,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
