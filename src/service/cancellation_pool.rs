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
//! Worker pool for cancellations offloaded from callback threads.
//!
//! The queue bound is deliberately far above anything a heartbeat can
//! produce, so producers never block. When a batch would overflow anyway the
//! producer drops it; the next heartbeat or sweep pass regenerates the work.

use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::service::server::CoordinatorServer;

pub const MAX_CANCELLATION_QUEUE_SIZE: usize = 65_536;

/// One offloaded teardown. `unregister` additionally tears the query down
/// and archives it; plain cancellation leaves it registered.
#[derive(Clone, Debug)]
pub struct CancellationWork {
    pub query_id: UniqueId,
    pub cause: Status,
    pub unregister: bool,
}

impl CancellationWork {
    pub fn cancel(query_id: UniqueId, cause: Status) -> Self {
        Self {
            query_id,
            cause,
            unregister: false,
        }
    }

    pub fn unregister(query_id: UniqueId, cause: Status) -> Self {
        Self {
            query_id,
            cause,
            unregister: true,
        }
    }
}

pub struct CancellationPool {
    pool: ThreadPool,
    capacity: usize,
}

impl CancellationPool {
    pub fn new(num_threads: usize, capacity: usize) -> Self {
        Self {
            pool: ThreadPool::with_name("cancellation-worker".to_string(), num_threads.max(1)),
            capacity,
        }
    }

    pub fn queue_size(&self) -> usize {
        self.pool.queued_count()
    }

    /// True when `additional` more items still fit under the queue bound.
    pub fn has_capacity_for(&self, additional: usize) -> bool {
        self.pool.queued_count() + additional <= self.capacity
    }

    /// Hands one work item to the pool. Never blocks; returns false when the
    /// queue bound would be exceeded and the item was dropped.
    pub fn offer(&self, server: &Arc<CoordinatorServer>, work: CancellationWork) -> bool {
        if !self.has_capacity_for(1) {
            return false;
        }
        let server = Arc::clone(server);
        self.pool.execute(move || server.cancel_from_pool(work));
        true
    }

    /// Blocks until queued work has drained; only the tests need this.
    pub fn join(&self) {
        self.pool.join();
    }
}
