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
//! Membership topic reconciliation: queries with fragments on a backend
//! that fell out of the membership set are enqueued for cancellation. The
//! callback runs on the bus thread, so every cancellation is offloaded to
//! the worker pool and nothing here issues RPCs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::common::logging::{debug, warn};
use crate::common::status::Status;
use crate::common::types::{NetworkAddress, UniqueId};
use crate::service::cancellation_pool::CancellationWork;
use crate::service::server::CoordinatorServer;
use crate::service::subscription::{BackendDescriptor, TopicDelta, TopicDeltaMap, MEMBERSHIP_TOPIC};

fn should_log_queue_full() -> bool {
    static FULL_PASSES: AtomicU64 = AtomicU64::new(0);
    FULL_PASSES.fetch_add(1, Ordering::Relaxed) % 60 == 0
}

impl CoordinatorServer {
    /// Bus callback for the membership topic.
    pub fn membership_callback(
        self: &Arc<Self>,
        incoming_topic_deltas: &TopicDeltaMap,
        _subscriber_topic_updates: &mut Vec<TopicDelta>,
    ) {
        let Some(delta) = incoming_topic_deltas.get(MEMBERSHIP_TOPIC) else {
            return;
        };

        let current_membership: HashSet<NetworkAddress> = {
            let mut known = self.known_backends.lock().expect("known backends lock");
            // A non-delta update carries the entire topic; forget everything
            // saved before applying it.
            if !delta.is_delta {
                known.clear();
            }
            for item in &delta.topic_entries {
                let descriptor: BackendDescriptor = match serde_json::from_slice(&item.value) {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        debug!("Error deserializing topic item with key {}: {e}", item.key);
                        continue;
                    }
                };
                known.insert(item.key.clone(), descriptor.address);
            }
            for backend_id in &delta.topic_deletions {
                known.remove(backend_id);
            }
            known.values().cloned().collect()
        };

        // Queries running on hosts that vanished from the membership set,
        // keyed by query with the full list of failed hosts as the cause.
        let mut queries_to_cancel: BTreeMap<UniqueId, Vec<NetworkAddress>> = BTreeMap::new();
        {
            let mut locations = self.query_locations.lock().expect("query locations lock");
            locations.retain(|address, query_ids| {
                if current_membership.contains(address) {
                    return true;
                }
                for query_id in query_ids.iter() {
                    queries_to_cancel
                        .entry(*query_id)
                        .or_default()
                        .push(address.clone());
                }
                self.exec_env.client_cache().close_connections(address);
                false
            });
        }

        if queries_to_cancel.is_empty() {
            return;
        }
        if !self
            .cancellation_pool
            .has_capacity_for(queries_to_cancel.len())
        {
            // Skip this batch; the next heartbeat reproduces the set.
            if should_log_queue_full() {
                warn!("Cancellation queue is full");
            }
            return;
        }
        for (query_id, failed_hosts) in queries_to_cancel {
            let hosts = failed_hosts
                .iter()
                .map(|address| address.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let cause =
                Status::cancelled(format!("Cancelled due to unreachable impalad(s): {hosts}"));
            self.cancellation_pool
                .offer(self, CancellationWork::cancel(query_id, cause));
        }
    }
}
