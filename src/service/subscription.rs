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
//! Topic deltas delivered by the cluster membership/metadata bus. The bus
//! invokes the coordinator's callbacks once per heartbeat with the deltas of
//! every subscribed topic; a callback may push a delta with `from_version`
//! of 0 to request a full resubscribe.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::types::NetworkAddress;

pub const MEMBERSHIP_TOPIC: &str = "impala-membership";
pub const CATALOG_UPDATE_TOPIC: &str = "catalog-update";

#[derive(Clone, Debug)]
pub struct TopicItem {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct TopicDelta {
    pub topic_name: String,
    /// False means the update carries the entire topic; saved state must be
    /// cleared before applying it.
    pub is_delta: bool,
    pub from_version: Option<i64>,
    pub to_version: i64,
    pub min_subscriber_topic_version: i64,
    pub topic_entries: Vec<TopicItem>,
    pub topic_deletions: Vec<String>,
}

impl TopicDelta {
    /// A subscriber-originated request for the full topic contents.
    pub fn full_resubscribe(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            is_delta: false,
            from_version: Some(0),
            ..Default::default()
        }
    }
}

pub type TopicDeltaMap = HashMap<String, TopicDelta>;

/// Payload of one membership topic entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub address: NetworkAddress,
}
