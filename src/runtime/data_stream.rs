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
//! The inter-fragment row-transport seam. Row batches received by the
//! backend service are handed to the stream manager, addressed by
//! (destination fragment instance, exchange node, sender).

use crate::common::status::Result;
use crate::common::types::UniqueId;

/// An opaque serialized batch of rows in transit between fragments.
#[derive(Clone, Debug, Default)]
pub struct RowBatch {
    pub rows: Vec<Vec<u8>>,
}

impl RowBatch {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

pub trait DataStreamMgr: Send + Sync {
    fn add_data(
        &self,
        dest_fragment_instance_id: UniqueId,
        dest_node_id: i32,
        batch: RowBatch,
        sender_id: i32,
    ) -> Result<()>;

    fn close_sender(
        &self,
        dest_fragment_instance_id: UniqueId,
        dest_node_id: i32,
        sender_id: i32,
    ) -> Result<()>;
}
