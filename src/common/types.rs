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
use std::fmt;

use serde::{Deserialize, Serialize};

/// 128-bit globally unique identifier for sessions, queries and fragment
/// instances. Formats as a UUID so ids printed by different tools line up.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

impl UniqueId {
    /// Generates a fresh random id. Creating ids from thread-local entropy is
    /// cheaper than contending on one shared generator.
    pub fn generate() -> Self {
        Self {
            hi: rand::random::<u64>() as i64,
            lo: rand::random::<u64>() as i64,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    pub fn to_uuid_string(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UniqueId {
    /// UUID grouping: 8-4-4 hex digits from `hi`, 4-12 from `lo`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hi = self.hi as u64;
        let lo = self.lo as u64;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            hi >> 32,
            (hi >> 16) & 0xffff,
            hi & 0xffff,
            lo >> 48,
            lo & 0xffff_ffff_ffff
        )
    }
}

/// A backend endpoint, keyed by hostname and port.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub hostname: String,
    pub port: i32,
}

pub fn make_network_address(hostname: impl Into<String>, port: i32) -> NetworkAddress {
    NetworkAddress {
        hostname: hostname.into(),
        port,
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Milliseconds since the Unix epoch; the clock used for all activity
/// timestamps and expiration arithmetic.
pub fn ms_since_epoch() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
