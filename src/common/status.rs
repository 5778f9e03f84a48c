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

/// Status codes carried across every module boundary. Statuses are values;
/// nothing in the lifecycle engine panics across a boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InternalError,
    MemLimitExceeded,
    SessionClosed,
    SessionExpired,
    UnknownQuery,
    UnknownFragment,
    InvalidOption,
    Authorization,
    PlanningError,
    ExecutionError,
}

/// An operation outcome: a code plus a list of error messages. The first
/// message is the primary cause; later ones are appended detail. An OK
/// status carries no messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    code: StatusCode,
    error_msgs: Vec<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }

    pub fn new(code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, msg)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn add_error_msg(&mut self, msg: impl Into<String>) {
        self.error_msgs.push(msg.into());
    }

    pub fn error_msgs(&self) -> &[String] {
        &self.error_msgs
    }

    /// The joined error text; empty for an OK status.
    pub fn error_msg(&self) -> String {
        self.error_msgs.join("\n")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "OK")
        } else {
            write!(f, "{:?}: {}", self.code, self.error_msg())
        }
    }
}

impl std::error::Error for Status {}

pub type Result<T> = std::result::Result<T, Status>;
