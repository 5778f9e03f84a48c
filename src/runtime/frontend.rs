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
//! The planner seam. The SQL frontend parses, analyzes and plans statements
//! out of process scope; the coordinator only sees the typed request and the
//! resulting execution request.

use std::fmt;

use crate::common::query_options::QueryOptions;
use crate::common::status::Result;
use crate::common::types::{NetworkAddress, UniqueId};
use crate::service::catalog::{
    CatalogObject, UpdateCatalogCacheRequest, UpdateCatalogCacheResponse,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StmtType {
    Query,
    Dml,
    Ddl,
    Explain,
}

impl fmt::Display for StmtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StmtType::Query => "QUERY",
            StmtType::Dml => "DML",
            StmtType::Ddl => "DDL",
            StmtType::Explain => "EXPLAIN",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct ColumnDesc {
    pub name: String,
    pub col_type: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResultSetMetadata {
    pub columns: Vec<ColumnDesc>,
}

/// A catalog object touched by a statement, recorded for audit logging.
#[derive(Clone, Debug)]
pub struct AccessEvent {
    pub name: String,
    pub object_type: String,
    pub privilege: String,
}

/// The catalog mutation a DDL statement performs, executed by the external
/// catalog-operation executor.
#[derive(Clone, Debug)]
pub struct CatalogOpRequest {
    pub ddl_type: String,
}

/// Everything the coordinator knows about one accepted statement before
/// planning: identity, principal, text and effective options.
#[derive(Clone, Debug)]
pub struct QueryContext {
    pub query_id: UniqueId,
    pub session_id: UniqueId,
    pub sql_stmt: String,
    pub pid: u32,
    pub now_string: String,
    pub coord_address: NetworkAddress,
    pub connected_user: String,
    pub do_as_user: String,
    pub default_db: String,
    pub query_options: QueryOptions,
}

impl QueryContext {
    pub fn new(session_id: UniqueId, sql_stmt: impl Into<String>) -> Self {
        Self {
            query_id: UniqueId::default(),
            session_id,
            sql_stmt: sql_stmt.into(),
            pid: 0,
            now_string: String::new(),
            coord_address: NetworkAddress::default(),
            connected_user: String::new(),
            do_as_user: String::new(),
            default_db: "default".to_string(),
            query_options: QueryOptions::default(),
        }
    }

    pub fn effective_user(&self) -> &str {
        if self.do_as_user.is_empty() {
            &self.connected_user
        } else {
            &self.do_as_user
        }
    }
}

/// The planner's answer: what kind of statement this is and what is needed
/// to run it.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub stmt_type: StmtType,
    /// Pretty-printed plan, recorded on the query profile.
    pub plan: String,
    pub result_set_metadata: Option<ResultSetMetadata>,
    pub catalog_op: Option<CatalogOpRequest>,
    pub access_events: Vec<AccessEvent>,
}

impl ExecRequest {
    pub fn query() -> Self {
        Self {
            stmt_type: StmtType::Query,
            plan: String::new(),
            result_set_metadata: None,
            catalog_op: None,
            access_events: Vec::new(),
        }
    }
}

pub trait Frontend: Send + Sync {
    /// Sanity-checks frontend-side configuration at startup.
    fn validate_settings(&self) -> Result<()>;

    /// Plans one statement.
    fn get_exec_request(&self, ctx: &QueryContext) -> Result<ExecRequest>;

    /// Applies a catalog topic delta to the local catalog cache.
    fn update_catalog_cache(
        &self,
        req: &UpdateCatalogCacheRequest,
    ) -> Result<UpdateCatalogCacheResponse>;

    /// Resolves the full metadata of a catalog object from its key form.
    fn get_catalog_object(&self, object: &CatalogObject) -> Result<CatalogObject>;

    fn get_db_names(&self) -> Result<Vec<String>>;

    fn get_table_names(&self, db: &str) -> Result<Vec<String>>;
}
