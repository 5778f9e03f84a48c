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
//! Catalog topic reconciliation and the versioned wait-until-propagated
//! barrier DDL relies on.

use serde::{Deserialize, Serialize};

use crate::common::logging::{error, info};
use crate::common::status::{Result, Status, StatusCode};
use crate::common::types::UniqueId;
use crate::service::server::CoordinatorServer;
use crate::service::subscription::{TopicDelta, TopicDeltaMap, CATALOG_UPDATE_TOPIC};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CatalogObjectType {
    Catalog,
    Database,
    Table,
    View,
    Function,
    DataSource,
}

impl CatalogObjectType {
    fn from_key_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "CATALOG" => Some(Self::Catalog),
            "DATABASE" => Some(Self::Database),
            "TABLE" => Some(Self::Table),
            "VIEW" => Some(Self::View),
            "FUNCTION" => Some(Self::Function),
            "DATA_SOURCE" => Some(Self::DataSource),
            _ => None,
        }
    }
}

/// One catalog object as carried on the catalog topic. Functions and data
/// sources name the library location backing them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogObject {
    pub object_type: CatalogObjectType,
    pub name: String,
    pub catalog_version: i64,
    #[serde(default)]
    pub catalog_service_id: Option<UniqueId>,
    #[serde(default)]
    pub library_location: Option<String>,
}

impl CatalogObject {
    /// Reconstructs the object identity from a topic deletion key of the
    /// form `<TYPE>:<name>`. Deletions only carry keys.
    pub fn from_entry_key(key: &str) -> Result<Self> {
        let (prefix, name) = key.split_once(':').ok_or_else(|| {
            Status::internal(format!("invalid catalog topic entry key: {key}"))
        })?;
        let object_type = CatalogObjectType::from_key_prefix(prefix).ok_or_else(|| {
            Status::internal(format!("unknown catalog object type in key: {key}"))
        })?;
        Ok(Self {
            object_type,
            name: name.to_string(),
            catalog_version: 0,
            catalog_service_id: None,
            library_location: None,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct UpdateCatalogCacheRequest {
    pub is_delta: bool,
    pub catalog_service_id: Option<UniqueId>,
    pub updated_objects: Vec<CatalogObject>,
    pub removed_objects: Vec<CatalogObject>,
}

#[derive(Clone, Debug)]
pub struct UpdateCatalogCacheResponse {
    pub catalog_service_id: UniqueId,
}

/// Outcome of a catalog mutation executed by the catalog service; the
/// version the issuing coordinator must observe before the DDL returns.
#[derive(Clone, Debug)]
pub struct CatalogUpdateResult {
    pub catalog_service_id: UniqueId,
    pub version: i64,
    pub updated_catalog_object: Option<CatalogObject>,
    pub removed_catalog_object: Option<CatalogObject>,
}

/// The versions this coordinator has applied locally, guarded by one mutex
/// and signalled through one condition variable.
#[derive(Clone, Debug, Default)]
pub struct CatalogUpdateInfo {
    pub catalog_version: i64,
    pub catalog_topic_version: i64,
    pub catalog_service_id: UniqueId,
    pub min_subscriber_catalog_topic_version: i64,
}

impl CoordinatorServer {
    /// Bus callback for the catalog topic. Applies the delta to the local
    /// catalog cache, advances the version barrier and keeps the library
    /// cache in step with dropped functions and data sources. Never
    /// propagates errors to the bus.
    pub fn catalog_update_callback(
        &self,
        incoming_topic_deltas: &TopicDeltaMap,
        subscriber_topic_updates: &mut Vec<TopicDelta>,
    ) {
        let Some(delta) = incoming_topic_deltas.get(CATALOG_UPDATE_TOPIC) else {
            return;
        };

        if !delta.topic_entries.is_empty() || !delta.topic_deletions.is_empty() {
            let mut update_req = UpdateCatalogCacheRequest {
                is_delta: delta.is_delta,
                ..Default::default()
            };
            // Apply all new and modified objects and work out what the new
            // catalog version will be.
            let mut new_catalog_version = self
                .catalog_update_info
                .lock()
                .expect("catalog version lock")
                .catalog_version;
            for item in &delta.topic_entries {
                let object: CatalogObject = match serde_json::from_slice(&item.value) {
                    Ok(object) => object,
                    Err(e) => {
                        error!("Error deserializing catalog topic item {}: {e}", item.key);
                        continue;
                    }
                };
                if object.object_type == CatalogObjectType::Catalog {
                    update_req.catalog_service_id = object.catalog_service_id;
                    new_catalog_version = object.catalog_version;
                }
                if matches!(
                    object.object_type,
                    CatalogObjectType::Function | CatalogObjectType::DataSource
                ) {
                    if let Some(location) = object.library_location.as_deref() {
                        self.exec_env.lib_cache().set_needs_refresh(location);
                    }
                }
                update_req.updated_objects.push(object);
            }

            // Deletions only carry keys; resolve each against the local
            // frontend so dropped functions/data sources can be evicted from
            // the library cache after the update lands.
            let mut dropped_objects = Vec::new();
            for key in &delta.topic_deletions {
                info!("Catalog topic entry deletion: {key}");
                let object = match CatalogObject::from_entry_key(key) {
                    Ok(object) => object,
                    Err(e) => {
                        error!(
                            "Error parsing catalog topic entry deletion key: {key} Error: {}",
                            e.error_msg()
                        );
                        continue;
                    }
                };
                let is_library_object = matches!(
                    object.object_type,
                    CatalogObjectType::Function | CatalogObjectType::DataSource
                );
                update_req.removed_objects.push(object.clone());
                if is_library_object {
                    if let Ok(dropped) = self.exec_env.frontend().get_catalog_object(&object) {
                        // The object may have been dropped and re-created
                        // within this epoch; only evict when the resolved
                        // version is covered by this heartbeat.
                        if dropped.catalog_version <= new_catalog_version {
                            dropped_objects.push(dropped);
                        }
                    }
                }
            }

            match self.exec_env.frontend().update_catalog_cache(&update_req) {
                Err(e) => {
                    error!(
                        "There was an error processing the catalog update. Requesting a full \
                         topic update to recover: {}",
                        e.error_msg()
                    );
                    subscriber_topic_updates
                        .push(TopicDelta::full_resubscribe(CATALOG_UPDATE_TOPIC));
                    self.exec_env.metrics().catalog_ready.update(0);
                    // Every cached library may now be stale.
                    self.exec_env.lib_cache().drop_cache();
                }
                Ok(resp) => {
                    {
                        let mut info = self
                            .catalog_update_info
                            .lock()
                            .expect("catalog version lock");
                        info.catalog_version = new_catalog_version;
                        info.catalog_topic_version = delta.to_version;
                        info.catalog_service_id = resp.catalog_service_id;
                    }
                    self.exec_env
                        .metrics()
                        .catalog_ready
                        .update((new_catalog_version > 0) as i64);
                    if let Err(e) = self.update_catalog_metrics() {
                        error!("Couldn't update catalog metrics: {}", e.error_msg());
                    }
                    for object in &dropped_objects {
                        if let Some(location) = object.library_location.as_deref() {
                            self.exec_env.lib_cache().remove_entry(location);
                        }
                    }
                }
            }
        }

        // Always advance the minimum subscriber version for the topic.
        {
            let mut info = self
                .catalog_update_info
                .lock()
                .expect("catalog version lock");
            info.min_subscriber_catalog_topic_version = delta.min_subscriber_topic_version;
        }
        self.catalog_version_cv.notify_all();
    }

    /// Blocks the calling DDL until its catalog update has been applied
    /// locally under the issuing catalog service, and optionally until every
    /// subscriber has seen it. A change of catalog service id aborts the
    /// wait with OK.
    pub fn process_catalog_update_result(
        &self,
        result: &CatalogUpdateResult,
        wait_for_all_subscribers: bool,
    ) -> Result<()> {
        let has_direct_object = result.updated_catalog_object.is_some()
            || result.removed_catalog_object.is_some();
        if has_direct_object && !wait_for_all_subscribers {
            // Fast path: apply the object directly to the local cache.
            let mut update_req = UpdateCatalogCacheRequest {
                is_delta: true,
                catalog_service_id: Some(result.catalog_service_id),
                ..Default::default()
            };
            if let Some(object) = result.updated_catalog_object.clone() {
                update_req.updated_objects.push(object);
            }
            if let Some(object) = result.removed_catalog_object.clone() {
                update_req.removed_objects.push(object);
            }
            if let Err(e) = self.exec_env.frontend().update_catalog_cache(&update_req) {
                error!("{}", e.error_msg());
                return Err(e);
            }
            return Ok(());
        }

        let mut info = self
            .catalog_update_info
            .lock()
            .expect("catalog version lock");
        info!(
            "Waiting for catalog version: {} current version: {}",
            result.version, info.catalog_version
        );
        while info.catalog_version < result.version
            && info.catalog_service_id == result.catalog_service_id
        {
            info = self
                .catalog_version_cv
                .wait(info)
                .expect("catalog version wait");
        }

        if !wait_for_all_subscribers {
            return Ok(());
        }

        // The update has been applied locally (or the catalog service
        // restarted); now wait for it to reach every topic subscriber.
        let min_req_subscriber_topic_version = info.catalog_topic_version;
        info!(
            "Waiting for min subscriber topic version: {} current version: {}",
            min_req_subscriber_topic_version, info.min_subscriber_catalog_topic_version
        );
        while info.min_subscriber_catalog_topic_version < min_req_subscriber_topic_version
            && info.catalog_service_id == result.catalog_service_id
        {
            info = self
                .catalog_version_cv
                .wait(info)
                .expect("catalog version wait");
        }
        Ok(())
    }

    /// Refreshes the db/table count metrics from the frontend catalog.
    pub fn update_catalog_metrics(&self) -> Result<()> {
        let dbs = self.exec_env.frontend().get_db_names()?;
        let metrics = self.exec_env.metrics();
        metrics.catalog_num_dbs.update(dbs.len() as i64);
        let mut num_tables = 0i64;
        for db in &dbs {
            num_tables += self.exec_env.frontend().get_table_names(db)?.len() as i64;
        }
        metrics.catalog_num_tables.update(num_tables);
        Ok(())
    }
}

/// Statements that change the catalog report authorization failures with
/// this code; everything else is an execution problem.
pub fn is_authorization_error(status: &Status) -> bool {
    status.code() == StatusCode::Authorization
}
