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
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<OryxConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static OryxConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = OryxConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static OryxConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = OryxConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static OryxConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("ORYX_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("oryx.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $ORYX_CONFIG or create ./oryx.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct OryxConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "oryx=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    /// Fatal configuration problems abort startup when true.
    #[serde(default = "default_true")]
    pub abort_on_config_error: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl OryxConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: OryxConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for OryxConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            abort_on_config_error: true,
            server: ServerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            archive: ArchiveConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Service endpoints and request thread pools.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Port on which Beeswax client requests are served.
    #[serde(default = "default_beeswax_port")]
    pub beeswax_port: u16,
    /// Port on which HiveServer2 client requests are served.
    #[serde(default = "default_hs2_port")]
    pub hs2_port: u16,
    /// Port of the backend fragment-execution service.
    #[serde(default = "default_be_port")]
    pub be_port: u16,
    /// Number of threads available to serve client requests.
    #[serde(default = "default_fe_service_threads")]
    pub fe_service_threads: usize,
    /// Number of threads available to serve backend execution requests.
    #[serde(default = "default_be_service_threads")]
    pub be_service_threads: usize,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_beeswax_port() -> u16 {
    21000
}
fn default_hs2_port() -> u16 {
    21050
}
fn default_be_port() -> u16 {
    22000
}
fn default_fe_service_threads() -> usize {
    64
}
fn default_be_service_threads() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            beeswax_port: default_beeswax_port(),
            hs2_port: default_hs2_port(),
            be_port: default_be_port(),
            fe_service_threads: default_fe_service_threads(),
            be_service_threads: default_be_service_threads(),
        }
    }
}

/// Session/query expiration and cancellation behavior.
#[derive(Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Size of the thread pool processing cancellations due to node failure.
    #[serde(default = "default_cancellation_thread_pool_size")]
    pub cancellation_thread_pool_size: usize,
    /// Seconds a session may be idle before it is closed (and all running
    /// queries cancelled). 0 disables idle-session expiration.
    #[serde(default)]
    pub idle_session_timeout: i64,
    /// Seconds a query may be idle before it is cancelled. 0 disables
    /// idle-query expiration. The query option `query_timeout_s` overrides
    /// this, but a non-zero value here is the maximum allowable timeout.
    #[serde(default)]
    pub idle_query_timeout: i64,
    /// Maximum number of results a client may ask to be cached per query to
    /// support restarting fetches.
    #[serde(default = "default_max_result_cache_size")]
    pub max_result_cache_size: i64,
    /// Comma-separated key=value default query options.
    #[serde(default)]
    pub default_query_options: String,
}

fn default_cancellation_thread_pool_size() -> usize {
    5
}
fn default_max_result_cache_size() -> i64 {
    100_000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cancellation_thread_pool_size: default_cancellation_thread_pool_size(),
            idle_session_timeout: 0,
            idle_query_timeout: 0,
            max_result_cache_size: default_max_result_cache_size(),
            default_query_options: String::new(),
        }
    }
}

/// Completed-query retention and on-disk logging.
#[derive(Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Number of queries to retain in the query log. -1 is unbounded, 0
    /// disables the in-memory archive.
    #[serde(default = "default_query_log_size")]
    pub query_log_size: i64,
    /// If true, logs completed query profiles to file.
    #[serde(default = "default_true")]
    pub log_query_to_file: bool,
    /// Directory for profile log files. Empty disables profile logging.
    #[serde(default)]
    pub profile_log_dir: String,
    /// Maximum size (in queries) of a profile log file before rotation.
    #[serde(default = "default_max_log_file_size")]
    pub max_profile_log_file_size: u32,
    /// Directory for audit event log files. Setting this enables audit
    /// event logging.
    #[serde(default)]
    pub audit_event_log_dir: String,
    /// Maximum size (in queries) of an audit log file before rotation.
    #[serde(default = "default_max_log_file_size")]
    pub max_audit_event_log_file_size: u32,
    /// Shut down if there is a problem recording an audit event.
    #[serde(default = "default_true")]
    pub abort_on_failed_audit_event: bool,
}

fn default_query_log_size() -> i64 {
    25
}
fn default_max_log_file_size() -> u32 {
    5000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            query_log_size: default_query_log_size(),
            log_query_to_file: true,
            profile_log_dir: String::new(),
            max_profile_log_file_size: default_max_log_file_size(),
            audit_event_log_dir: String::new(),
            max_audit_event_log_file_size: default_max_log_file_size(),
            abort_on_failed_audit_event: true,
        }
    }
}

/// Transport security and user delegation.
#[derive(Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Path to the SSL certificate used to authenticate the coordinator to
    /// clients. If set, client ports only accept SSL connections.
    #[serde(default)]
    pub ssl_server_certificate: String,
    /// Private key counterpart of `ssl_server_certificate`.
    #[serde(default)]
    pub ssl_private_key: String,
    /// Certificate clients use to validate the server certificate.
    #[serde(default)]
    pub ssl_client_ca_certificate: String,
    /// Proxy delegation map: `proxy1=user1,user2;proxy2=*`.
    #[serde(default)]
    pub authorized_proxy_user_config: String,
}
