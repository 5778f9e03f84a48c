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
//! Per-query execution options and their string form.
//!
//! Options arrive as `key=value` pairs from client requests and from the
//! `default_query_options` config knob. `to_map` emits every option so that
//! parsing the printed form reproduces the original value set.

use std::collections::BTreeMap;
use std::fmt;

use crate::common::status::{Result, Status, StatusCode};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompressionCodec {
    #[default]
    None,
    Gzip,
    Bzip2,
    Default,
    Snappy,
    SnappyBlocked,
}

impl CompressionCodec {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "gzip" => Some(Self::Gzip),
            "bzip2" => Some(Self::Bzip2),
            "default" => Some(Self::Default),
            "snappy" => Some(Self::Snappy),
            "snappy_blocked" => Some(Self::SnappyBlocked),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Default => "default",
            Self::Snappy => "snappy",
            Self::SnappyBlocked => "snappy_blocked",
        }
    }
}

impl fmt::Display for CompressionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ExplainLevel {
    Minimal = 0,
    #[default]
    Standard = 1,
    Extended = 2,
    Verbose = 3,
}

impl ExplainLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "minimal" | "0" => Some(Self::Minimal),
            "standard" | "1" => Some(Self::Standard),
            "extended" | "2" => Some(Self::Extended),
            "verbose" | "3" => Some(Self::Verbose),
            _ => None,
        }
    }
}

/// The full set of recognized per-query options, with engine defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub abort_on_error: bool,
    pub max_errors: i32,
    pub disable_codegen: bool,
    pub batch_size: i32,
    pub mem_limit: i64,
    pub num_nodes: i32,
    pub max_scan_range_length: i64,
    pub max_io_buffers: i32,
    pub num_scanner_threads: i32,
    pub allow_unsupported_formats: bool,
    pub debug_action: String,
    pub compression_codec: CompressionCodec,
    pub hbase_caching: i32,
    pub hbase_cache_blocks: bool,
    pub parquet_file_size: i64,
    pub explain_level: ExplainLevel,
    pub sync_ddl: bool,
    pub request_pool: String,
    pub query_timeout_s: i32,
    pub max_block_mgr_memory: i64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            abort_on_error: false,
            max_errors: 0,
            disable_codegen: false,
            batch_size: 0,
            mem_limit: 0,
            num_nodes: 0,
            max_scan_range_length: 0,
            max_io_buffers: 0,
            num_scanner_threads: 0,
            allow_unsupported_formats: false,
            debug_action: String::new(),
            compression_codec: CompressionCodec::None,
            hbase_caching: 0,
            hbase_cache_blocks: false,
            parquet_file_size: 0,
            explain_level: ExplainLevel::Standard,
            sync_ddl: false,
            request_pool: String::new(),
            query_timeout_s: 0,
            max_block_mgr_memory: 0,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Status::new(
            StatusCode::InvalidOption,
            format!("Invalid value for configuration option {key}: {value}"),
        )
    })
}

/// Parses a memory amount with an optional b/k/m/g/t suffix. Percentage
/// forms are rejected for per-query limits.
pub fn parse_mem_spec(value: &str, key: &str) -> Result<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Status::new(
            StatusCode::InvalidOption,
            format!("Failed to parse {key} from '{value}'."),
        ));
    }
    if trimmed.ends_with('%') {
        return Err(Status::new(
            StatusCode::InvalidOption,
            format!("Invalid {key} with percent '{value}'."),
        ));
    }
    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let mult = match c.to_ascii_lowercase() {
                'b' => 1i64,
                'k' => 1i64 << 10,
                'm' => 1i64 << 20,
                'g' => 1i64 << 30,
                't' => 1i64 << 40,
                _ => {
                    return Err(Status::new(
                        StatusCode::InvalidOption,
                        format!("Failed to parse {key} from '{value}'."),
                    ))
                }
            };
            (&trimmed[..trimmed.len() - 1], mult)
        }
        _ => (trimmed, 1i64),
    };
    let amount = digits.trim().parse::<i64>().map_err(|_| {
        Status::new(
            StatusCode::InvalidOption,
            format!("Failed to parse {key} from '{value}'."),
        )
    })?;
    if amount < 0 {
        return Err(Status::new(
            StatusCode::InvalidOption,
            format!("Failed to parse {key} from '{value}'."),
        ));
    }
    Ok(amount * multiplier)
}

impl QueryOptions {
    /// Applies a single `key=value` assignment. Keys are case-insensitive;
    /// unknown keys and malformed values yield a descriptive error.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "abort_on_error" => self.abort_on_error = parse_bool(value),
            "max_errors" => self.max_errors = parse_int(key, value)?,
            "disable_codegen" => self.disable_codegen = parse_bool(value),
            "batch_size" => self.batch_size = parse_int(key, value)?,
            "mem_limit" => self.mem_limit = parse_mem_spec(value, "query memory limit")?,
            "num_nodes" => self.num_nodes = parse_int(key, value)?,
            "max_scan_range_length" => self.max_scan_range_length = parse_int(key, value)?,
            "max_io_buffers" => self.max_io_buffers = parse_int(key, value)?,
            "num_scanner_threads" => self.num_scanner_threads = parse_int(key, value)?,
            "allow_unsupported_formats" => self.allow_unsupported_formats = parse_bool(value),
            "debug_action" => self.debug_action = value.to_string(),
            "compression_codec" => {
                if value.is_empty() {
                    return Ok(());
                }
                self.compression_codec = CompressionCodec::parse(value).ok_or_else(|| {
                    Status::new(
                        StatusCode::InvalidOption,
                        format!("Invalid compression codec: {value}"),
                    )
                })?;
            }
            "hbase_caching" => self.hbase_caching = parse_int(key, value)?,
            "hbase_cache_blocks" => self.hbase_cache_blocks = parse_bool(value),
            "parquet_file_size" => {
                self.parquet_file_size = parse_mem_spec(value, "parquet file size")?
            }
            "explain_level" => {
                self.explain_level = ExplainLevel::parse(value).ok_or_else(|| {
                    Status::new(
                        StatusCode::InvalidOption,
                        format!("Invalid explain level: {value}"),
                    )
                })?;
            }
            "sync_ddl" => self.sync_ddl = parse_bool(value),
            "request_pool" => self.request_pool = value.to_string(),
            "query_timeout_s" => self.query_timeout_s = parse_int(key, value)?,
            "max_block_mgr_memory" => {
                self.max_block_mgr_memory = parse_mem_spec(value, "block mgr memory limit")?
            }
            _ => {
                return Err(Status::new(
                    StatusCode::InvalidOption,
                    format!("Ignoring invalid configuration option: {key}"),
                ));
            }
        }
        Ok(())
    }

    /// Applies a comma-separated `k=v,k=v` list on top of the current values.
    pub fn apply_options_string(&mut self, options: &str) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        for kv_string in options.split(',') {
            let kv_string = kv_string.trim();
            if kv_string.is_empty() {
                continue;
            }
            let mut parts = kv_string.splitn(2, '=');
            let (key, value) = match (parts.next(), parts.next()) {
                (Some(k), Some(v)) => (k.trim(), v.trim()),
                _ => {
                    return Err(Status::new(
                        StatusCode::InvalidOption,
                        format!(
                            "Ignoring invalid configuration option {kv_string}: bad format \
                             (expected key=value)"
                        ),
                    ));
                }
            };
            self.set_option(key, value)?;
        }
        Ok(())
    }

    /// Every option as a string map. `parse(to_map())` reproduces the
    /// original values.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("abort_on_error".to_string(), self.abort_on_error.to_string());
        map.insert("max_errors".to_string(), self.max_errors.to_string());
        map.insert(
            "disable_codegen".to_string(),
            self.disable_codegen.to_string(),
        );
        map.insert("batch_size".to_string(), self.batch_size.to_string());
        map.insert("mem_limit".to_string(), self.mem_limit.to_string());
        map.insert("num_nodes".to_string(), self.num_nodes.to_string());
        map.insert(
            "max_scan_range_length".to_string(),
            self.max_scan_range_length.to_string(),
        );
        map.insert("max_io_buffers".to_string(), self.max_io_buffers.to_string());
        map.insert(
            "num_scanner_threads".to_string(),
            self.num_scanner_threads.to_string(),
        );
        map.insert(
            "allow_unsupported_formats".to_string(),
            self.allow_unsupported_formats.to_string(),
        );
        map.insert("debug_action".to_string(), self.debug_action.clone());
        map.insert(
            "compression_codec".to_string(),
            self.compression_codec.to_string(),
        );
        map.insert("hbase_caching".to_string(), self.hbase_caching.to_string());
        map.insert(
            "hbase_cache_blocks".to_string(),
            self.hbase_cache_blocks.to_string(),
        );
        map.insert(
            "parquet_file_size".to_string(),
            self.parquet_file_size.to_string(),
        );
        map.insert(
            "explain_level".to_string(),
            (self.explain_level as i32).to_string(),
        );
        map.insert("sync_ddl".to_string(), self.sync_ddl.to_string());
        map.insert("request_pool".to_string(), self.request_pool.clone());
        map.insert(
            "query_timeout_s".to_string(),
            self.query_timeout_s.to_string(),
        );
        map.insert(
            "max_block_mgr_memory".to_string(),
            self.max_block_mgr_memory.to_string(),
        );
        map
    }
}

/// Parses a full options string into a fresh option set on top of defaults.
pub fn parse_query_options(options: &str) -> Result<QueryOptions> {
    let mut parsed = QueryOptions::default();
    parsed.apply_options_string(options)?;
    Ok(parsed)
}
