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
//! Per-query runtime profile tree: named nodes carrying info strings,
//! counters, a timeline of marked events and child profiles. Shared handles
//! are cheap clones of one tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::common::types::ms_since_epoch;

#[derive(Clone, Debug)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

#[derive(Debug)]
struct RuntimeProfileInner {
    name: RwLock<String>,
    counters: Mutex<HashMap<String, Arc<AtomicI64>>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    events: Mutex<Vec<(String, i64)>>,
    children: Mutex<Vec<RuntimeProfile>>,
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                counters: Mutex::new(HashMap::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                events: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn add_child(&self, child: RuntimeProfile) {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        children.push(child);
    }

    pub fn create_child(&self, name: impl Into<String>) -> RuntimeProfile {
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut info = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        info.insert(key.into(), value.into());
    }

    pub fn info_string(&self, key: &str) -> Option<String> {
        let info = self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        info.get(key).cloned()
    }

    pub fn counter(&self, name: &str) -> Arc<AtomicI64> {
        let mut counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicI64::new(0))),
        )
    }

    /// Records a named point on the query timeline with the current time.
    pub fn mark_event(&self, label: impl Into<String>) {
        let mut events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push((label.into(), ms_since_epoch()));
    }

    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, 0);
        out
    }

    fn pretty_print_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        out.push_str(&format!("{pad}{}:\n", self.name()));
        {
            let info = self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for (key, value) in info.iter() {
                out.push_str(&format!("{pad}   {key}: {value}\n"));
            }
        }
        {
            let events = self.inner.events.lock().unwrap_or_else(|e| e.into_inner());
            for (label, ts) in events.iter() {
                out.push_str(&format!("{pad}   - {label}: {ts}\n"));
            }
        }
        {
            let counters = self
                .inner
                .counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut sorted: Vec<_> = counters.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in sorted {
                out.push_str(&format!(
                    "{pad}   {name}: {}\n",
                    value.load(Ordering::Relaxed)
                ));
            }
        }
        let children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for child in children {
            child.pretty_print_into(out, indent + 1);
        }
    }

    /// Compact single-line form suitable for the on-disk profile log.
    pub fn to_archive_string(&self) -> String {
        BASE64_STANDARD.encode(self.pretty_print())
    }
}
