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
//! Process logging in the classic glog line format, one event per line:
//!
//! ```text
//! Lyyyymmdd hh:mm:ss.uuuuuu threadid file:line] message
//! ```

use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

static INIT: OnceLock<()> = OnceLock::new();

fn level_tag(level: &tracing::Level) -> char {
    match *level {
        tracing::Level::ERROR => 'E',
        tracing::Level::WARN => 'W',
        tracing::Level::INFO => 'I',
        tracing::Level::DEBUG => 'D',
        tracing::Level::TRACE => 'T',
    }
}

/// The numeric part of the current thread's id. `ThreadId` exposes no
/// stable accessor, so this leans on its `Debug` form.
fn thread_ordinal() -> u64 {
    let rendered = format!("{:?}", std::thread::current().id());
    rendered
        .strip_prefix("ThreadId(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

struct GlogFormatter;

impl<S, N> FormatEvent<S, N> for GlogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "{}{} {} {}:{}] ",
            level_tag(metadata.level()),
            Local::now().format("%Y%m%d %H:%M:%S%.6f"),
            thread_ordinal(),
            metadata.file().unwrap_or("unknown"),
            metadata.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the glog-format subscriber. `filter` is a full tracing
/// `EnvFilter` expression; the caller (via config) decides per-target
/// verbosity, e.g. quieting chatty dependencies. Safe to call more than
/// once; only the first call installs anything.
pub fn init_with_level(filter: &str) {
    INIT.get_or_init(|| {
        let subscriber = tracing_fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            // Color only when stderr is a real terminal; redirected logs
            // must stay plain.
            .with_ansi(atty::is(atty::Stream::Stderr))
            .event_format(GlogFormatter);
        let _ = subscriber.try_init();
    });
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
