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
//! Append-only log files capped by entry count, rotated by opening a fresh
//! timestamped file. Used for the profile archive and the audit event log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

struct LoggerState {
    writer: Option<BufWriter<File>>,
    entries_in_file: u32,
}

pub struct SimpleLogger {
    log_dir: PathBuf,
    filename_prefix: String,
    max_entries_per_file: u32,
    state: Mutex<LoggerState>,
}

impl SimpleLogger {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        filename_prefix: impl Into<String>,
        max_entries_per_file: u32,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            filename_prefix: filename_prefix.into(),
            max_entries_per_file,
            state: Mutex::new(LoggerState {
                writer: None,
                entries_in_file: 0,
            }),
        }
    }

    /// Creates the log directory and opens the first file.
    pub fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        let mut state = self.state.lock().expect("simple logger lock");
        self.open_next_file(&mut state)
    }

    fn open_next_file(&self, state: &mut LoggerState) -> io::Result<()> {
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }
        let filename = format!(
            "{}{}",
            self.filename_prefix,
            Local::now().format("%Y%m%d-%H%M%S%.6f")
        );
        let path = self.log_dir.join(filename);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        state.writer = Some(BufWriter::new(file));
        state.entries_in_file = 0;
        Ok(())
    }

    /// Appends one entry as its own line, rotating first if the current file
    /// is at capacity.
    pub fn append_entry(&self, entry: &str) -> io::Result<()> {
        let mut state = self.state.lock().expect("simple logger lock");
        if state.writer.is_none()
            || (self.max_entries_per_file > 0
                && state.entries_in_file >= self.max_entries_per_file)
        {
            self.open_next_file(&mut state)?;
        }
        let writer = state.writer.as_mut().expect("writer opened");
        writer.write_all(entry.as_bytes())?;
        writer.write_all(b"\n")?;
        state.entries_in_file += 1;
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().expect("simple logger lock");
        match state.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}
