//! One recording session: per-field buffers and CSV files
//!
//! A session owns its buffers and open files; both are released when it
//! stops. Files are created lazily under `<path>/<field>/<timestamp>.csv`
//! on the first flush that touches the field, so an idle field never leaves
//! an empty file behind.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, Timelike};
use tracing::{debug, error, info, trace};

use crate::error::{GatewayError, Result};
use crate::vehicle::Update;

/// One buffered row: subsecond nanos at append time plus the textual value
struct Row {
    nanos: u32,
    value: String,
}

pub(super) struct Session {
    base_path: PathBuf,
    /// Path-safe session timestamp, shared by every file of this session
    started: String,
    buffer: HashMap<String, Vec<Row>>,
    files: HashMap<String, File>,
    dump_threshold: usize,
}

impl Session {
    pub(super) fn new(base_path: PathBuf, dump_threshold: usize) -> Self {
        let started = Local::now()
            .format("%Y-%m-%d %H:%M:%S%.9f")
            .to_string()
            .replace(' ', "_")
            .replace(':', "-");
        debug!(session = %started, "new log session");

        Self {
            base_path,
            started,
            buffer: HashMap::new(),
            files: HashMap::new(),
            dump_threshold,
        }
    }

    /// Buffer every field of the update, stamped now
    pub(super) fn append(&mut self, update: &Update) {
        let now = Local::now();
        for (name, value) in &update.values {
            trace!(name = %name, "buffer value");
            self.buffer.entry(name.clone()).or_default().push(Row {
                nanos: now.nanosecond(),
                value: value.to_string(),
            });
        }
    }

    /// True once any single field buffer exceeds the dump threshold
    pub(super) fn should_dump(&self) -> bool {
        self.buffer
            .values()
            .any(|rows| rows.len() > self.dump_threshold)
    }

    /// Write every buffered row out and clear the buffers
    pub(super) fn flush(&mut self) -> Result<()> {
        let fields: Vec<String> = self.buffer.keys().cloned().collect();
        for name in fields {
            let rows = self.buffer.remove(&name).unwrap_or_default();
            if rows.is_empty() {
                continue;
            }

            let mut data = String::with_capacity(rows.len() * 16);
            for row in &rows {
                data.push_str(&format!("{},\"{}\"\n", row.nanos, row.value));
            }

            let path = self.file_path(&name);
            let file = match self.files.entry(name.clone()) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(create_file(&path)?)
                }
            };

            file.write_all(data.as_bytes())
                .map_err(|e| GatewayError::SessionIo { path, source: e })?;
        }
        Ok(())
    }

    /// Close every file, best effort: the first error is returned, the rest
    /// are logged
    pub(super) fn close(&mut self) -> Result<()> {
        info!(session = %self.started, "close log session");
        let mut first_err = None;
        for (name, file) in self.files.drain() {
            if let Err(e) = file.sync_all() {
                error!(field = %name, error = %e, "close failed");
                if first_err.is_none() {
                    first_err = Some(GatewayError::SessionIo {
                        path: self.base_path.join(&name),
                        source: e,
                    });
                }
            }
        }
        self.buffer.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn file_path(&self, field: &str) -> PathBuf {
        self.base_path
            .join(field)
            .join(format!("{}.csv", self.started))
    }
}

fn create_file(path: &PathBuf) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GatewayError::SessionIo {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GatewayError::SessionIo {
            path: path.clone(),
            source: e,
        })?;
    debug!(path = %path.display(), "create session file");
    Ok(file)
}
