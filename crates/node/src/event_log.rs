// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL event logs.
//!
//! Each session owns two of these (`events.jsonl`, `messages.jsonl`). The
//! file handle is opened once in append mode and never truncated; writes
//! are serialised behind a mutex. Tail reads go back to the file so they
//! see writes from any handle, skipping corrupt lines.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

use crate::event::Event;

pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (creating if needed, mode 0644) the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).mode(0o644).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub fn append(&self, event: &Event) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read the last `n` records (all when `n <= 0`).
    pub fn read_tail(&self, n: i64) -> anyhow::Result<Vec<Event>> {
        read_tail(&self.path, n)
    }
}

/// Tail a JSONL event file without holding a log handle. Corrupt lines are
/// skipped; a missing file reads as empty.
pub fn read_tail(path: &Path, n: i64) -> anyhow::Result<Vec<Event>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut events: Vec<Event> = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(path = %path.display(), "skipping corrupt event line: {e}"),
        }
    }
    if n > 0 && events.len() > n as usize {
        events.drain(..events.len() - n as usize);
    }
    Ok(events)
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
