// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted session metadata and the `sessions.json` store.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::status::SessionStatus;

/// One persisted session record. The document at `<data_dir>/sessions.json`
/// is an array of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Display string of the full command line.
    pub prompt: String,
    pub working_dir: String,
    pub created_at: DateTime<Utc>,
    /// Canonical status string (`running` / `completed (<n>)` / `killed`).
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionMeta {
    pub fn status_enum(&self) -> SessionStatus {
        SessionStatus::parse(&self.status).unwrap_or(SessionStatus::Killed)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        let completed = self.completed_at?;
        Some((completed - self.created_at).num_milliseconds())
    }
}

/// State recovered at node startup.
#[derive(Debug)]
pub struct LoadedState {
    pub metas: Vec<SessionMeta>,
    pub next_id: u32,
}

/// Loads and saves the `sessions.json` document.
pub struct MetaStore {
    data_dir: PathBuf,
    path: PathBuf,
}

impl MetaStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let path = data_dir.join("sessions.json");
        Self { data_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted metadata.
    ///
    /// An unparseable file is renamed `sessions.json.corrupt.<ts>` and
    /// treated as empty. Records still marked `running` belonged to a dead
    /// node and are normalised to `killed`. `next_id` is the high watermark
    /// over both the persisted ids and extant `sessions/<id>/` directories,
    /// so id allocation never collides even after a corrupt-state reset.
    pub fn load(&self) -> anyhow::Result<LoadedState> {
        let mut metas = match std::fs::read(&self.path) {
            Ok(raw) => match serde_json::from_slice::<Vec<SessionMeta>>(&raw) {
                Ok(metas) => metas,
                Err(e) => {
                    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
                    let quarantine = self.data_dir.join(format!("sessions.json.corrupt.{ts}"));
                    error!(
                        path = %self.path.display(),
                        quarantine = %quarantine.display(),
                        "sessions.json is corrupt, starting empty: {e}"
                    );
                    std::fs::rename(&self.path, &quarantine)?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        for meta in &mut metas {
            if meta.status_enum() == SessionStatus::Running {
                warn!(id = meta.id, "persisted session was running at last shutdown, marking killed");
                meta.status = SessionStatus::Killed.canonical();
                meta.pid = None;
                if meta.completed_at.is_none() {
                    meta.completed_at = Some(Utc::now());
                }
            }
        }

        let persisted_max = metas.iter().map(|m| m.id).max().unwrap_or(0);
        let on_disk_max = self.scan_session_dirs();
        Ok(LoadedState { metas, next_id: persisted_max.max(on_disk_max) + 1 })
    }

    /// Serialise all metas atomically (temp file + rename).
    pub fn save(&self, metas: &[SessionMeta]) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(metas)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        tmp.write_all(&json)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    /// Highest numeric name among `sessions/<id>/` directories, 0 if none.
    fn scan_session_dirs(&self) -> u32 {
        let sessions = self.data_dir.join("sessions");
        let Ok(entries) = std::fs::read_dir(sessions) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
