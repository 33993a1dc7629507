// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle state and its level-triggered change cell.

use tokio::sync::watch;

/// Lifecycle state of a session. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed(i32),
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Canonical string form: `running` / `completed (<n>)` / `killed`.
    pub fn canonical(&self) -> String {
        match self {
            Self::Running => "running".to_owned(),
            Self::Completed(code) => format!("completed ({code})"),
            Self::Killed => "killed".to_owned(),
        }
    }

    /// Parse the canonical string form back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "killed" => Some(Self::Killed),
            other => {
                let code = other.strip_prefix("completed (")?.strip_suffix(')')?;
                code.parse().ok().map(Self::Completed)
            }
        }
    }
}

/// Level-triggered status cell.
///
/// Waiters subscribe, then alternate `changed()` / `borrow()`; two
/// transitions between reads coalesce into one wake-up. Terminal states are
/// final: once `Completed` or `Killed` is stored, later `set` calls are
/// ignored, so `Killed` always wins over a `Completed` that the reaper
/// reports afterwards.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<SessionStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionStatus::Running);
        Self { tx }
    }

    pub fn get(&self) -> SessionStatus {
        *self.tx.borrow()
    }

    /// Transition to `next`. Returns `true` if the stored value changed.
    ///
    /// No-ops when the current state is terminal or equal to `next`, so a
    /// double `kill` and a reap-after-kill are both silent.
    pub fn set(&self, next: SessionStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Obtain a receiver whose `changed()` resolves on the next transition.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
