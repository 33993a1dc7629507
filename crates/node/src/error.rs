// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Typed errors surfaced to clients as `Error{message}` frames.
///
/// Fatal node-level failures (socket bind, data dir creation) use `anyhow`
/// and terminate the process instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Unknown request type, missing field, malformed name, bad frame.
    InvalidRequest(String),
    /// Session id/name not known, or request id not pending.
    NotFound(String),
    /// Session name already owned by a live session.
    NameInUse { name: String, owner: u32 },
    /// Attach/input against a session in a terminal state.
    NotRunning { id: u32, status: String },
    /// Input queue full; non-fatal, caller may retry.
    Backpressure,
    /// Executable missing, cwd invalid, or PTY allocation failed.
    SpawnFailed(String),
    /// MsgRequest or Wait deadline elapsed.
    Timeout(String),
}

impl NodeError {
    pub fn session_not_found(id: u32) -> Self {
        Self::NotFound(format!("session {id} not found"))
    }

    pub fn name_not_found(name: &str) -> Self {
        Self::NotFound(format!("no session named {name:?}"))
    }

    pub fn request_not_pending(request_id: &str) -> Self {
        Self::NotFound(format!("request {request_id:?} is not pending"))
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::NotFound(msg) => f.write_str(msg),
            Self::NameInUse { name, owner } => {
                write!(f, "name {name:?} already in use by session {owner}")
            }
            Self::NotRunning { id, status } => {
                write!(f, "session {id} is not running ({status})")
            }
            Self::Backpressure => f.write_str("input queue full"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            Self::Timeout(msg) => write!(f, "timed out: {msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
