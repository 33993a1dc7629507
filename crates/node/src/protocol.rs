// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane message types for the framed wire protocol.
//!
//! Requests and responses are internally-tagged JSON (`{"type": "Launch",
//! ...}`) carried in Control frames; raw PTY bytes ride in Data frames and
//! never appear base64-wrapped inside JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Event, EventType};
use crate::meta::SessionMeta;

fn default_true() -> bool {
    true
}

fn default_condition() -> String {
    "all".to_owned()
}

/// Session addressing: by numeric id or by unique name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SessionRef {
    pub fn by_id(id: u32) -> Self {
        Self { id: Some(id), name: None }
    }
}

/// Client requests. The first frame of every connection must carry one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    ListSessions {},
    Launch {
        command: Vec<String>,
        working_dir: String,
        #[serde(default)]
        env: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdin_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Attach {
        #[serde(flatten)]
        target: SessionRef,
        #[serde(default = "default_true")]
        include_history: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail_lines: Option<usize>,
    },
    Detach {
        #[serde(flatten)]
        target: SessionRef,
    },
    Kill {
        #[serde(flatten)]
        target: SessionRef,
    },
    KillAll {},
    KillByTags {
        tags: Vec<String>,
    },
    Resize {
        #[serde(flatten)]
        target: SessionRef,
        cols: u16,
        rows: u16,
    },
    Logs {
        #[serde(flatten)]
        target: SessionRef,
        #[serde(default)]
        follow: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail_lines: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strip_ansi: Option<bool>,
    },
    SendInput {
        #[serde(flatten)]
        target: SessionRef,
        data: String,
    },
    GetStatus {
        #[serde(flatten)]
        target: SessionRef,
    },
    WatchSession {
        #[serde(flatten)]
        target: SessionRef,
        #[serde(default)]
        include_history: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail_lines: Option<usize>,
    },
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<u32>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        event_types: Vec<EventType>,
    },
    Unsubscribe {},
    Wait {
        #[serde(default)]
        ids: Vec<u32>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default = "default_condition")]
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
    },
    MsgSend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_name: Option<String>,
        body: Value,
    },
    MsgRead {
        #[serde(flatten)]
        target: SessionRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail: Option<i64>,
    },
    MsgRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_name: Option<String>,
        body: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
    },
    MsgReply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_name: Option<String>,
        request_id: String,
        body: Value,
    },
    MsgListen {
        #[serde(flatten)]
        target: SessionRef,
    },
    KVSet {
        key: String,
        value: Value,
    },
    KVGet {
        key: String,
    },
    KVDelete {
        key: String,
    },
    KVList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

/// Server responses and stream frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    SessionList {
        sessions: Vec<SessionInfo>,
    },
    Launched {
        id: u32,
    },
    Attached {
        id: u32,
    },
    Detached {
        id: u32,
    },
    Killed {
        id: u32,
    },
    KilledAll {
        count: usize,
    },
    Resized {
        id: u32,
        cols: u16,
        rows: u16,
    },
    LogData {
        data: String,
        done: bool,
    },
    InputSent {
        bytes: usize,
    },
    SessionStatus {
        info: SessionInfo,
        output_size: u64,
    },
    WatchUpdate {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        done: bool,
    },
    SubscribeAck {
        subscription_id: u64,
    },
    Event {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription_id: Option<u64>,
        session_id: u32,
        event: Event,
    },
    Unsubscribed {},
    WaitResult {
        sessions: Vec<SessionInfo>,
    },
    MsgSent {
        message_id: String,
        status: String,
    },
    MsgReadResult {
        messages: Vec<Event>,
    },
    MsgRequestResult {
        request_id: String,
        reply_body: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_id: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_name: Option<String>,
    },
    MsgListenAck {},
    MsgReplySent {
        request_id: String,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error { message: message.to_string() }
    }
}

/// Snapshot of one session for `ListSessions` / `GetStatus` / `Wait`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub prompt: String,
    pub working_dir: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub attached: bool,
    pub attached_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_lines: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl SessionInfo {
    /// Build from persisted metadata (no live counters).
    pub fn from_meta(meta: &SessionMeta, output_size_bytes: Option<u64>) -> Self {
        Self {
            id: meta.id,
            name: meta.name.clone(),
            prompt: meta.prompt.clone(),
            working_dir: meta.working_dir.clone(),
            created_at: meta.created_at,
            status: meta.status.clone(),
            attached: false,
            attached_count: 0,
            pid: meta.pid,
            tags: meta.tags.clone(),
            output_bytes: None,
            output_lines: None,
            output_size_bytes,
            last_output_at: None,
            last_output_snippet: None,
            exit_code: meta.exit_code,
            completed_at: meta.completed_at,
            duration_ms: meta.duration_ms(),
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
