// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed session events.
//!
//! Events are appended to per-session JSONL logs and fanned out through the
//! subscription bus. The type set is closed; each type's `data` shape is
//! fixed by the constructors below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.status")]
    SessionStatus,
    #[serde(rename = "session.output_summary")]
    SessionOutputSummary,
    #[serde(rename = "session.input")]
    SessionInput,
    #[serde(rename = "session.attached")]
    SessionAttached,
    #[serde(rename = "session.detached")]
    SessionDetached,
    #[serde(rename = "message.direct")]
    MessageDirect,
    #[serde(rename = "message.request")]
    MessageRequest,
    #[serde(rename = "message.reply")]
    MessageReply,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionStatus => "session.status",
            Self::SessionOutputSummary => "session.output_summary",
            Self::SessionInput => "session.input",
            Self::SessionAttached => "session.attached",
            Self::SessionDetached => "session.detached",
            Self::MessageDirect => "message.direct",
            Self::MessageRequest => "message.request",
            Self::MessageReply => "message.reply",
        }
    }

    /// Whether this is one of the `message.*` types (MsgListen scope).
    pub fn is_message(&self) -> bool {
        matches!(self, Self::MessageDirect | Self::MessageRequest | Self::MessageReply)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self { timestamp: Utc::now(), event_type, data }
    }

    pub fn created(command: &[String], working_dir: &str, tags: &[String]) -> Self {
        Self::new(
            EventType::SessionCreated,
            json!({ "command": command, "working_dir": working_dir, "tags": tags }),
        )
    }

    /// Terminal transition; `from == to` never occurs (the status cell only
    /// reports real moves).
    pub fn status(from: &str, to: &str, exit_code: Option<i32>) -> Self {
        Self::new(
            EventType::SessionStatus,
            json!({ "from": from, "to": to, "exit_code": exit_code }),
        )
    }

    pub fn output_summary(bytes: u64, lines: u64) -> Self {
        Self::new(EventType::SessionOutputSummary, json!({ "bytes": bytes, "lines": lines }))
    }

    pub fn input(bytes: usize) -> Self {
        Self::new(EventType::SessionInput, json!({ "bytes": bytes }))
    }

    pub fn attached(attach_count: u32) -> Self {
        Self::new(EventType::SessionAttached, json!({ "attach_count": attach_count }))
    }

    pub fn detached(attach_count: u32) -> Self {
        Self::new(EventType::SessionDetached, json!({ "attach_count": attach_count }))
    }

    pub fn direct(
        message_id: &str,
        from: Option<u32>,
        from_name: Option<&str>,
        to: u32,
        to_name: Option<&str>,
        body: &Value,
    ) -> Self {
        Self::new(
            EventType::MessageDirect,
            json!({
                "message_id": message_id,
                "from": from,
                "from_name": from_name,
                "to": to,
                "to_name": to_name,
                "body": body,
            }),
        )
    }

    pub fn request(
        request_id: &str,
        from: Option<u32>,
        from_name: Option<&str>,
        to: u32,
        to_name: Option<&str>,
        body: &Value,
    ) -> Self {
        Self::new(
            EventType::MessageRequest,
            json!({
                "request_id": request_id,
                "from": from,
                "from_name": from_name,
                "to": to,
                "to_name": to_name,
                "body": body,
            }),
        )
    }

    pub fn reply(request_id: &str, from: u32, from_name: Option<&str>, body: &Value) -> Self {
        Self::new(
            EventType::MessageReply,
            json!({
                "request_id": request_id,
                "from": from,
                "from_name": from_name,
                "body": body,
            }),
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
