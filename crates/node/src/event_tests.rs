// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn event_type_serializes_dotted() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_string(&EventType::SessionCreated)?, "\"session.created\"");
    assert_eq!(serde_json::to_string(&EventType::MessageReply)?, "\"message.reply\"");
    let parsed: EventType = serde_json::from_str("\"session.output_summary\"")?;
    assert_eq!(parsed, EventType::SessionOutputSummary);
    Ok(())
}

#[test]
fn event_round_trips_through_json() -> anyhow::Result<()> {
    let event = Event::status("running", "completed (0)", Some(0));
    let line = serde_json::to_string(&event)?;
    let back: Event = serde_json::from_str(&line)?;
    assert_eq!(back.event_type, EventType::SessionStatus);
    assert_eq!(back.data["from"], "running");
    assert_eq!(back.data["to"], "completed (0)");
    assert_eq!(back.data["exit_code"], 0);
    Ok(())
}

#[test]
fn timestamp_is_rfc3339() -> anyhow::Result<()> {
    let event = Event::input(5);
    let value = serde_json::to_value(&event)?;
    let ts = value["timestamp"].as_str().map(str::to_owned);
    assert!(ts.is_some());
    // chrono serializes DateTime<Utc> as RFC3339; round-trip must parse.
    let ts = ts.unwrap_or_default();
    assert!(ts.parse::<chrono::DateTime<chrono::Utc>>().is_ok(), "not RFC3339: {ts}");
    Ok(())
}

#[test]
fn message_shapes_carry_ids() {
    let body = json!({ "text": "ping" });
    let req = Event::request("req_0_2_123", None, None, 2, Some("worker"), &body);
    assert_eq!(req.data["request_id"], "req_0_2_123");
    assert_eq!(req.data["from"], serde_json::Value::Null);
    assert_eq!(req.data["to"], 2);
    assert_eq!(req.data["to_name"], "worker");
    assert_eq!(req.data["body"]["text"], "ping");

    let reply = Event::reply("req_0_2_123", 2, Some("worker"), &json!({ "text": "pong" }));
    assert_eq!(reply.data["request_id"], "req_0_2_123");
    assert_eq!(reply.data["from"], 2);
}

#[test]
fn message_types_grouped_for_listen() {
    assert!(EventType::MessageDirect.is_message());
    assert!(EventType::MessageRequest.is_message());
    assert!(EventType::MessageReply.is_message());
    assert!(!EventType::SessionStatus.is_message());
}
