// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot message operations and the blocking request flow.

use std::time::Duration;

use serde_json::Value;

use super::{spawn_client_reader, Connection};
use crate::frame::Frame;
use crate::protocol::{Response, SessionRef};

/// Default deadline for `MsgRequest`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(super) async fn send(
    mut conn: Connection,
    from: Option<u32>,
    to: Option<u32>,
    to_name: Option<String>,
    body: Value,
) -> anyhow::Result<()> {
    let target = SessionRef { id: to, name: to_name };
    let result = match conn.manager.resolve(&target).await {
        Ok(to) => conn.manager.send_message(from, to, &body).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(message_id) => {
            conn.send(Response::MsgSent { message_id, status: "sent".to_owned() }).await
        }
        Err(e) => conn.send_error(e).await,
    }
}

pub(super) async fn read(
    mut conn: Connection,
    target: SessionRef,
    tail: Option<i64>,
) -> anyhow::Result<()> {
    let result = match conn.manager.resolve(&target).await {
        Ok(id) => conn.manager.read_messages(id, tail.unwrap_or(0)).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(messages) => conn.send(Response::MsgReadResult { messages }).await,
        Err(e) => conn.send_error(e).await,
    }
}

pub(super) async fn reply(
    mut conn: Connection,
    from: Option<u32>,
    from_name: Option<String>,
    request_id: String,
    body: Value,
) -> anyhow::Result<()> {
    let sender = SessionRef { id: from, name: from_name };
    let result = match conn.manager.resolve(&sender).await {
        Ok(from) => conn.manager.send_reply(from, &request_id, &body).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => conn.send(Response::MsgReplySent { request_id }).await,
        Err(e) => conn.send_error(e).await,
    }
}

/// Register a reply slot, then block until the reply, the deadline, client
/// disconnect, or node shutdown. Timeout and disconnect both clean up the
/// pending entry so late replies fail instead of leaking.
pub(super) async fn request(
    conn: Connection,
    from: Option<u32>,
    to: Option<u32>,
    to_name: Option<String>,
    body: Value,
    timeout: Option<f64>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let target = SessionRef { id: to, name: to_name };
    let registered = match manager.resolve(&target).await {
        Ok(to) => manager.send_request(from, to, &body).await,
        Err(e) => Err(e),
    };
    let (request_id, reply_rx) = match registered {
        Ok(pair) => pair,
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };

    let deadline = timeout.map(Duration::from_secs_f64).unwrap_or(REQUEST_TIMEOUT);
    let mut client_rx = spawn_client_reader(reader);

    tokio::select! {
        _ = shutdown.cancelled() => {
            manager.cleanup_request(&request_id);
        }
        frame = client_rx.recv() => {
            if frame.is_none() {
                manager.cleanup_request(&request_id);
            }
        }
        _ = tokio::time::sleep(deadline) => {
            manager.cleanup_request(&request_id);
            let e = crate::error::NodeError::Timeout(format!(
                "no reply to {request_id} within {}s",
                deadline.as_secs_f64()
            ));
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
        }
        reply = reply_rx => {
            match reply {
                Ok(reply) => {
                    writer
                        .write_frame(Frame::control(&Response::MsgRequestResult {
                            request_id: reply.request_id,
                            reply_body: reply.body,
                            from_id: Some(reply.from_id),
                            from_name: reply.from_name,
                        })?)
                        .await?;
                }
                Err(_) => {
                    manager.cleanup_request(&request_id);
                    writer
                        .write_frame(Frame::control(&Response::error("reply channel closed"))?)
                        .await?;
                }
            }
        }
    }
    Ok(())
}
