// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The subscribe flow (filtered event stream) and the message-listen flow.

use tracing::debug;

use super::{spawn_client_reader, Connection};
use crate::bus::EventFilter;
use crate::event::EventType;
use crate::frame::Frame;
use crate::protocol::{Request, Response, SessionRef};

pub(super) async fn run(
    conn: Connection,
    session_id: Option<u32>,
    tags: Vec<String>,
    event_types: Vec<EventType>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let filter = EventFilter { session_id, tags, event_types };
    let (sub_id, mut events) = manager.bus().subscribe(filter);

    let result: anyhow::Result<()> = async {
        writer
            .write_frame(Frame::control(&Response::SubscribeAck { subscription_id: sub_id })?)
            .await?;

        let mut client_rx = spawn_client_reader(reader);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some((session_id, event)) => {
                        writer
                            .write_frame(Frame::control(&Response::Event {
                                subscription_id: Some(sub_id),
                                session_id,
                                event,
                            })?)
                            .await?;
                    }
                    None => break,
                },
                frame = client_rx.recv() => match frame {
                    Some(Frame::Control(json)) => {
                        match serde_json::from_str::<Request>(&json) {
                            Ok(Request::Unsubscribe {}) => {
                                writer
                                    .write_frame(Frame::control(&Response::Unsubscribed {})?)
                                    .await?;
                                break;
                            }
                            other => debug!("ignoring frame in subscribe stream: {other:?}"),
                        }
                    }
                    Some(Frame::Data(_)) => {}
                    None => break,
                },
            }
        }
        Ok(())
    }
    .await;

    manager.bus().unsubscribe(sub_id);
    result
}

/// MsgListen: stream every `message.*` event involving one session.
pub(super) async fn listen(conn: Connection, target: SessionRef) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let id = match manager.resolve(&target).await {
        Ok(id) => id,
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };

    let filter = EventFilter {
        session_id: Some(id),
        tags: vec![],
        event_types: vec![
            EventType::MessageDirect,
            EventType::MessageRequest,
            EventType::MessageReply,
        ],
    };
    let (sub_id, mut events) = manager.bus().subscribe(filter);

    let result: anyhow::Result<()> = async {
        writer.write_frame(Frame::control(&Response::MsgListenAck {})?).await?;

        let mut client_rx = spawn_client_reader(reader);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some((session_id, event)) => {
                        writer
                            .write_frame(Frame::control(&Response::Event {
                                subscription_id: None,
                                session_id,
                                event,
                            })?)
                            .await?;
                    }
                    None => break,
                },
                frame = client_rx.recv() => {
                    if frame.is_none() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    manager.bus().unsubscribe(sub_id);
    result
}
