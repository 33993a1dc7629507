// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wait flow: block until all/any of a fixed session selection reach a
//! terminal state.

use super::{maybe_deadline, spawn_client_reader, Connection};
use crate::bus::EventFilter;
use crate::error::NodeError;
use crate::event::EventType;
use crate::frame::Frame;
use crate::protocol::Response;

pub(super) async fn run(
    conn: Connection,
    ids: Vec<u32>,
    tags: Vec<String>,
    condition: String,
    timeout: Option<f64>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let all = match condition.as_str() {
        "all" => true,
        "any" => false,
        other => {
            let e = NodeError::InvalidRequest(format!("condition must be all or any, got {other:?}"));
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };
    if ids.is_empty() && tags.is_empty() {
        let e = NodeError::InvalidRequest("wait needs session ids or tags".to_owned());
        writer.write_frame(Frame::control(&Response::error(e))?).await?;
        return Ok(());
    }

    // Subscribe before the first evaluation so a transition between the
    // check and the wait cannot be missed.
    let filter = EventFilter {
        session_id: None,
        tags: vec![],
        event_types: vec![EventType::SessionStatus],
    };
    let (sub_id, mut events) = manager.bus().subscribe(filter);

    let result: anyhow::Result<()> = async {
        // The selection is fixed at wait start; later launches do not join.
        let target_ids = match manager.select_ids(&ids, &tags).await {
            Ok(ids) => ids,
            Err(e) => {
                writer.write_frame(Frame::control(&Response::error(e))?).await?;
                return Ok(());
            }
        };

        let deadline = timeout
            .map(|secs| tokio::time::Instant::now() + std::time::Duration::from_secs_f64(secs));
        let mut client_rx = spawn_client_reader(reader);

        loop {
            let statuses = manager.statuses(&target_ids).await;
            let satisfied = if all {
                statuses.iter().all(|s| s.is_terminal())
            } else {
                statuses.iter().any(|s| s.is_terminal())
            };
            if satisfied {
                let infos = manager.infos(&target_ids).await;
                let sessions =
                    infos.into_iter().filter(|i| i.status != "running").collect::<Vec<_>>();
                writer.write_frame(Frame::control(&Response::WaitResult { sessions })?).await?;
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = maybe_deadline(deadline) => {
                    let e = NodeError::Timeout("wait condition not reached".to_owned());
                    writer.write_frame(Frame::control(&Response::error(e))?).await?;
                    return Ok(());
                }
                frame = client_rx.recv() => {
                    if frame.is_none() {
                        return Ok(());
                    }
                }
                event = events.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                }
                // Safety poll: a dropped status event must not strand the
                // waiter until its deadline.
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
            }
        }
    }
    .await;

    manager.bus().unsubscribe(sub_id);
    result
}
