// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The attach flow: bidirectional bridge between a client connection and a
//! session's PTY.

use bytes::Bytes;
use tracing::debug;

use super::{spawn_client_reader, tail_line_slice, Connection};
use crate::frame::Frame;
use crate::protocol::{Request, Response, SessionRef};

/// History replay is chunked into Data frames of at most this size.
const HISTORY_CHUNK: usize = 64 * 1024;

pub(super) async fn run(
    conn: Connection,
    target: SessionRef,
    include_history: bool,
    tail_lines: Option<usize>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let resolved = match manager.resolve(&target).await {
        Ok(id) => manager.get_live(id).await,
        Err(e) => Err(e),
    };
    let session = match resolved {
        Ok(session) => session,
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };
    let handle = match session.attach() {
        Ok(handle) => handle,
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };
    let id = session.id;
    let sub_id = handle.sub_id;
    let mut output = handle.output;
    let mut status_rx = handle.status;

    let result: anyhow::Result<()> = async {
        writer.write_frame(Frame::control(&Response::Attached { id })?).await?;

        if include_history {
            // Raw bytes so cursor control survives replay.
            let history = tokio::fs::read(session.output_path()).await.unwrap_or_default();
            let history = match tail_lines {
                Some(n) => tail_line_slice(&history, n),
                None => &history[..],
            };
            for chunk in history.chunks(HISTORY_CHUNK) {
                writer.write_frame(Frame::Data(Bytes::copy_from_slice(chunk))).await?;
            }
        }

        // A transition may have slipped in between attach() and here; mark
        // the current level seen so the select below cannot miss the edge.
        if status_rx.borrow_and_update().is_terminal() {
            let status = session.status().canonical();
            writer
                .write_frame(Frame::control(&Response::error(format!("session {status}")))?)
                .await?;
            return Ok(());
        }

        let mut client_rx = spawn_client_reader(reader);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                chunk = output.recv() => match chunk {
                    Some(bytes) => writer.write_frame(Frame::Data(bytes)).await?,
                    None => break,
                },
                frame = client_rx.recv() => match frame {
                    Some(Frame::Data(bytes)) => {
                        // Non-blocking; a full input queue drops this write.
                        if let Err(e) = session.write_stdin(bytes) {
                            debug!(id, "attach input dropped: {e}");
                        }
                    }
                    Some(Frame::Control(json)) => {
                        match serde_json::from_str::<Request>(&json) {
                            Ok(Request::Detach { .. }) => {
                                writer
                                    .write_frame(Frame::control(&Response::Detached { id })?)
                                    .await?;
                                break;
                            }
                            Ok(Request::Resize { cols, rows, .. }) => {
                                if let Err(e) = session.resize(cols, rows) {
                                    debug!(id, "resize failed: {e}");
                                }
                            }
                            Ok(other) => debug!(id, "ignoring control frame in attach: {other:?}"),
                            Err(e) => debug!(id, "ignoring unparseable control frame: {e}"),
                        }
                    }
                    None => break,
                },
                changed = status_rx.changed() => {
                    if changed.is_err() || status_rx.borrow_and_update().is_terminal() {
                        let status = session.status().canonical();
                        let _ = writer
                            .write_frame(Frame::control(&Response::error(format!(
                                "session {status}"
                            )))?)
                            .await;
                        break;
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    session.detach(sub_id);
    result
}
