// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The watch flow: one-way output streaming without PTY input.

use super::{spawn_client_reader, tail_line_slice, Connection};
use crate::error::NodeError;
use crate::frame::Frame;
use crate::protocol::{Response, SessionRef};

pub(super) async fn run(
    conn: Connection,
    target: SessionRef,
    include_history: bool,
    tail_lines: Option<usize>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let id = match manager.resolve(&target).await {
        Ok(id) => id,
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };
    let session = match manager.get_live(id).await {
        Ok(session) => session,
        // A watch on a finished session reports its terminal state once.
        Err(NodeError::NotRunning { status, .. }) => {
            writer
                .write_frame(Frame::control(&Response::WatchUpdate {
                    status,
                    output: None,
                    done: true,
                })?)
                .await?;
            return Ok(());
        }
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };

    let (sub_id, mut output) = session.subscribe_output();
    let mut status_rx = session.status_watch();

    let result: anyhow::Result<()> = async {
        if include_history {
            let history = tokio::fs::read(session.output_path()).await.unwrap_or_default();
            let history = match tail_lines {
                Some(n) => tail_line_slice(&history, n),
                None => &history[..],
            };
            if !history.is_empty() {
                writer
                    .write_frame(Frame::control(&Response::WatchUpdate {
                        status: "running".to_owned(),
                        output: Some(String::from_utf8_lossy(history).into_owned()),
                        done: false,
                    })?)
                    .await?;
            }
        }

        if status_rx.borrow_and_update().is_terminal() {
            writer
                .write_frame(Frame::control(&Response::WatchUpdate {
                    status: session.status().canonical(),
                    output: None,
                    done: true,
                })?)
                .await?;
            return Ok(());
        }

        let mut client_rx = spawn_client_reader(reader);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                chunk = output.recv() => match chunk {
                    Some(bytes) => {
                        writer
                            .write_frame(Frame::control(&Response::WatchUpdate {
                                status: "running".to_owned(),
                                output: Some(String::from_utf8_lossy(&bytes).into_owned()),
                                done: false,
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
                changed = status_rx.changed() => {
                    let status = *status_rx.borrow_and_update();
                    if changed.is_err() || status.is_terminal() {
                        let terminal = status.is_terminal();
                        let canonical = status.canonical();
                        writer
                            .write_frame(Frame::control(&Response::WatchUpdate {
                                status: canonical,
                                output: None,
                                done: terminal,
                            })?)
                            .await?;
                        if terminal {
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    session.unsubscribe_output(sub_id);
    result
}
