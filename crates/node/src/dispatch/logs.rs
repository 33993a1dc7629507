// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The logs flow: replay `output.log`, optionally following new bytes.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{spawn_client_reader, tail_line_slice, Connection};
use crate::ansi;
use crate::frame::Frame;
use crate::protocol::{Response, SessionRef};

/// Follow mode polls the log file at this interval.
const FOLLOW_POLL: Duration = Duration::from_millis(500);

pub(super) async fn run(
    conn: Connection,
    target: SessionRef,
    follow: bool,
    tail_lines: Option<usize>,
    strip_ansi: Option<bool>,
) -> anyhow::Result<()> {
    let Connection { reader, mut writer, manager, shutdown } = conn;

    let path = match manager.resolve(&target).await {
        Ok(id) => match manager.log_path(id).await {
            Ok(path) => path,
            Err(e) => {
                writer.write_frame(Frame::control(&Response::error(e))?).await?;
                return Ok(());
            }
        },
        Err(e) => {
            writer.write_frame(Frame::control(&Response::error(e))?).await?;
            return Ok(());
        }
    };
    let strip = strip_ansi.unwrap_or(true);

    let contents = tokio::fs::read(&path).await.unwrap_or_default();
    let sliced = match tail_lines {
        Some(n) => tail_line_slice(&contents, n),
        None => &contents[..],
    };
    writer
        .write_frame(Frame::control(&Response::LogData {
            data: render(sliced, strip),
            done: !follow,
        })?)
        .await?;
    if !follow {
        return Ok(());
    }

    let mut offset = contents.len() as u64;
    let mut client_rx = spawn_client_reader(reader);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = client_rx.recv() => {
                if frame.is_none() {
                    break;
                }
            }
            _ = tokio::time::sleep(FOLLOW_POLL) => {
                let new_bytes = read_from(&path, offset).await;
                if !new_bytes.is_empty() {
                    offset += new_bytes.len() as u64;
                    writer
                        .write_frame(Frame::control(&Response::LogData {
                            data: render(&new_bytes, strip),
                            done: false,
                        })?)
                        .await?;
                }
            }
        }
    }
    Ok(())
}

fn render(bytes: &[u8], strip: bool) -> String {
    if strip {
        String::from_utf8_lossy(&ansi::strip_ansi(bytes)).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

async fn read_from(path: &std::path::Path, offset: u64) -> Vec<u8> {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return Vec::new();
    };
    if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
        return Vec::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).await.is_err() {
        return Vec::new();
    }
    buf
}
