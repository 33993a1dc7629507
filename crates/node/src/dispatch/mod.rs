// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection request dispatch.
//!
//! One connection, one task. The first frame must be a Control frame
//! carrying a JSON [`Request`]; one-shot operations reply and close, the
//! long-lived flows (`Attach`, `WatchSession`, `Subscribe`, `Wait`,
//! `MsgRequest`, `MsgListen`, `Logs --follow`) keep streaming until a
//! terminator frame, client disconnect, or node shutdown.

mod attach;
mod logs;
mod msg;
mod subscribe;
mod wait;
mod watch;
pub mod ws;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NodeError;
use crate::frame::{Frame, FrameRead, FrameWrite};
use crate::manager::{validate_name, SessionManager};
use crate::protocol::{Request, Response};
use crate::session::LaunchSpec;

pub struct Connection {
    pub reader: Box<dyn FrameRead>,
    pub writer: Box<dyn FrameWrite>,
    pub manager: Arc<SessionManager>,
    pub shutdown: CancellationToken,
}

impl Connection {
    /// Drive the connection to completion.
    pub async fn run(mut self) {
        let first = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            frame = self.reader.read_frame() => frame,
        };
        let request = match first {
            Ok(Some(frame)) => match frame.parse_control::<Request>() {
                Ok(request) => request,
                Err(e) => {
                    let _ = self.send(Response::error(format!("invalid request: {e}"))).await;
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                debug!("connection read failed before first request: {e}");
                return;
            }
        };
        if let Err(e) = self.dispatch(request).await {
            debug!("connection ended: {e}");
        }
    }

    async fn send(&mut self, response: Response) -> anyhow::Result<()> {
        self.writer.write_frame(Frame::control(&response)?).await
    }

    /// Reply a typed error; one-shot connections close afterwards.
    async fn send_error(&mut self, err: NodeError) -> anyhow::Result<()> {
        self.send(Response::error(err)).await
    }

    async fn dispatch(mut self, request: Request) -> anyhow::Result<()> {
        match request {
            Request::ListSessions {} => {
                let sessions = self.manager.list().await;
                self.send(Response::SessionList { sessions }).await
            }
            Request::Launch { command, working_dir, env, stdin_data, name, tags } => {
                self.handle_launch(command, working_dir, env, stdin_data, name, tags).await
            }
            Request::Kill { target } => {
                let id = match self.manager.resolve(&target).await {
                    Ok(id) => id,
                    Err(e) => return self.send_error(e).await,
                };
                match self.manager.kill(id).await {
                    Ok(()) => self.send(Response::Killed { id }).await,
                    Err(e) => self.send_error(e).await,
                }
            }
            Request::KillAll {} => {
                let count = self.manager.kill_all().await;
                self.send(Response::KilledAll { count }).await
            }
            Request::KillByTags { tags } => {
                let count = self.manager.kill_by_tags(&tags).await;
                self.send(Response::KilledAll { count }).await
            }
            Request::Resize { target, cols, rows } => {
                if cols == 0 || rows == 0 {
                    return self
                        .send_error(NodeError::InvalidRequest(
                            "cols and rows must be positive".to_owned(),
                        ))
                        .await;
                }
                let result = match self.manager.resolve(&target).await {
                    Ok(id) => match self.manager.get_live(id).await {
                        Ok(session) => session
                            .resize(cols, rows)
                            .map(|()| id)
                            .map_err(|e| NodeError::InvalidRequest(e.to_string())),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                match result {
                    Ok(id) => self.send(Response::Resized { id, cols, rows }).await,
                    Err(e) => self.send_error(e).await,
                }
            }
            Request::Detach { target } => {
                // Out-of-attach detach is an echo; the bridging loop handles
                // the in-attach variant.
                match self.manager.resolve(&target).await {
                    Ok(id) => self.send(Response::Detached { id }).await,
                    Err(e) => self.send_error(e).await,
                }
            }
            Request::SendInput { target, data } => {
                let result = match self.manager.resolve(&target).await {
                    Ok(id) => self.manager.send_input(id, Bytes::from(data.into_bytes())).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(bytes) => self.send(Response::InputSent { bytes }).await,
                    Err(e) => self.send_error(e).await,
                }
            }
            Request::GetStatus { target } => {
                let result = match self.manager.resolve(&target).await {
                    Ok(id) => self.manager.status_of(id).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(info) => {
                        let output_size = info.output_size_bytes.unwrap_or(0);
                        self.send(Response::SessionStatus { info, output_size }).await
                    }
                    Err(e) => self.send_error(e).await,
                }
            }
            Request::Logs { target, follow, tail_lines, strip_ansi } => {
                logs::run(self, target, follow, tail_lines, strip_ansi).await
            }
            Request::Attach { target, include_history, tail_lines } => {
                attach::run(self, target, include_history, tail_lines).await
            }
            Request::WatchSession { target, include_history, tail_lines } => {
                watch::run(self, target, include_history, tail_lines).await
            }
            Request::Subscribe { session_id, tags, event_types } => {
                subscribe::run(self, session_id, tags, event_types).await
            }
            Request::Unsubscribe {} => {
                self.send_error(NodeError::InvalidRequest(
                    "Unsubscribe is only valid inside a Subscribe stream".to_owned(),
                ))
                .await
            }
            Request::Wait { ids, tags, condition, timeout } => {
                wait::run(self, ids, tags, condition, timeout).await
            }
            Request::MsgSend { from, to, to_name, body } => {
                msg::send(self, from, to, to_name, body).await
            }
            Request::MsgRead { target, tail } => msg::read(self, target, tail).await,
            Request::MsgRequest { from, to, to_name, body, timeout } => {
                msg::request(self, from, to, to_name, body, timeout).await
            }
            Request::MsgReply { from, from_name, request_id, body } => {
                msg::reply(self, from, from_name, request_id, body).await
            }
            Request::MsgListen { target } => subscribe::listen(self, target).await,
            Request::KVSet { .. }
            | Request::KVGet { .. }
            | Request::KVDelete { .. }
            | Request::KVList { .. } => {
                self.send(Response::error("KV operations require relay mode")).await
            }
        }
    }

    async fn handle_launch(
        &mut self,
        command: Vec<String>,
        working_dir: String,
        env: Vec<String>,
        stdin_data: Option<String>,
        name: Option<String>,
        tags: Vec<String>,
    ) -> anyhow::Result<()> {
        if command.is_empty() {
            return self
                .send_error(NodeError::InvalidRequest("command must not be empty".to_owned()))
                .await;
        }
        // Validate the name before spawning so a typo does not burn a PTY.
        if let Some(name) = &name {
            if let Err(e) = validate_name(name) {
                return self.send_error(e).await;
            }
        }
        let env = match parse_env_pairs(&env) {
            Ok(env) => env,
            Err(e) => return self.send_error(e).await,
        };

        let spec = LaunchSpec {
            command,
            working_dir: working_dir.into(),
            env,
            stdin_data: stdin_data.map(String::into_bytes),
            tags,
        };
        let id = match self.manager.launch(spec).await {
            Ok(id) => id,
            Err(e) => return self.send_error(e).await,
        };
        if let Some(name) = name {
            if let Err(e) = self.manager.set_name(id, &name).await {
                return self.send_error(e).await;
            }
        }
        self.send(Response::Launched { id }).await
    }
}

/// Parse `KEY=VALUE` environment overrides.
fn parse_env_pairs(pairs: &[String]) -> Result<Vec<(String, String)>, NodeError> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    NodeError::InvalidRequest(format!("env entry {pair:?} is not KEY=VALUE"))
                })
        })
        .collect()
}

/// Pump client frames into a channel so long-lived flows can read the
/// client concurrently with writing. The channel closes on disconnect.
fn spawn_client_reader(mut reader: Box<dyn FrameRead>) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("client read ended: {e}");
                    break;
                }
            }
        }
    });
    rx
}

/// The trailing `lines` lines of a byte buffer (whole buffer when it has
/// fewer lines).
fn tail_line_slice(data: &[u8], lines: usize) -> &[u8] {
    if lines == 0 {
        return data;
    }
    let mut seen = 0;
    for (idx, &byte) in data.iter().enumerate().rev() {
        if byte == b'\n' {
            // A trailing newline terminates the last line rather than
            // starting a new one.
            if idx == data.len() - 1 {
                continue;
            }
            seen += 1;
            if seen == lines {
                return &data[idx + 1..];
            }
        }
    }
    data
}

/// Sleep until an optional deadline; pends forever when there is none.
async fn maybe_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
