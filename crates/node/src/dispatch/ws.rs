// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional WebSocket endpoint speaking the same frame protocol.
//!
//! Each WS binary message carries exactly one encoded frame; text messages
//! are accepted as Control frames for convenience. The dispatcher is shared
//! with the Unix-socket transport through the frame traits.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::Connection;
use crate::frame::{Frame, FrameRead, FrameWrite};
use crate::manager::SessionManager;

pub struct WsState {
    pub manager: Arc<SessionManager>,
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(
    State(state): State<Arc<WsState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<WsState>, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let conn = Connection {
        reader: Box::new(WsFrameReader { stream }),
        writer: Box::new(WsFrameWriter { sink }),
        manager: Arc::clone(&state.manager),
        shutdown: state.shutdown.clone(),
    };
    conn.run().await;
}

struct WsFrameReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameRead for WsFrameReader {
    async fn read_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Binary(buf))) => return Frame::decode(&buf).map(Some),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Control(text.to_string())))
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
            }
        }
    }
}

struct WsFrameWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWrite for WsFrameWriter {
    async fn write_frame(&mut self, frame: Frame) -> anyhow::Result<()> {
        self.sink
            .send(Message::Binary(frame.encode().into()))
            .await
            .map_err(|e| anyhow::anyhow!("websocket send failed: {e}"))
    }
}
