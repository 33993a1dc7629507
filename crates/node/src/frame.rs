// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Length-prefixed binary frames: `[type: u8][length: u32 BE][payload]`.
//!
//! Type 0x00 carries UTF-8 JSON control messages, 0x01 opaque data bytes.
//! The codec is shared by the Unix-socket transport (async reader/writer
//! over stream halves) and the WebSocket transport (whole-buffer
//! encode/decode per binary message) through the `FrameRead`/`FrameWrite`
//! traits.

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this payload size are rejected outright.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const TYPE_CONTROL: u8 = 0x00;
const TYPE_DATA: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON control message.
    Control(String),
    /// Opaque bytes (PTY input/output).
    Data(Bytes),
}

impl Frame {
    /// Build a Control frame from any serialisable message.
    pub fn control<T: Serialize>(msg: &T) -> anyhow::Result<Self> {
        Ok(Self::Control(serde_json::to_string(msg)?))
    }

    /// Parse a Control frame's JSON payload.
    pub fn parse_control<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        match self {
            Self::Control(json) => serde_json::from_str(json).context("invalid control payload"),
            Self::Data(_) => bail!("expected a control frame, got a data frame"),
        }
    }

    fn type_byte(&self) -> u8 {
        match self {
            Self::Control(_) => TYPE_CONTROL,
            Self::Data(_) => TYPE_DATA,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Control(json) => json.as_bytes(),
            Self::Data(bytes) => bytes,
        }
    }

    /// Serialise into a standalone buffer (WebSocket message payloads).
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut buf = Vec::with_capacity(5 + payload.len());
        buf.push(self.type_byte());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    /// Parse one complete frame from a standalone buffer.
    pub fn decode(buf: &[u8]) -> anyhow::Result<Self> {
        if buf.len() < 5 {
            bail!("frame truncated: {} bytes", buf.len());
        }
        let frame_type = buf[0];
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if len > MAX_FRAME_LEN {
            bail!("frame length {len} exceeds {MAX_FRAME_LEN}");
        }
        let payload = &buf[5..];
        if payload.len() != len as usize {
            bail!("frame length mismatch: header {len}, payload {}", payload.len());
        }
        from_parts(frame_type, payload.to_vec())
    }
}

fn from_parts(frame_type: u8, payload: Vec<u8>) -> anyhow::Result<Frame> {
    match frame_type {
        TYPE_CONTROL => {
            let json = String::from_utf8(payload).context("control frame is not UTF-8")?;
            Ok(Frame::Control(json))
        }
        TYPE_DATA => Ok(Frame::Data(Bytes::from(payload))),
        other => bail!("unknown frame type 0x{other:02x}"),
    }
}

/// Read side of a frame transport.
#[async_trait]
pub trait FrameRead: Send {
    /// Next frame, or `None` on a clean EOF at a frame boundary.
    async fn read_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

/// Write side of a frame transport.
#[async_trait]
pub trait FrameWrite: Send {
    async fn write_frame(&mut self, frame: Frame) -> anyhow::Result<()>;
}

/// Frame reader over any byte stream (Unix socket read half).
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameRead for FrameReader<R> {
    async fn read_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        let mut type_buf = [0u8; 1];
        match self.inner.read_exact(&mut type_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = self.inner.read_u32().await.context("frame header truncated")?;
        if len > MAX_FRAME_LEN {
            bail!("frame length {len} exceeds {MAX_FRAME_LEN}");
        }
        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).await.context("frame payload truncated")?;
        Ok(Some(from_parts(type_buf[0], payload)?))
    }
}

/// Frame writer over any byte stream (Unix socket write half).
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameWrite for FrameWriter<W> {
    async fn write_frame(&mut self, frame: Frame) -> anyhow::Result<()> {
        let payload = frame.payload();
        if payload.len() as u64 > MAX_FRAME_LEN as u64 {
            bail!("frame length {} exceeds {MAX_FRAME_LEN}", payload.len());
        }
        self.inner.write_u8(frame.type_byte()).await?;
        self.inner.write_u32(payload.len() as u32).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
