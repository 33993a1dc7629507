// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `codewire` binary against a temp data dir and drives the
//! framed protocol over its Unix socket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use codewire::frame::{Frame, FrameRead, FrameReader, FrameWrite, FrameWriter};
use codewire::protocol::{Request, Response, SessionRef};

/// Resolve the path to the compiled `codewire` binary.
pub fn codewire_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("codewire")
}

/// A running codewire node and its data directory.
pub struct NodeProcess {
    child: Child,
    data_dir: Option<tempfile::TempDir>,
    pub socket_path: PathBuf,
}

impl NodeProcess {
    /// Start a node on a fresh temp data dir.
    pub fn start() -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        Self::start_in(data_dir)
    }

    /// Start a node on an existing data dir (restart scenarios).
    pub fn start_in(data_dir: tempfile::TempDir) -> anyhow::Result<Self> {
        let socket_path = data_dir.path().join("codewire.sock");
        let child = Command::new(codewire_binary())
            .arg("--data-dir")
            .arg(data_dir.path())
            .arg("--log-level")
            .arg("warn")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(Self { child, data_dir: Some(data_dir), socket_path })
    }

    pub fn data_dir(&self) -> &Path {
        match &self.data_dir {
            Some(dir) => dir.path(),
            None => Path::new("/nonexistent"),
        }
    }

    /// Wait until the Unix socket accepts connections.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("node socket never came up at {}", self.socket_path.display());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Open a fresh framed connection.
    pub async fn connect(&self) -> anyhow::Result<NodeClient> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(NodeClient {
            writer: FrameWriter::new(write_half),
            reader: FrameReader::new(read_half),
        })
    }

    /// One request, one reply, connection closed.
    pub async fn one_shot(&self, request: &Request) -> anyhow::Result<Response> {
        let mut client = self.connect().await?;
        client.send(request).await?;
        client.recv_response().await
    }

    /// Poll `GetStatus` until the session reaches `expected`.
    pub async fn wait_session_status(
        &self,
        id: u32,
        expected: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let reply =
                self.one_shot(&Request::GetStatus { target: SessionRef::by_id(id) }).await?;
            if let Response::SessionStatus { info, .. } = &reply {
                if info.status == expected {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("session {id} never reached {expected}: last reply {reply:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// SIGTERM the node and wait for a clean exit. Returns the exit code
    /// and the data dir for restart scenarios.
    pub fn stop(mut self) -> anyhow::Result<(i32, tempfile::TempDir)> {
        let pid = nix::unistd::Pid::from_raw(self.child.id() as i32);
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
        let status = self.child.wait()?;
        let data_dir = self.data_dir.take().ok_or_else(|| anyhow::anyhow!("data dir taken"))?;
        Ok((status.code().unwrap_or(-1), data_dir))
    }
}

impl Drop for NodeProcess {
    fn drop(&mut self) {
        // Best effort: both calls are harmless after `stop` has reaped.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One framed client connection.
pub struct NodeClient {
    pub writer: FrameWriter<OwnedWriteHalf>,
    pub reader: FrameReader<OwnedReadHalf>,
}

impl NodeClient {
    pub async fn send(&mut self, request: &Request) -> anyhow::Result<()> {
        self.writer.write_frame(Frame::control(request)?).await
    }

    pub async fn recv_frame(&mut self) -> anyhow::Result<Frame> {
        match self.reader.read_frame().await? {
            Some(frame) => Ok(frame),
            None => anyhow::bail!("connection closed"),
        }
    }

    /// Next Control frame parsed as a response (Data frames rejected).
    pub async fn recv_response(&mut self) -> anyhow::Result<Response> {
        self.recv_frame().await?.parse_control()
    }
}
