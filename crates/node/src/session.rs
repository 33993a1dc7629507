// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A live session: one PTY-backed child process plus the fan-out machinery
//! around it.
//!
//! Every session owns three long-running tasks: the reader (PTY → log file,
//! broadcaster, counters), the writer (input queue → PTY), and the reaper
//! (child wait → finalisation, spawned by the manager). The reader and
//! writer never block on a consumer; slow attachers drop chunks, full input
//! queues reject with `Backpressure`.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use nix::libc;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ansi;
use crate::broadcast::{Broadcaster, SubId, ATTACH_BUFFER};
use crate::bus::SubscriptionBus;
use crate::error::NodeError;
use crate::event::Event;
use crate::event_log::EventLog;
use crate::meta::SessionMeta;
use crate::pty::{self, PtyProcess, SpawnOptions};
use crate::ring::OutputRing;
use crate::status::{SessionStatus, StatusCell};

/// PTY read buffer size; chunks delivered to consumers are at most this big.
const READ_CHUNK: usize = 4096;
/// Input queue depth; the writer drains it into the PTY.
pub const INPUT_QUEUE_DEPTH: usize = 256;
/// Bytes of recent output retained for `last_output_snippet`.
const SNIPPET_RING: usize = 4096;
/// Maximum snippet length in characters.
const SNIPPET_LEN: usize = 160;
/// Debounce between `session.output_summary` events.
const SUMMARY_DEBOUNCE: Duration = Duration::from_secs(2);

/// Default PTY geometry until a client resizes.
pub const DEFAULT_COLS: u16 = 200;
pub const DEFAULT_ROWS: u16 = 50;

/// Everything needed to launch a session.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin_data: Option<Vec<u8>>,
    pub tags: Vec<String>,
}

/// Join handles for the per-session reader and writer tasks; the reaper
/// awaits these before the session record is retired.
pub(crate) struct SessionTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Handle returned by [`Session::attach`]; pass it back to
/// [`Session::detach`] when the client leaves.
pub struct AttachHandle {
    pub sub_id: SubId,
    pub output: mpsc::Receiver<Bytes>,
    pub input: mpsc::Sender<Bytes>,
    pub status: watch::Receiver<SessionStatus>,
}

pub struct Session {
    pub id: u32,
    meta: Mutex<SessionMeta>,
    status: StatusCell,
    broadcaster: Broadcaster,
    pty: PtyProcess,
    input_tx: mpsc::Sender<Bytes>,
    output_bytes: AtomicU64,
    output_lines: AtomicU64,
    /// Unix nanos of the last PTY read; 0 = no output yet.
    last_output_at: AtomicU64,
    attach_count: AtomicU32,
    events: EventLog,
    messages: EventLog,
    output_path: PathBuf,
    snippet: Mutex<OutputRing>,
    tags: HashSet<String>,
    bus: Arc<SubscriptionBus>,
}

impl Session {
    /// Spawn the child on a fresh PTY and start the reader/writer tasks.
    ///
    /// `session_dir` is `<data_dir>/sessions/<id>`; it is created here along
    /// with `output.log`, `events.jsonl`, and `messages.jsonl`. The
    /// `session.created` event is the first line of `events.jsonl`.
    pub(crate) fn spawn(
        id: u32,
        spec: &LaunchSpec,
        session_dir: &Path,
        bus: Arc<SubscriptionBus>,
    ) -> Result<(Arc<Self>, SessionTasks), NodeError> {
        std::fs::create_dir_all(session_dir)
            .map_err(|e| NodeError::SpawnFailed(format!("create {}: {e}", session_dir.display())))?;

        let pty = PtyProcess::spawn(&SpawnOptions {
            command: &spec.command,
            working_dir: &spec.working_dir,
            env_overrides: &spec.env,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        })?;

        let output_path = session_dir.join("output.log");
        let output_log = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o644)
            .open(&output_path)
            .map_err(|e| NodeError::SpawnFailed(format!("open output.log: {e}")))?;
        let events = EventLog::open(session_dir.join("events.jsonl"))
            .map_err(|e| NodeError::SpawnFailed(format!("open events.jsonl: {e}")))?;
        let messages = EventLog::open(session_dir.join("messages.jsonl"))
            .map_err(|e| NodeError::SpawnFailed(format!("open messages.jsonl: {e}")))?;

        let working_dir = spec.working_dir.to_string_lossy().into_owned();
        let meta = SessionMeta {
            id,
            name: None,
            prompt: command_display(&spec.command),
            working_dir: working_dir.clone(),
            created_at: Utc::now(),
            status: SessionStatus::Running.canonical(),
            pid: Some(pty.pid()),
            tags: spec.tags.clone(),
            exit_code: None,
            completed_at: None,
        };

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        if let Some(data) = &spec.stdin_data {
            // Queued before the writer starts; delivered as its first write.
            let _ = input_tx.try_send(Bytes::from(data.clone()));
        }

        let session = Arc::new(Self {
            id,
            meta: Mutex::new(meta),
            status: StatusCell::new(),
            broadcaster: Broadcaster::new(),
            pty,
            input_tx,
            output_bytes: AtomicU64::new(0),
            output_lines: AtomicU64::new(0),
            last_output_at: AtomicU64::new(0),
            attach_count: AtomicU32::new(0),
            events,
            messages,
            output_path,
            snippet: Mutex::new(OutputRing::new(SNIPPET_RING)),
            tags: spec.tags.iter().cloned().collect(),
            bus,
        });

        let created = Event::created(&spec.command, &working_dir, &spec.tags);
        if let Err(e) = session.events.append(&created) {
            warn!(id, "failed to append session.created: {e}");
        }
        session.publish(&created);

        let reader = tokio::spawn(reader_task(Arc::clone(&session), output_log));
        let writer = tokio::spawn(writer_task(Arc::clone(&session), input_rx));
        Ok((session, SessionTasks { reader, writer }))
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.watch()
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn attach_count(&self) -> u32 {
        self.attach_count.load(Ordering::Acquire)
    }

    pub(crate) fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn messages(&self) -> &EventLog {
        &self.messages
    }

    pub(crate) fn exit_wait(&self) -> crate::pty::ExitWait {
        self.pty.exit_wait()
    }

    pub fn meta_name(&self) -> Option<String> {
        self.meta.lock().name.clone()
    }

    pub(crate) fn set_meta_name(&self, name: Option<String>) {
        self.meta.lock().name = name;
    }

    /// Current metadata with the status string synchronised to the live cell.
    pub fn meta_snapshot(&self) -> SessionMeta {
        let mut meta = self.meta.lock().clone();
        meta.status = self.status.get().canonical();
        meta
    }

    /// Fan an event out through the bus under this session's id and tags.
    pub(crate) fn publish(&self, event: &Event) {
        self.bus.publish(self.id, &self.tags, event);
    }

    /// Register an interactive consumer. Fails once the session is terminal.
    pub fn attach(&self) -> Result<AttachHandle, NodeError> {
        let status = self.status.get();
        if status.is_terminal() {
            return Err(NodeError::NotRunning { id: self.id, status: status.canonical() });
        }
        let count = self.attach_count.fetch_add(1, Ordering::AcqRel) + 1;
        let (sub_id, output) = self.broadcaster.subscribe(ATTACH_BUFFER);
        let event = Event::attached(count);
        if let Err(e) = self.events.append(&event) {
            warn!(id = self.id, "failed to append session.attached: {e}");
        }
        self.publish(&event);
        Ok(AttachHandle {
            sub_id,
            output,
            input: self.input_tx.clone(),
            status: self.status.watch(),
        })
    }

    /// Release an attach subscription and decrement the count. Pass the
    /// `sub_id` from the corresponding [`AttachHandle`].
    pub fn detach(&self, sub_id: SubId) {
        self.broadcaster.unsubscribe(sub_id);
        let prev = self.attach_count.fetch_sub(1, Ordering::AcqRel);
        let event = Event::detached(prev.saturating_sub(1));
        if let Err(e) = self.events.append(&event) {
            warn!(id = self.id, "failed to append session.detached: {e}");
        }
        self.publish(&event);
    }

    /// Watch-style output subscription (no input side, no attach count).
    pub fn subscribe_output(&self) -> (SubId, mpsc::Receiver<Bytes>) {
        self.broadcaster.subscribe(ATTACH_BUFFER)
    }

    pub fn unsubscribe_output(&self, sub: SubId) {
        self.broadcaster.unsubscribe(sub);
    }

    /// Non-blocking stdin write; `Backpressure` when the queue is full.
    pub fn write_stdin(&self, data: Bytes) -> Result<(), NodeError> {
        let status = self.status.get();
        if status.is_terminal() {
            return Err(NodeError::NotRunning { id: self.id, status: status.canonical() });
        }
        self.input_tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NodeError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => NodeError::NotRunning {
                id: self.id,
                status: self.status.get().canonical(),
            },
        })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.pty.resize(cols, rows)
    }

    /// Transition to `Killed` and SIGTERM the child's process group.
    ///
    /// Idempotent: a second call neither re-transitions nor signals a reaped
    /// pid. Cleanup is the reaper's job; this never waits.
    pub fn kill(&self) -> bool {
        let transitioned = self.status.set(SessionStatus::Killed);
        self.pty.signal(Signal::SIGTERM);
        transitioned
    }

    /// Record the child's exit. Returns the terminal `session.status` event
    /// for the reaper to append and publish. `Killed` set by an earlier
    /// `kill` wins over the reaped `Completed`.
    pub(crate) fn finalize(&self, exit_code: i32) -> Event {
        self.status.set(SessionStatus::Completed(exit_code));
        let final_status = self.status.get();
        let mut meta = self.meta.lock();
        meta.exit_code = Some(exit_code);
        meta.completed_at = Some(Utc::now());
        meta.status = final_status.canonical();
        meta.pid = None;
        Event::status("running", &final_status.canonical(), Some(exit_code))
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes.load(Ordering::Acquire)
    }

    pub fn output_lines(&self) -> u64 {
        self.output_lines.load(Ordering::Acquire)
    }

    pub fn last_output_at(&self) -> Option<DateTime<Utc>> {
        let nanos = self.last_output_at.load(Ordering::Acquire);
        if nanos == 0 {
            return None;
        }
        Some(Utc.timestamp_nanos(nanos as i64))
    }

    pub fn last_output_snippet(&self) -> Option<String> {
        let tail = self.snippet.lock().tail(SNIPPET_RING);
        ansi::last_line_snippet(&tail, SNIPPET_LEN)
    }

    pub fn output_size_bytes(&self) -> Option<u64> {
        std::fs::metadata(&self.output_path).ok().map(|m| m.len())
    }
}

/// Display string of a full command line, quoting arguments with whitespace.
pub fn command_display(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("{arg:?}")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn unix_nanos_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// The critical fan-out path: owns the PTY read end until EOF/EIO.
async fn reader_task(session: Arc<Session>, mut output_log: File) {
    let master = session.pty.master();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending_bytes = 0u64;
    let mut pending_lines = 0u64;
    let mut last_summary = Instant::now();

    loop {
        match pty::read_chunk(&master, &mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if let Err(e) = output_log.write_all(&chunk) {
                    warn!(id = session.id, "output.log write failed: {e}");
                }
                session.broadcaster.send(chunk);

                let lines = buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
                session.output_bytes.fetch_add(n as u64, Ordering::AcqRel);
                session.output_lines.fetch_add(lines, Ordering::AcqRel);
                session.last_output_at.store(unix_nanos_now(), Ordering::Release);
                session.snippet.lock().write(&buf[..n]);

                pending_bytes += n as u64;
                pending_lines += lines;
                if last_summary.elapsed() >= SUMMARY_DEBOUNCE {
                    emit_summary(&session, &mut pending_bytes, &mut pending_lines);
                    last_summary = Instant::now();
                }
            }
            // EIO: child exited and released the slave side.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => {
                warn!(id = session.id, "pty read error: {e}");
                break;
            }
        }
    }

    if pending_bytes > 0 {
        emit_summary(&session, &mut pending_bytes, &mut pending_lines);
    }
    debug!(id = session.id, "reader task exited");
}

fn emit_summary(session: &Session, bytes: &mut u64, lines: &mut u64) {
    let event = Event::output_summary(*bytes, *lines);
    if let Err(e) = session.events.append(&event) {
        warn!(id = session.id, "failed to append output summary: {e}");
    }
    session.publish(&event);
    *bytes = 0;
    *lines = 0;
}

/// Drains the input queue into the PTY; exits on queue close, terminal
/// status, or write failure after child death.
async fn writer_task(session: Arc<Session>, mut input_rx: mpsc::Receiver<Bytes>) {
    let master = session.pty.master();
    let mut status_rx = session.status.watch();
    loop {
        tokio::select! {
            item = input_rx.recv() => match item {
                Some(data) => {
                    if let Err(e) = pty::write_all(&master, &data).await {
                        debug!(id = session.id, "pty write failed: {e}");
                        break;
                    }
                }
                None => break,
            },
            changed = status_rx.changed() => {
                if changed.is_err() || status_rx.borrow_and_update().is_terminal() {
                    break;
                }
            }
        }
    }
    debug!(id = session.id, "writer task exited");
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
