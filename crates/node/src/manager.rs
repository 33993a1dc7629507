// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: creation, lookup, naming, group kills, persistence
//! triggers, message routing, and the request/reply correlator.
//!
//! `sessions` and `name_index` live under one RwLock so concurrent
//! `set_name` and reaper-side name release serialise. Each launched session
//! gets a reaper task here that waits for the child, finalises the record,
//! releases the name, and only then appends/publishes the terminal
//! `session.status` event, so a rapid launch-then-reuse of a name is safe.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::LazyLock;

use bytes::Bytes;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use crate::broadcast::SubId;
use crate::bus::SubscriptionBus;
use crate::error::NodeError;
use crate::event::Event;
use crate::event_log::{self, EventLog};
use crate::meta::{MetaStore, SessionMeta};
use crate::protocol::{SessionInfo, SessionRef};
use crate::session::{unix_nanos_now, LaunchSpec, Session, SessionTasks};
use crate::status::SessionStatus;

#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]{0,31}$").unwrap()
});

/// Validate a session name against the naming grammar.
pub fn validate_name(name: &str) -> Result<(), NodeError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(NodeError::InvalidRequest(format!(
            "invalid name {name:?}: must match [a-zA-Z0-9][a-zA-Z0-9-]{{0,31}}"
        )))
    }
}

/// A delivered reply for a pending `MsgRequest`.
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    pub request_id: String,
    pub body: Value,
    pub from_id: u32,
    pub from_name: Option<String>,
}

struct SessionRecord {
    /// Authoritative once `live` is gone; refreshed from the live session
    /// by `refresh_statuses` and the reaper.
    meta: SessionMeta,
    live: Option<Arc<Session>>,
}

impl SessionRecord {
    fn name(&self) -> Option<String> {
        match &self.live {
            Some(session) => session.meta_name(),
            None => self.meta.name.clone(),
        }
    }

    fn tags(&self) -> HashSet<String> {
        match &self.live {
            Some(session) => session.tags().clone(),
            None => self.meta.tags.iter().cloned().collect(),
        }
    }

    fn status(&self) -> SessionStatus {
        match &self.live {
            Some(session) => session.status(),
            None => self.meta.status_enum(),
        }
    }
}

#[derive(Default)]
struct Registry {
    records: BTreeMap<u32, SessionRecord>,
    name_index: HashMap<String, u32>,
}

/// Where a message endpoint's log lives.
enum Endpoint {
    Live(Arc<Session>),
    Dead { path: PathBuf, tags: HashSet<String> },
}

pub struct SessionManager {
    registry: RwLock<Registry>,
    next_id: AtomicU32,
    bus: Arc<SubscriptionBus>,
    pending: Mutex<HashMap<String, oneshot::Sender<ReplyMessage>>>,
    store: MetaStore,
    data_dir: PathBuf,
    persist_tx: mpsc::Sender<()>,
}

impl SessionManager {
    /// Restore persisted state and build the manager. Returns the receiver
    /// side of the one-slot persist trigger for the node's persister task.
    pub fn new(data_dir: impl Into<PathBuf>) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<()>)> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join("sessions"))?;

        let store = MetaStore::new(&data_dir);
        let loaded = store.load()?;
        info!(
            restored = loaded.metas.len(),
            next_id = loaded.next_id,
            "session metadata restored"
        );

        let mut records = BTreeMap::new();
        for meta in loaded.metas {
            records.insert(meta.id, SessionRecord { meta, live: None });
        }

        // Capacity 1: a burst of triggers coalesces into one persist.
        let (persist_tx, persist_rx) = mpsc::channel(1);
        let manager = Arc::new(Self {
            registry: RwLock::new(Registry { records, name_index: HashMap::new() }),
            next_id: AtomicU32::new(loaded.next_id),
            bus: Arc::new(SubscriptionBus::new()),
            pending: Mutex::new(HashMap::new()),
            store,
            data_dir,
            persist_tx,
        });
        Ok((manager, persist_rx))
    }

    pub fn bus(&self) -> &Arc<SubscriptionBus> {
        &self.bus
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn session_dir(&self, id: u32) -> PathBuf {
        self.data_dir.join("sessions").join(id.to_string())
    }

    fn messages_path(&self, id: u32) -> PathBuf {
        self.session_dir(id).join("messages.jsonl")
    }

    /// Nudge the persister; coalesces when a persist is already queued.
    pub fn trigger_persist(&self) {
        let _ = self.persist_tx.try_send(());
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Spawn a session and register it. The id is consumed even when the
    /// spawn fails, keeping allocation strictly monotonic.
    pub async fn launch(self: &Arc<Self>, spec: LaunchSpec) -> Result<u32, NodeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let dir = self.session_dir(id);
        let (session, tasks) = Session::spawn(id, &spec, &dir, Arc::clone(&self.bus))?;
        let meta = session.meta_snapshot();
        {
            let mut reg = self.registry.write().await;
            reg.records.insert(id, SessionRecord { meta, live: Some(Arc::clone(&session)) });
        }
        self.spawn_reaper(session, tasks);
        self.trigger_persist();
        info!(id, "session launched");
        Ok(id)
    }

    /// Reaper: wait for the child, settle the reader, finalise, release the
    /// name, retire the live record, then append/publish `session.status`.
    fn spawn_reaper(self: &Arc<Self>, session: Arc<Session>, tasks: SessionTasks) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let wait = session.exit_wait();
            let exit_code = tokio::task::spawn_blocking(move || wait.wait()).await.unwrap_or(-1);

            // Reader drains the last PTY bytes and exits on EOF/EIO.
            let _ = tasks.reader.await;

            let id = session.id;
            let event = session.finalize(exit_code);

            // The writer observes the terminal status and exits.
            let _ = tasks.writer.await;

            {
                let mut reg = manager.registry.write().await;
                if let Some(name) = session.meta_name() {
                    if reg.name_index.get(&name) == Some(&id) {
                        reg.name_index.remove(&name);
                    }
                }
                if let Some(record) = reg.records.get_mut(&id) {
                    record.meta = session.meta_snapshot();
                    record.live = None;
                }
            }

            if let Err(e) = session.events().append(&event) {
                warn!(id, "failed to append terminal status event: {e}");
            }
            session.publish(&event);
            manager.trigger_persist();
            debug!(id, exit_code, "session reaped");
        });
    }

    /// SIGTERM one session's process group. No-op when already terminal.
    pub async fn kill(&self, id: u32) -> Result<(), NodeError> {
        let reg = self.registry.read().await;
        let record = reg.records.get(&id).ok_or_else(|| NodeError::session_not_found(id))?;
        if let Some(session) = &record.live {
            session.kill();
        }
        Ok(())
    }

    pub async fn kill_all(&self) -> usize {
        let reg = self.registry.read().await;
        let mut count = 0;
        for record in reg.records.values() {
            if let Some(session) = &record.live {
                if !session.status().is_terminal() {
                    session.kill();
                    count += 1;
                }
            }
        }
        count
    }

    pub async fn kill_by_tags(&self, tags: &[String]) -> usize {
        let reg = self.registry.read().await;
        let mut count = 0;
        for record in reg.records.values() {
            if let Some(session) = &record.live {
                if !session.status().is_terminal()
                    && tags.iter().any(|t| session.tags().contains(t))
                {
                    session.kill();
                    count += 1;
                }
            }
        }
        count
    }

    // -- Naming ---------------------------------------------------------------

    /// Acquire or change a live session's name. Case-sensitive, unique among
    /// live sessions; renaming to the current name is a no-op.
    pub async fn set_name(&self, id: u32, name: &str) -> Result<(), NodeError> {
        validate_name(name)?;
        let mut reg = self.registry.write().await;
        let record = reg.records.get(&id).ok_or_else(|| NodeError::session_not_found(id))?;
        let Some(session) = record.live.clone() else {
            return Err(NodeError::NotRunning { id, status: record.meta.status.clone() });
        };
        if let Some(&owner) = reg.name_index.get(name) {
            if owner == id {
                return Ok(());
            }
            return Err(NodeError::NameInUse { name: name.to_owned(), owner });
        }
        if let Some(prev) = session.meta_name() {
            reg.name_index.remove(&prev);
        }
        session.set_meta_name(Some(name.to_owned()));
        reg.name_index.insert(name.to_owned(), id);
        if let Some(record) = reg.records.get_mut(&id) {
            record.meta.name = Some(name.to_owned());
        }
        drop(reg);
        self.trigger_persist();
        Ok(())
    }

    pub async fn resolve_name(&self, name: &str) -> Result<u32, NodeError> {
        let reg = self.registry.read().await;
        reg.name_index.get(name).copied().ok_or_else(|| NodeError::name_not_found(name))
    }

    /// Resolve an id-or-name reference to a session id.
    pub async fn resolve(&self, target: &SessionRef) -> Result<u32, NodeError> {
        if let Some(id) = target.id {
            let reg = self.registry.read().await;
            return if reg.records.contains_key(&id) {
                Ok(id)
            } else {
                Err(NodeError::session_not_found(id))
            };
        }
        if let Some(name) = &target.name {
            return self.resolve_name(name).await;
        }
        Err(NodeError::InvalidRequest("session id or name required".to_owned()))
    }

    // -- Introspection --------------------------------------------------------

    fn record_info(&self, record: &SessionRecord) -> SessionInfo {
        match &record.live {
            Some(session) => live_info(session),
            None => {
                let size = std::fs::metadata(self.session_dir(record.meta.id).join("output.log"))
                    .ok()
                    .map(|m| m.len());
                SessionInfo::from_meta(&record.meta, size)
            }
        }
    }

    /// Snapshot of every session, sorted by id.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let reg = self.registry.read().await;
        reg.records.values().map(|r| self.record_info(r)).collect()
    }

    /// Sessions whose tag set overlaps the filter.
    pub async fn list_by_tags(&self, tags: &[String]) -> Vec<SessionInfo> {
        let reg = self.registry.read().await;
        reg.records
            .values()
            .filter(|r| tags.iter().any(|t| r.tags().contains(t)))
            .map(|r| self.record_info(r))
            .collect()
    }

    pub async fn status_of(&self, id: u32) -> Result<SessionInfo, NodeError> {
        let reg = self.registry.read().await;
        let record = reg.records.get(&id).ok_or_else(|| NodeError::session_not_found(id))?;
        Ok(self.record_info(record))
    }

    pub async fn infos(&self, ids: &[u32]) -> Vec<SessionInfo> {
        let reg = self.registry.read().await;
        ids.iter()
            .filter_map(|id| reg.records.get(id))
            .map(|r| self.record_info(r))
            .collect()
    }

    /// Resolve a Wait selection to a fixed id set (ids must exist; tags add
    /// every overlapping session).
    pub async fn select_ids(&self, ids: &[u32], tags: &[String]) -> Result<Vec<u32>, NodeError> {
        let reg = self.registry.read().await;
        let mut out: Vec<u32> = Vec::new();
        for id in ids {
            if !reg.records.contains_key(id) {
                return Err(NodeError::session_not_found(*id));
            }
            if !out.contains(id) {
                out.push(*id);
            }
        }
        if !tags.is_empty() {
            for (id, record) in &reg.records {
                if tags.iter().any(|t| record.tags().contains(t)) && !out.contains(id) {
                    out.push(*id);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    pub async fn statuses(&self, ids: &[u32]) -> Vec<SessionStatus> {
        let reg = self.registry.read().await;
        ids.iter().filter_map(|id| reg.records.get(id)).map(|r| r.status()).collect()
    }

    pub async fn exists(&self, id: u32) -> bool {
        self.registry.read().await.records.contains_key(&id)
    }

    pub async fn log_path(&self, id: u32) -> Result<PathBuf, NodeError> {
        let reg = self.registry.read().await;
        if !reg.records.contains_key(&id) {
            return Err(NodeError::session_not_found(id));
        }
        Ok(self.session_dir(id).join("output.log"))
    }

    /// The live session behind `id`, or a typed error explaining why not.
    pub async fn get_live(&self, id: u32) -> Result<Arc<Session>, NodeError> {
        let reg = self.registry.read().await;
        let record = reg.records.get(&id).ok_or_else(|| NodeError::session_not_found(id))?;
        record
            .live
            .clone()
            .ok_or_else(|| NodeError::NotRunning { id, status: record.meta.status.clone() })
    }

    // -- Direct routing -------------------------------------------------------

    /// Queue stdin bytes and record a `session.input` event.
    pub async fn send_input(&self, id: u32, data: Bytes) -> Result<usize, NodeError> {
        let session = self.get_live(id).await?;
        let len = data.len();
        session.write_stdin(data)?;
        let event = Event::input(len);
        if let Err(e) = session.events().append(&event) {
            warn!(id, "failed to append session.input: {e}");
        }
        session.publish(&event);
        Ok(len)
    }

    pub async fn subscribe_output(
        &self,
        id: u32,
    ) -> Result<(SubId, mpsc::Receiver<Bytes>), NodeError> {
        Ok(self.get_live(id).await?.subscribe_output())
    }

    pub async fn unsubscribe_output(&self, id: u32, sub: SubId) {
        if let Ok(session) = self.get_live(id).await {
            session.unsubscribe_output(sub);
        }
    }

    pub async fn subscribe_status(
        &self,
        id: u32,
    ) -> Result<watch::Receiver<SessionStatus>, NodeError> {
        Ok(self.get_live(id).await?.status_watch())
    }

    // -- Messaging ------------------------------------------------------------

    async fn endpoint(&self, id: u32) -> Result<Endpoint, NodeError> {
        let reg = self.registry.read().await;
        let record = reg.records.get(&id).ok_or_else(|| NodeError::session_not_found(id))?;
        Ok(match &record.live {
            Some(session) => Endpoint::Live(Arc::clone(session)),
            None => Endpoint::Dead { path: self.messages_path(id), tags: record.tags() },
        })
    }

    async fn record_name(&self, id: u32) -> Option<String> {
        let reg = self.registry.read().await;
        reg.records.get(&id).and_then(|r| r.name())
    }

    fn deliver(&self, endpoint: &Endpoint, session_id: u32, event: &Event) {
        match endpoint {
            Endpoint::Live(session) => {
                if let Err(e) = session.messages().append(event) {
                    warn!(id = session_id, "failed to append message event: {e}");
                }
                session.publish(event);
            }
            Endpoint::Dead { path, tags } => {
                match EventLog::open(path.clone()) {
                    Ok(log) => {
                        if let Err(e) = log.append(event) {
                            warn!(id = session_id, "failed to append message event: {e}");
                        }
                    }
                    Err(e) => warn!(id = session_id, "failed to open message log: {e}"),
                }
                self.bus.publish(session_id, tags, event);
            }
        }
    }

    /// Route a direct message: the event lands in both endpoints'
    /// `messages.jsonl` and on both subject streams.
    pub async fn send_message(
        &self,
        from: Option<u32>,
        to: u32,
        body: &Value,
    ) -> Result<String, NodeError> {
        let to_ep = self.endpoint(to).await?;
        let from_ep = match from {
            Some(f) => Some(self.endpoint(f).await?),
            None => None,
        };
        let from_name = match from {
            Some(f) => self.record_name(f).await,
            None => None,
        };
        let to_name = self.record_name(to).await;

        let message_id = format!("msg_{}_{}_{}", from.unwrap_or(0), to, unix_nanos_now());
        let event =
            Event::direct(&message_id, from, from_name.as_deref(), to, to_name.as_deref(), body);

        self.deliver(&to_ep, to, &event);
        if let (Some(f), Some(ep)) = (from, from_ep.as_ref()) {
            self.deliver(ep, f, &event);
        }
        Ok(message_id)
    }

    /// Route a request and register its reply slot. The caller owns the
    /// timeout: on expiry it must call [`cleanup_request`] before concluding
    /// no reply will arrive.
    ///
    /// [`cleanup_request`]: Self::cleanup_request
    pub async fn send_request(
        &self,
        from: Option<u32>,
        to: u32,
        body: &Value,
    ) -> Result<(String, oneshot::Receiver<ReplyMessage>), NodeError> {
        let to_ep = self.endpoint(to).await?;
        let from_ep = match from {
            Some(f) => Some(self.endpoint(f).await?),
            None => None,
        };
        let from_name = match from {
            Some(f) => self.record_name(f).await,
            None => None,
        };
        let to_name = self.record_name(to).await;

        let request_id = format!("req_{}_{}_{}", from.unwrap_or(0), to, unix_nanos_now());
        let event =
            Event::request(&request_id, from, from_name.as_deref(), to, to_name.as_deref(), body);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        self.deliver(&to_ep, to, &event);
        if let (Some(f), Some(ep)) = (from, from_ep.as_ref()) {
            self.deliver(ep, f, &event);
        }
        Ok((request_id, rx))
    }

    /// Resolve a pending request. The pending entry is removed atomically;
    /// a second reply (or a reply after timeout cleanup) fails.
    pub async fn send_reply(
        &self,
        from: u32,
        request_id: &str,
        body: &Value,
    ) -> Result<(), NodeError> {
        let from_ep = self.endpoint(from).await?;
        let Some(slot) = self.pending.lock().remove(request_id) else {
            return Err(NodeError::request_not_pending(request_id));
        };
        let from_name = self.record_name(from).await;

        let event = Event::reply(request_id, from, from_name.as_deref(), body);
        self.deliver(&from_ep, from, &event);

        // Non-blocking: the requester may have given up.
        let _ = slot.send(ReplyMessage {
            request_id: request_id.to_owned(),
            body: body.clone(),
            from_id: from,
            from_name,
        });
        Ok(())
    }

    /// Drop a pending request (timeout path). Later replies get
    /// `request not pending`.
    pub fn cleanup_request(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }

    /// Drop pending entries whose requester has gone away.
    pub fn sweep_pending(&self) {
        self.pending.lock().retain(|_, slot| !slot.is_closed());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub async fn read_messages(&self, id: u32, tail: i64) -> Result<Vec<Event>, NodeError> {
        if !self.exists(id).await {
            return Err(NodeError::session_not_found(id));
        }
        event_log::read_tail(&self.messages_path(id), tail)
            .map_err(|e| NodeError::InvalidRequest(format!("read messages: {e}")))
    }

    // -- Persistence ----------------------------------------------------------

    /// Synchronise persisted status strings with the live cells. Returns
    /// whether anything moved.
    pub async fn refresh_statuses(&self) -> bool {
        let mut changed = false;
        let mut reg = self.registry.write().await;
        for record in reg.records.values_mut() {
            if let Some(session) = &record.live {
                let snapshot = session.meta_snapshot();
                if snapshot.status != record.meta.status {
                    changed = true;
                }
                record.meta = snapshot;
            }
        }
        changed
    }

    /// Write every session's metadata to `sessions.json` (atomic rename).
    pub async fn persist(&self) -> anyhow::Result<()> {
        let metas: Vec<SessionMeta> = {
            let reg = self.registry.read().await;
            reg.records
                .values()
                .map(|r| match &r.live {
                    Some(session) => session.meta_snapshot(),
                    None => r.meta.clone(),
                })
                .collect()
        };
        self.store.save(&metas)
    }
}

fn live_info(session: &Session) -> SessionInfo {
    let meta = session.meta_snapshot();
    let attach_count = session.attach_count();
    SessionInfo {
        id: meta.id,
        name: meta.name.clone(),
        prompt: meta.prompt.clone(),
        working_dir: meta.working_dir.clone(),
        created_at: meta.created_at,
        status: meta.status.clone(),
        attached: attach_count > 0,
        attached_count: attach_count,
        pid: meta.pid,
        tags: meta.tags.clone(),
        output_bytes: Some(session.output_bytes()),
        output_lines: Some(session.output_lines()),
        output_size_bytes: session.output_size_bytes(),
        last_output_at: session.last_output_at(),
        last_output_snippet: session.last_output_snippet(),
        exit_code: meta.exit_code,
        completed_at: meta.completed_at,
        duration_ms: meta.duration_ms(),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
