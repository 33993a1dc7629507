// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-producer fan-out of PTY output chunks with drop-slow-consumer
//! semantics.
//!
//! Every subscriber owns a bounded queue; `send` never blocks and never
//! waits on a consumer, so a stuck attacher cannot stall the PTY reader.
//! A full queue drops that chunk for that subscriber only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

/// Subscription identifier, unique per broadcaster.
pub type SubId = u64;

/// Default queue depth for attach/watch subscribers: ~16 MB in flight at
/// typical 4 KB chunks.
pub const ATTACH_BUFFER: usize = 4096;

#[derive(Debug, Default)]
pub struct Broadcaster {
    subs: RwLock<HashMap<SubId, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer with its own bounded queue.
    pub fn subscribe(&self, buf_size: usize) -> (SubId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buf_size.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.write().insert(id, tx);
        (id, rx)
    }

    /// Drop a consumer; its channel closes.
    pub fn unsubscribe(&self, id: SubId) {
        self.subs.write().remove(&id);
    }

    /// Deliver a chunk to every live consumer without blocking.
    pub fn send(&self, chunk: Bytes) {
        let mut gone = Vec::new();
        {
            let subs = self.subs.read();
            for (id, tx) in subs.iter() {
                match tx.try_send(chunk.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(sub = id, "dropping chunk for slow consumer");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }
        if !gone.is_empty() {
            let mut subs = self.subs.write();
            for id in gone {
                subs.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }

    /// Total chunks dropped across all subscribers since creation.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
