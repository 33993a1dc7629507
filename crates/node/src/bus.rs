// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filtered publish/subscribe fan-out for typed events.
//!
//! Publishers hand in `(session_id, tag_set, event)`; each subscription
//! filters on session id, tags (any-of), and event types, with an empty
//! axis meaning "no filter". Delivery follows the broadcaster discipline:
//! bounded per-subscriber channels, drop on overflow, never block the
//! publisher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::event::{Event, EventType};

pub type SubId = u64;

/// Default per-subscription channel depth.
pub const BUS_BUFFER: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<u32>,
    pub tags: Vec<String>,
    pub event_types: Vec<EventType>,
}

impl EventFilter {
    /// All present axes must match; tags match any-of.
    pub fn matches(&self, session_id: u32, tags: &HashSet<String>, event_type: EventType) -> bool {
        if let Some(want) = self.session_id {
            if want != session_id {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event_type) {
            return false;
        }
        true
    }
}

struct BusSub {
    filter: EventFilter,
    tx: mpsc::Sender<(u32, Event)>,
}

#[derive(Default)]
pub struct SubscriptionBus {
    subs: RwLock<HashMap<SubId, BusSub>>,
    next_id: AtomicU64,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: EventFilter) -> (SubId, mpsc::Receiver<(u32, Event)>) {
        self.subscribe_with_capacity(filter, BUS_BUFFER)
    }

    pub fn subscribe_with_capacity(
        &self,
        filter: EventFilter,
        capacity: usize,
    ) -> (SubId, mpsc::Receiver<(u32, Event)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.write().insert(id, BusSub { filter, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubId) {
        self.subs.write().remove(&id);
    }

    /// Fan the event out to every matching subscription, dropping for any
    /// subscription whose channel is full.
    pub fn publish(&self, session_id: u32, tags: &HashSet<String>, event: &Event) {
        let mut gone = Vec::new();
        {
            let subs = self.subs.read();
            for (id, sub) in subs.iter() {
                if !sub.filter.matches(session_id, tags, event.event_type) {
                    continue;
                }
                match sub.tx.try_send((session_id, event.clone())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!(sub = id, "dropping event for slow subscriber");
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
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
