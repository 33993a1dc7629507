// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use crate::event::{Event, EventType};

use super::*;

fn tags(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test]
async fn empty_filter_matches_everything() {
    let bus = SubscriptionBus::new();
    let (_id, mut rx) = bus.subscribe(EventFilter::default());

    bus.publish(1, &tags(&[]), &Event::input(1));
    bus.publish(2, &tags(&["batch"]), &Event::attached(1));

    let (sid, event) = rx.recv().await.unwrap_or((0, Event::input(0)));
    assert_eq!(sid, 1);
    assert_eq!(event.event_type, EventType::SessionInput);
    let (sid, _) = rx.recv().await.unwrap_or((0, Event::input(0)));
    assert_eq!(sid, 2);
}

#[tokio::test]
async fn session_id_filter() {
    let bus = SubscriptionBus::new();
    let filter = EventFilter { session_id: Some(2), ..Default::default() };
    let (_id, mut rx) = bus.subscribe(filter);

    bus.publish(1, &tags(&[]), &Event::input(1));
    bus.publish(2, &tags(&[]), &Event::input(2));

    let (sid, event) = rx.recv().await.unwrap_or((0, Event::input(0)));
    assert_eq!(sid, 2);
    assert_eq!(event.data["bytes"], 2);
}

#[tokio::test]
async fn tag_filter_is_any_of() {
    let bus = SubscriptionBus::new();
    let filter = EventFilter { tags: vec!["a".to_owned(), "b".to_owned()], ..Default::default() };
    let (_id, mut rx) = bus.subscribe(filter);

    bus.publish(1, &tags(&["c"]), &Event::input(1));
    bus.publish(2, &tags(&["b", "c"]), &Event::input(2));

    let (sid, _) = rx.recv().await.unwrap_or((0, Event::input(0)));
    assert_eq!(sid, 2);
}

#[tokio::test]
async fn event_type_filter() {
    let bus = SubscriptionBus::new();
    let filter = EventFilter { event_types: vec![EventType::SessionStatus], ..Default::default() };
    let (_id, mut rx) = bus.subscribe(filter);

    bus.publish(1, &tags(&[]), &Event::input(1));
    bus.publish(1, &tags(&[]), &Event::status("running", "killed", None));

    let (_, event) = rx.recv().await.unwrap_or((0, Event::input(0)));
    assert_eq!(event.event_type, EventType::SessionStatus);
}

#[tokio::test]
async fn overflow_drops_for_slow_subscriber_only() {
    let bus = SubscriptionBus::new();
    let (_slow, mut slow_rx) = bus.subscribe_with_capacity(EventFilter::default(), 1);
    let (_fast, mut fast_rx) = bus.subscribe_with_capacity(EventFilter::default(), 16);

    for i in 0..4 {
        bus.publish(1, &tags(&[]), &Event::input(i));
    }

    for i in 0..4 {
        let (_, event) = fast_rx.recv().await.unwrap_or((0, Event::input(99)));
        assert_eq!(event.data["bytes"], i);
    }
    let (_, event) = slow_rx.recv().await.unwrap_or((0, Event::input(99)));
    assert_eq!(event.data["bytes"], 0);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let bus = SubscriptionBus::new();
    let (id, mut rx) = bus.subscribe(EventFilter::default());
    bus.unsubscribe(id);
    bus.publish(1, &tags(&[]), &Event::input(1));
    assert!(rx.recv().await.is_none());
    assert_eq!(bus.subscriber_count(), 0);
}
