//! Event report pipeline: registry fan-out, filtering, overflow, durable
//! delivery and restart recovery.

use std::collections::HashMap;
use std::time::Duration;

use g2slink::adapters::sim_queue::SimReply;
use g2slink::app::ports::{EventStore, HostQueue};
use g2slink::config::{OPT_DISABLE_BEHAVIOR, OPT_QUEUE_BEHAVIOR};
use g2slink::event_handler::{
    EventHandler, EventSubscription, Occurrence, SubscriptionKey, SupportedEvent,
};
use g2slink::events::{
    ALL_DEVICES, DeviceClass, G2S_EVE001, G2S_EVE002, G2S_EVE005, G2S_EVE006,
};
use g2slink::message::{Command, SessionState};

use crate::harness::{HOST, Link, fast_events, wait_until};

const DOOR_OPEN: &str = "G2S_CBE101";
const DOOR_CLOSED: &str = "G2S_CBE102";

fn subscribe(handler: &EventHandler, code: &str) {
    handler.set_event_subscriptions(&[EventSubscription::new(code, ALL_DEVICES)]);
}

fn subscribe_durable(handler: &EventHandler, code: &str) {
    handler.set_event_subscriptions(&[EventSubscription {
        event_persist: true,
        ..EventSubscription::new(code, ALL_DEVICES)
    }]);
}

fn report(link: &Link, code: &str) -> u64 {
    link.registry.report_code(DeviceClass::Cabinet, 1, code)
}

fn delivered_codes(link: &Link) -> Vec<String> {
    link.queue
        .event_reports()
        .into_iter()
        .map(|(_, code)| code)
        .collect()
}

/// Host enabled but the transport holds traffic back.
fn hold_traffic(link: &Link) {
    link.host.status.set_host_enabled(true);
    link.queue.enable_send(false);
}

// ── Ids ──────────────────────────────────────────────────────

#[test]
fn ids_are_allocated_without_any_handler() {
    let link = Link::new();
    let ids: Vec<u64> = (0..5).map(|_| report(&link, DOOR_OPEN)).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn unsubscribed_events_still_consume_ids() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    subscribe(&handler, DOOR_CLOSED);
    handler.open();

    let a = report(&link, DOOR_OPEN);
    let b = report(&link, DOOR_CLOSED);
    assert_eq!(b, a + 1);
    assert!(wait_until(|| delivered_codes(&link) == vec![DOOR_CLOSED.to_owned()]));
}

// ── Delivery ─────────────────────────────────────────────────

#[test]
fn notifications_are_delivered_in_order() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    subscribe(&handler, DOOR_OPEN);
    subscribe(&handler, DOOR_CLOSED);
    handler.open();

    let ids: Vec<u64> = [DOOR_OPEN, DOOR_CLOSED, DOOR_OPEN]
        .iter()
        .map(|c| report(&link, c))
        .collect();

    assert!(wait_until(|| link.queue.event_reports().len() == 3));
    let got: Vec<u64> = link.queue.event_reports().iter().map(|(id, _)| *id).collect();
    assert_eq!(got, ids);
    assert_eq!(link.queue.notifications().len(), 3);
    assert!(wait_until(|| handler.queue_len() == 0));
}

#[test]
fn durable_head_blocks_until_acknowledged() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    subscribe_durable(&handler, DOOR_OPEN);

    link.queue.push_reply(SimReply::Fail(SessionState::ResponseError));
    let a = report(&link, DOOR_OPEN);
    let b = report(&link, DOOR_OPEN);
    handler.open();

    assert!(wait_until(|| link.queue.event_reports().len() == 3));
    let order: Vec<u64> = link.queue.event_reports().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![a, a, b], "A is retried before B is attempted");

    assert!(wait_until(|| link.store.unsent_events(HOST).unwrap().is_empty()));
    let log = link.store.event_log(HOST).unwrap();
    assert!(log.iter().all(|e| e.acknowledged));
}

#[test]
fn delivery_waits_for_send_permission() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(10);
    subscribe(&handler, DOOR_OPEN);
    handler.open();

    report(&link, DOOR_OPEN);
    std::thread::sleep(Duration::from_millis(50));
    assert!(link.queue.event_reports().is_empty());
    assert_eq!(handler.queue_len(), 1);

    link.queue.enable_send(true);
    assert!(wait_until(|| link.queue.event_reports().len() == 1));
}

// ── Host-disabled filter ─────────────────────────────────────

#[test]
fn host_disabled_drops_all_but_forced_persist() {
    let link = Link::new();
    let handler = link.handler(10);
    subscribe(&handler, DOOR_OPEN);
    handler.set_event_subscriptions(&[EventSubscription {
        forced_persist: true,
        ..EventSubscription::new(DOOR_CLOSED, ALL_DEVICES)
    }]);
    handler.open();

    report(&link, DOOR_OPEN);
    let kept = report(&link, DOOR_CLOSED);
    assert_eq!(handler.queued_event_ids(), vec![kept]);
    assert_eq!(link.store.unsent_events(HOST).unwrap().len(), 1);
}

#[test]
fn host_disabling_the_handler_filters_too() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(10);
    subscribe(&handler, DOOR_OPEN);
    handler.open();

    assert!(handler.set_enabled(false));
    assert!(!handler.is_enabled());
    report(&link, DOOR_OPEN);
    assert_eq!(handler.queue_len(), 0);
}

// ── Overflow ─────────────────────────────────────────────────

#[test]
fn overwrite_overflow_injects_meta_and_recovers() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(3);
    subscribe(&handler, DOOR_OPEN);
    subscribe(&handler, G2S_EVE006);
    handler.open();

    let ids: Vec<u64> = (0..4).map(|_| report(&link, DOOR_OPEN)).collect();
    let meta = ids[3] + 1;
    assert!(handler.in_overflow());
    assert_eq!(
        handler.queued_event_ids(),
        vec![ids[1], ids[2], ids[3], meta],
        "oldest report evicted, overflow event queued after it"
    );

    link.queue.enable_send(true);
    assert!(wait_until(|| delivered_codes(&link).contains(&G2S_EVE006.to_owned())));
    let codes = delivered_codes(&link);
    assert_eq!(codes[..4], [DOOR_OPEN, DOOR_OPEN, DOOR_OPEN, G2S_EVE005]);
    assert!(!handler.in_overflow());
}

#[test]
fn discard_overflow_keeps_the_oldest_reports() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(2);
    handler
        .apply_options(&HashMap::from([(
            OPT_QUEUE_BEHAVIOR.to_owned(),
            "G2S_discard".to_owned(),
        )]))
        .unwrap();
    subscribe_durable(&handler, DOOR_OPEN);
    handler.open();

    let ids: Vec<u64> = (0..3).map(|_| report(&link, DOOR_OPEN)).collect();
    assert_eq!(handler.queued_event_ids(), vec![ids[0], ids[1], ids[2] + 1]);
    assert!(handler.is_enabled());

    let unsent: Vec<u64> = link
        .store
        .unsent_events(HOST)
        .unwrap()
        .iter()
        .map(|e| e.event_id)
        .collect();
    assert_eq!(unsent, vec![ids[0], ids[1]], "discarded report is not logged");
}

#[test]
fn disable_overflow_disables_once_and_re_enables() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(2);
    handler
        .apply_options(&HashMap::from([
            (OPT_QUEUE_BEHAVIOR.to_owned(), "G2S_disable".to_owned()),
            (OPT_DISABLE_BEHAVIOR.to_owned(), "G2S_discard".to_owned()),
        ]))
        .unwrap();
    subscribe_durable(&handler, DOOR_OPEN);
    subscribe(&handler, G2S_EVE002);
    subscribe(&handler, G2S_EVE006);
    handler.open();

    let ids: Vec<u64> = (0..4).map(|_| report(&link, DOOR_OPEN)).collect();
    let (overflow, disabled) = (ids[2] + 1, ids[2] + 2);
    assert_eq!(ids[3], ids[2] + 3, "meta events took the ids in between");
    assert_eq!(
        handler.queued_event_ids(),
        vec![ids[0], ids[1], overflow, disabled]
    );
    let unsent: Vec<u64> = link
        .store
        .unsent_events(HOST)
        .unwrap()
        .iter()
        .map(|e| e.event_id)
        .collect();
    assert_eq!(unsent, vec![ids[0], ids[1]], "discarded reports are not logged");
    assert!(!handler.is_enabled());
    assert!(!handler.set_enabled(true), "auto-disabled handler refuses enable");

    link.queue.enable_send(true);
    assert!(wait_until(|| delivered_codes(&link).contains(&G2S_EVE002.to_owned())));
    let codes = delivered_codes(&link);
    assert_eq!(codes.iter().filter(|c| *c == G2S_EVE001).count(), 1);
    assert_eq!(codes.iter().filter(|c| *c == G2S_EVE005).count(), 1);
    assert!(handler.is_enabled());
}

#[test]
fn restart_beyond_capacity_reports_overflow() {
    let first = Link::new();
    hold_traffic(&first);
    let handler = first.handler(10);
    subscribe_durable(&handler, DOOR_OPEN);
    handler.open();
    let ids: Vec<u64> = (0..4).map(|_| report(&first, DOOR_OPEN)).collect();
    drop(handler);

    let second = Link::over(first.kv.clone());
    hold_traffic(&second);
    let handler = second.handler(2);
    handler.open();

    assert!(handler.in_overflow());
    let queued = handler.queued_event_ids();
    assert_eq!(queued[..2], [ids[2], ids[3]]);
    assert_eq!(queued.len(), 3);

    second.queue.enable_send(true);
    assert!(wait_until(|| delivered_codes(&second).len() >= 3));
    assert_eq!(delivered_codes(&second)[2], G2S_EVE005);
}

// ── Host-enabled gate ────────────────────────────────────────

#[test]
fn forced_persist_events_wait_for_the_host() {
    let link = Link::new();
    link.queue.enable_send(true);
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription {
        forced_persist: true,
        ..EventSubscription::new(DOOR_CLOSED, ALL_DEVICES)
    }]);
    handler.open();

    let id = report(&link, DOOR_CLOSED);
    std::thread::sleep(Duration::from_millis(100));
    assert!(link.queue.event_reports().is_empty());
    assert_eq!(handler.queued_event_ids(), vec![id]);

    link.host.status.set_host_enabled(true);
    assert!(wait_until(|| delivered_codes(&link) == vec![DOOR_CLOSED.to_owned()]));
}

#[test]
fn handler_disabled_by_the_host_holds_delivery() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription {
        forced_persist: true,
        ..EventSubscription::new(DOOR_CLOSED, ALL_DEVICES)
    }]);
    handler.open();
    assert!(handler.set_enabled(false));

    report(&link, DOOR_CLOSED);
    std::thread::sleep(Duration::from_millis(100));
    assert!(link.queue.event_reports().is_empty());
    assert_eq!(handler.queue_len(), 1);

    assert!(handler.set_enabled(true));
    assert!(wait_until(|| link.queue.event_reports().len() == 1));
}

// ── Pre-open buffer ──────────────────────────────────────────

#[test]
fn events_before_open_are_replayed() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    subscribe(&handler, DOOR_OPEN);

    let ids: Vec<u64> = (0..3).map(|_| report(&link, DOOR_OPEN)).collect();
    assert_eq!(handler.pre_open_len(), 3);
    assert!(link.queue.event_reports().is_empty());

    handler.open();
    assert!(wait_until(|| link.queue.event_reports().len() == 3));
    let got: Vec<u64> = link.queue.event_reports().iter().map(|(id, _)| *id).collect();
    assert_eq!(got, ids);
    assert_eq!(handler.pre_open_len(), 0);
}

#[test]
fn pre_open_buffer_keeps_the_newest() {
    let link = Link::new();
    let handler = link.handler(2);
    for _ in 0..5 {
        report(&link, DOOR_OPEN);
    }
    assert_eq!(handler.pre_open_len(), 2);
}

// ── Restart ──────────────────────────────────────────────────

#[test]
fn unsent_durable_events_survive_restart() {
    let first = Link::new();
    hold_traffic(&first);
    let handler = first.handler(10);
    subscribe_durable(&handler, DOOR_OPEN);
    handler.open();
    let ids: Vec<u64> = (0..3).map(|_| report(&first, DOOR_OPEN)).collect();
    drop(handler);

    let second = Link::over(first.kv.clone());
    second.host_enabled();
    let handler = second.handler(10);
    assert_eq!(handler.event_subscriptions().len(), 1, "subscriptions persisted");
    handler.open();

    assert!(wait_until(|| second.queue.event_reports().len() == 3));
    let got: Vec<u64> = second.queue.event_reports().iter().map(|(id, _)| *id).collect();
    assert_eq!(got, ids);

    let next = report(&second, DOOR_OPEN);
    assert!(next > ids[2], "ids continue after restart");
}

#[test]
fn reopen_merges_without_duplicates() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(10);
    subscribe_durable(&handler, DOOR_OPEN);
    handler.open();
    let ids: Vec<u64> = (0..3).map(|_| report(&link, DOOR_OPEN)).collect();

    // Every queued event is also in the unsent log.
    handler.close();
    handler.open();
    assert_eq!(handler.queued_event_ids(), ids);
}

// ── Subscriptions and supported events ───────────────────────

#[test]
fn subscription_flags_only_widen() {
    let link = Link::new();
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription {
        send_device_meters: true,
        ..EventSubscription::new(DOOR_OPEN, ALL_DEVICES)
    }]);
    assert!(handler.set_event_subscriptions(&[EventSubscription::new(DOOR_OPEN, ALL_DEVICES)]));
    let subs = handler.event_subscriptions();
    assert_eq!(subs.len(), 1);
    assert!(subs[0].send_device_meters);

    handler.clear_event_subscriptions(&[SubscriptionKey::new(DOOR_OPEN, ALL_DEVICES)]);
    assert!(handler.event_subscriptions().is_empty());
}

#[test]
fn events_registered_before_the_handler_are_supported() {
    let link = Link::new();
    link.registry.register_event(DeviceClass::Cabinet, 1, DOOR_OPEN);
    let handler = link.handler(10);
    let door = SupportedEvent::new(DeviceClass::Cabinet, 1, DOOR_OPEN);
    assert!(handler.supported_events().contains(&door));
    assert!(
        handler
            .supported_events()
            .iter()
            .any(|e| e.device_class == DeviceClass::EventHandler),
        "default handler events"
    );

    link.registry.unregister_event(DeviceClass::Cabinet, 1, DOOR_OPEN);
    assert!(!handler.supported_events().contains(&door));
    assert!(!link.store.supported_events(HOST).unwrap().contains(&door));
}

#[test]
fn payload_follows_subscription() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription {
        send_transaction: true,
        ..EventSubscription::new(DOOR_OPEN, ALL_DEVICES)
    }]);
    handler.open();

    link.registry.report(
        Occurrence::new(DeviceClass::Cabinet, 1, DOOR_OPEN)
            .with_text("door opened")
            .with_transaction(12, Vec::new()),
    );
    link.queue.enable_send(true);
    assert!(wait_until(|| !link.queue.notifications().is_empty()));
    let sent = &link.queue.notifications()[0];
    match &sent.command {
        Command::EventReport(e) => {
            assert_eq!(e.transaction_id, Some(12));
            assert_eq!(e.text.as_deref(), Some("door opened"));
            assert!(e.device_status.is_none());
        }
        other => panic!("expected eventReport, got {other:?}"),
    }
}

#[test]
fn rejected_options_leave_the_policy_alone() {
    let link = Link::new();
    hold_traffic(&link);
    let handler = EventHandler::new(link.host.clone(), fast_events(2), &link.registry).unwrap();
    let bad = HashMap::from([(OPT_QUEUE_BEHAVIOR.to_owned(), "sometimes".to_owned())]);
    assert!(handler.apply_options(&bad).is_err());
    subscribe(&handler, DOOR_OPEN);
    handler.open();

    let ids: Vec<u64> = (0..3).map(|_| report(&link, DOOR_OPEN)).collect();
    assert!(handler.is_enabled(), "still overwriting, not disabled");
    assert_eq!(handler.queued_event_ids(), vec![ids[1], ids[2], ids[2] + 1]);
}
