//! Communications state machine driven through `HostComms` and the
//! simulated host queue.

use std::time::Duration;

use g2slink::adapters::sim_queue::SimReply;
use g2slink::app::commands::HostCommand;
use g2slink::app::ports::{EventStore, HostQueue};
use g2slink::config::{CommsConfig, DeviceConfig};
use g2slink::device::Device;
use g2slink::devices::HandpayDevice;
use g2slink::event_handler::EventSubscription;
use g2slink::events::{ALL_DEVICES, G2S_CME005, G2S_CME101};
use g2slink::fsm::{CommsState, TransportState, Trigger};
use g2slink::message::{Command, ERR_HOST_BUSY, OnlineFlags, RequestError, SessionState};

use crate::harness::{HOST, Link, fast_comms, wait_until};

// ── Opening / Sync / Online ──────────────────────────────────

#[test]
fn open_announces_and_reaches_sync() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    comms.open();

    assert!(wait_until(|| comms.state() == CommsState::Sync));
    assert_eq!(observer.states(), vec![CommsState::Opening, CommsState::Sync]);
    assert_eq!(comms.transport_state(), TransportState::TransportUp);
    assert!(!link.queue.send_enabled(), "sync keeps application traffic off");

    let first = link.queue.sent().into_iter().next().unwrap();
    match first.command {
        Command::CommsOnLine { flags, .. } => assert!(flags.device_reset, "cold start"),
        other => panic!("expected commsOnLine, got {other:?}"),
    }
    assert_eq!(comms.startup_flags(), OnlineFlags::default(), "cleared once established");
}

#[test]
fn sync_sends_comms_disabled_at_once() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    comms.open();
    assert!(wait_until(|| link.queue.sent_commands().contains(&"commsDisabled")));
    assert_eq!(
        comms.sync_interval(),
        Duration::from_secs(5),
        "an offer of zero falls back to the default"
    );
}

#[test]
fn host_enable_goes_online() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);

    assert!(link.queue.send_enabled());
    assert!(link.queue.is_online());
    assert!(link.host.status.host_enabled());
    assert_eq!(observer.states().last(), Some(&CommsState::Online));
}

#[test]
fn host_disable_returns_to_sync() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.online(&comms);

    comms.handle_command(HostCommand::SetCommsState { enable: false });
    assert_eq!(comms.state(), CommsState::Sync);
    assert!(!link.queue.send_enabled());
    assert!(!link.host.status.host_enabled());
}

#[test]
fn handshake_timeout_retries_quickly() {
    let link = Link::new();
    link.queue.set_timeout_latency(Duration::from_millis(5));
    link.queue.push_reply(SimReply::Fail(SessionState::TimedOut));
    let (comms, _observer) = link.comms();
    comms.open();

    assert!(wait_until(|| comms.state() == CommsState::Sync));
    let sent = link.queue.sent_commands();
    assert_eq!(&sent[..2], &["commsOnLine", "commsOnLine"]);
}

#[test]
fn host_busy_while_opening_is_tolerated() {
    let link = Link::new();
    link.queue
        .set_responder(|_| SimReply::RequestError(RequestError::new(ERR_HOST_BUSY)));
    let (comms, observer) = link.comms();
    comms.open();

    assert!(wait_until(|| link.queue.sent().len() >= 2));
    assert_eq!(comms.state(), CommsState::Opening);
    assert!(!observer.states().contains(&CommsState::Closing));

    link.queue.clear_responder();
    assert!(wait_until(|| comms.state() == CommsState::Sync));
}

// ── Keep-alive ───────────────────────────────────────────────

#[test]
fn keep_alive_waits_for_both_idle_timers() {
    let link = Link::new();
    let (comms, _observer) = link.comms_with(CommsConfig {
        keep_alive_ms: 30,
        ..fast_comms()
    });
    link.queue
        .set_elapsed(Some(Duration::from_secs(1)), Some(Duration::from_millis(1)));
    link.online(&comms);

    std::thread::sleep(Duration::from_millis(120));
    assert!(!link.queue.sent_commands().contains(&"keepAlive"));

    link.queue
        .set_elapsed(Some(Duration::from_secs(1)), Some(Duration::from_secs(1)));
    assert!(wait_until(|| link.queue.sent_commands().contains(&"keepAlive")));
}

#[test]
fn zero_keep_alive_sends_nothing() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.queue
        .set_elapsed(Some(Duration::from_secs(1)), Some(Duration::from_secs(1)));
    link.online(&comms);
    std::thread::sleep(Duration::from_millis(120));
    assert!(!link.queue.sent_commands().contains(&"keepAlive"));
}

// ── Undefined triggers ───────────────────────────────────────

#[test]
fn undefined_trigger_is_a_noop() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    assert_eq!(comms.fire(Trigger::HostEnabled), None);
    assert_eq!(comms.fire(Trigger::Disabled), None);
    assert_eq!(comms.state(), CommsState::Closed);
    assert!(observer.notices().is_empty());
}

// ── Close from every state ───────────────────────────────────

fn closes_cleanly(link: &Link, comms: &g2slink::app::comms::HostComms) {
    comms.close();
    assert!(wait_until(|| comms.state() == CommsState::Closed));
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(comms.state(), CommsState::Closed, "closed device never reconnects");
    assert!(!link.queue.send_enabled());
}

#[test]
fn close_from_opening() {
    let link = Link::new();
    link.queue
        .set_responder(|_| SimReply::Fail(SessionState::ResponseError));
    let (comms, _observer) = link.comms();
    comms.open();
    assert!(wait_until(|| !link.queue.sent().is_empty()));
    assert_eq!(comms.state(), CommsState::Opening);
    closes_cleanly(&link, &comms);
}

#[test]
fn close_from_sync() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    comms.open();
    assert!(wait_until(|| comms.state() == CommsState::Sync));
    closes_cleanly(&link, &comms);
}

#[test]
fn close_from_online_sends_closing() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);
    closes_cleanly(&link, &comms);
    assert!(link.queue.sent_commands().contains(&"commsClosing"));
    let states = observer.states();
    assert_eq!(&states[states.len() - 2..], &[CommsState::Closing, CommsState::Closed]);
}

#[test]
fn close_from_overflow() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.online(&comms);
    link.queue.set_outbound_full(true);
    comms.poll_queue_overflow();
    assert_eq!(comms.state(), CommsState::Overflow);
    closes_cleanly(&link, &comms);
}

#[test]
fn closing_survives_a_lost_host() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.online(&comms);
    link.queue.set_connected(false);
    closes_cleanly(&link, &comms);
}

// ── Overflow ─────────────────────────────────────────────────

#[test]
fn outbound_overflow_clears_back_to_online() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.online(&comms);

    link.queue.set_outbound_full(true);
    comms.poll_queue_overflow();
    assert_eq!(comms.state(), CommsState::Overflow);

    link.queue.set_outbound_full(false);
    comms.poll_queue_overflow();
    assert_eq!(comms.state(), CommsState::Online);
}

#[test]
fn inbound_overflow_closes_from_overflow() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);
    link.queue.set_outbound_full(true);
    comms.poll_queue_overflow();
    link.queue.set_inbound_full(true);
    comms.poll_queue_overflow();
    assert!(wait_until(|| observer.states().contains(&CommsState::Closing)));
}

// ── Errors and reconnect ─────────────────────────────────────

#[test]
fn error_while_open_reconnects() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);

    comms.fire(Trigger::Error);
    assert!(wait_until(|| {
        let states = observer.states();
        let closed = states.iter().position(|s| *s == CommsState::Closed);
        closed.is_some_and(|i| states[i..].contains(&CommsState::Sync))
    }));
}

fn handpay_on(link: &Link) -> HandpayDevice {
    let d = HandpayDevice::new(
        1,
        link.host.clone(),
        &link.registry,
        DeviceConfig {
            time_to_live_ms: 100,
        },
    )
    .unwrap();
    d.open();
    d
}

#[test]
fn unresponsive_host_becomes_unreachable() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);
    let handpay = handpay_on(&link);

    link.queue
        .set_elapsed(Some(Duration::from_secs(5)), Some(Duration::from_secs(5)));
    link.queue.push_reply(SimReply::Fail(SessionState::CommsLost));
    assert!(!handpay.request(1, 100));

    assert!(observer.transports().contains(&TransportState::HostUnreachable));
    assert!(wait_until(|| observer.states().contains(&CommsState::Closing)));
}

#[test]
fn one_idle_timer_is_not_enough() {
    let link = Link::new();
    let (comms, observer) = link.comms();
    link.online(&comms);
    let handpay = handpay_on(&link);

    link.queue
        .set_elapsed(Some(Duration::from_secs(5)), Some(Duration::from_millis(10)));
    link.queue.push_reply(SimReply::Fail(SessionState::CommsLost));
    assert!(!handpay.request(1, 100));

    assert!(!observer.transports().contains(&TransportState::HostUnreachable));
    assert_eq!(comms.transport_state(), TransportState::TransportUp);
    assert_eq!(comms.state(), CommsState::Online);
}

#[test]
fn host_busy_while_online_closes_and_reports() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription::new(G2S_CME101, ALL_DEVICES)]);
    handler.open();

    let (comms, observer) = link.comms();
    link.online(&comms);
    let handpay = handpay_on(&link);

    // First attempt is rejected; the retry goes through before the close lands.
    link.queue
        .push_reply(SimReply::RequestError(RequestError::new(ERR_HOST_BUSY)));
    handpay.request(2, 100);

    assert!(wait_until(|| observer.states().contains(&CommsState::Closing)));

    // The report waits in the queue until the host is back online.
    assert!(wait_until(|| comms.state() == CommsState::Sync));
    comms.fire(Trigger::HostEnabled);
    assert!(wait_until(|| {
        link.queue
            .event_reports()
            .iter()
            .any(|(_, code)| code == G2S_CME101)
    }));
}

// ── Configuration ────────────────────────────────────────────

#[test]
fn config_change_is_adopted_through_closing() {
    let link = Link::new();
    link.host_enabled();
    let handler = link.handler(10);
    handler.set_event_subscriptions(&[EventSubscription {
        forced_persist: true,
        ..EventSubscription::new(G2S_CME005, ALL_DEVICES)
    }]);
    handler.open();

    let (comms, observer) = link.comms();
    link.online(&comms);

    let mut next = fast_comms();
    next.time_to_live_ms = 400;
    comms.handle_command(HostCommand::ConfigChanged(next));

    assert!(wait_until(|| comms.config().time_to_live_ms == 400));
    assert_eq!(link.queue.session_timeout(), Duration::from_millis(400));
    assert!(observer.states().contains(&CommsState::Closing));
    assert!(wait_until(|| {
        link.store
            .unsent_events(HOST)
            .unwrap()
            .iter()
            .any(|e| e.event_code == G2S_CME005)
    }));
}

#[test]
fn invalid_config_change_is_ignored() {
    let link = Link::new();
    let (comms, _observer) = link.comms();
    link.online(&comms);

    let mut bad = fast_comms();
    bad.time_to_live_ms = 0;
    assert_eq!(comms.handle_command(HostCommand::ConfigChanged(bad)), None);
    assert_eq!(comms.state(), CommsState::Online);
}
