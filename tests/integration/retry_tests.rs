//! Request/retry helper driven directly over a device core.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use g2slink::adapters::sim_queue::SimReply;
use g2slink::app::ports::HostQueue;
use g2slink::device::{Device, DeviceCore};
use g2slink::devices::{AwardSource, ProgressiveDevice};
use g2slink::events::DeviceClass;
use g2slink::message::{Command, Response, SessionState};
use g2slink::retry::{RetryOutcome, RetryPolicy, request_with_retry, spawn_retry_chain};

use crate::harness::{Link, fast_device, wait_until};

const TX: u64 = 41;

fn open_core(link: &Link) -> Arc<DeviceCore> {
    link.host_enabled();
    let core = DeviceCore::new(
        DeviceClass::Handpay,
        1,
        link.host.clone(),
        &link.registry,
        fast_device(),
    )
    .unwrap();
    core.set_open(true);
    Arc::new(core)
}

fn policy() -> RetryPolicy {
    RetryPolicy::for_transaction(Duration::from_millis(100)).with_timeout(Duration::from_millis(50))
}

fn run(core: &DeviceCore, policy: &RetryPolicy) -> RetryOutcome<u64> {
    request_with_retry(
        core,
        policy,
        || {
            core.request(Command::HandpayRequest {
                transaction_id: TX,
                amount: 500,
            })
        },
        |responses| {
            responses.iter().find_map(|r| match r {
                Response::HandpayAck { transaction_id } if *transaction_id == TX => {
                    Some(*transaction_id)
                }
                _ => None,
            })
        },
    )
}

#[test]
fn first_ack_completes() {
    let link = Link::new();
    let core = open_core(&link);
    assert_eq!(run(&core, &policy()), RetryOutcome::Completed(TX));
    assert_eq!(link.queue.sent().len(), 1);
}

#[test]
fn closed_device_sends_nothing() {
    let link = Link::new();
    let core = open_core(&link);
    core.set_open(false);
    assert_eq!(run(&core, &policy()), RetryOutcome::Unavailable);
    assert!(link.queue.sent().is_empty());
}

#[test]
fn unsendable_host_sends_nothing() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue.enable_send(false);
    assert_eq!(run(&core, &policy()), RetryOutcome::Unavailable);
    assert!(link.queue.sent().is_empty());
}

#[test]
fn foreign_echo_is_retried() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue.push_reply(SimReply::Respond(vec![Response::HandpayAck {
        transaction_id: TX + 1,
    }]));
    assert_eq!(run(&core, &policy()), RetryOutcome::Completed(TX));
    assert_eq!(link.queue.sent().len(), 2);
}

#[test]
fn timeout_resends_without_delay() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue.set_timeout_latency(Duration::from_millis(1));
    link.queue.push_reply(SimReply::Fail(SessionState::TimedOut));
    link.queue.push_reply(SimReply::Fail(SessionState::TimedOut));

    let delayed = policy().with_failure_delay(Duration::from_secs(5));
    let started = Instant::now();
    assert_eq!(run(&core, &delayed), RetryOutcome::Completed(TX));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(link.queue.sent().len(), 3);
}

#[test]
fn comms_lost_is_terminal() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue.push_reply(SimReply::Fail(SessionState::CommsLost));
    assert_eq!(run(&core, &policy()), RetryOutcome::CommsLost);
    assert_eq!(link.queue.sent().len(), 1);
}

#[test]
fn failure_waits_before_resending() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue.push_reply(SimReply::Fail(SessionState::ResponseError));

    let delayed = policy().with_failure_delay(Duration::from_millis(80));
    let started = Instant::now();
    assert_eq!(run(&core, &delayed), RetryOutcome::Completed(TX));
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[test]
fn precondition_is_checked_between_attempts() {
    let link = Link::new();
    let core = open_core(&link);
    let queue = link.queue.clone();
    link.queue.set_responder(move |_| {
        queue.enable_send(false);
        SimReply::Fail(SessionState::ResponseError)
    });
    assert_eq!(run(&core, &policy()), RetryOutcome::Unavailable);
    assert_eq!(link.queue.sent().len(), 1);
}

#[test]
fn deadline_ends_the_chain() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue
        .set_responder(|_| SimReply::Fail(SessionState::ResponseError));

    let bounded = policy()
        .with_failure_delay(Duration::from_millis(20))
        .with_deadline(Instant::now() + Duration::from_millis(100));
    assert_eq!(run(&core, &bounded), RetryOutcome::DeadlineElapsed);
    let sends = link.queue.sent().len();
    assert!((2..=8).contains(&sends), "{sends} attempts");
}

#[test]
fn close_cancels_a_waiting_chain() {
    let link = Link::new();
    let core = open_core(&link);
    link.queue
        .set_responder(|_| SimReply::Fail(SessionState::ResponseError));

    let (tx, rx) = mpsc::channel();
    let chain_core = Arc::clone(&core);
    assert!(spawn_retry_chain("retry-test".into(), move || {
        let delayed = policy().with_failure_delay(Duration::from_secs(10));
        let _ = tx.send(run(&chain_core, &delayed));
    }));

    assert!(wait_until(|| link.queue.sent().len() == 1));
    core.set_open(false);
    let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(outcome, RetryOutcome::Cancelled);
    assert_eq!(link.queue.sent().len(), 1);
}

#[test]
fn reopened_device_gets_a_fresh_token() {
    let link = Link::new();
    let core = open_core(&link);
    let first = core.retry_token();
    core.set_open(false);
    assert!(first.is_cancelled());

    core.set_open(true);
    assert!(!core.retry_token().is_cancelled());
    assert_eq!(run(&core, &policy()), RetryOutcome::Completed(TX));
}

#[test]
fn progressive_falls_back_offline_when_the_host_drops() {
    let link = Link::new();
    link.host_enabled();
    let device = ProgressiveDevice::new(1, link.host.clone(), &link.registry, fast_device()).unwrap();
    device.open();
    link.queue.push_reply(SimReply::Fail(SessionState::CommsLost));

    let award = device
        .hit(7, 3, 1, 25_000, Duration::from_millis(200))
        .expect("offline award");
    assert_eq!(award.amount, 25_000);
    assert_eq!(award.source, AwardSource::Offline);
}
