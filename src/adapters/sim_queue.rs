//! Scriptable in-process host queue.
//!
//! Implements [`HostQueue`] without a socket: every request is recorded and
//! answered at once, either from a queue of scripted replies, from a
//! responder closure, or by the built-in acknowledger that echoes each
//! command's natural response.  Idle times and overflow flags can be forced
//! so transport escalation can be driven deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::app::ports::{HostQueue, Session};
use crate::message::{Command, Request, RequestError, Response, SessionState};

/// How the simulated host answers one request.
#[derive(Debug, Clone, PartialEq)]
pub enum SimReply {
    Respond(Vec<Response>),
    /// Resolve with a non-success state and no responses.
    Fail(SessionState),
    /// The host rejected the request with an error code.
    RequestError(RequestError),
}

type Responder = Box<dyn Fn(&Request) -> SimReply + Send + Sync>;

struct SimState {
    sent: Vec<Request>,
    notifications: Vec<Request>,
    /// Sessions and notifications interleaved in send order.
    traffic: Vec<Request>,
    script: VecDeque<SimReply>,
    sent_at: Instant,
    received_at: Instant,
    sent_elapsed: Option<Duration>,
    received_elapsed: Option<Duration>,
    session_timeout: Duration,
}

pub struct SimHostQueue {
    state: Mutex<SimState>,
    responder: RwLock<Option<Responder>>,
    connected: AtomicBool,
    send_enabled: AtomicBool,
    online: AtomicBool,
    outbound_full: AtomicBool,
    inbound_full: AtomicBool,
    /// How long a timed-out session blocks, capped by the caller's wait.
    timeout_latency: Mutex<Duration>,
}

impl Default for SimHostQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHostQueue {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(SimState {
                sent: Vec::new(),
                notifications: Vec::new(),
                traffic: Vec::new(),
                script: VecDeque::new(),
                sent_at: now,
                received_at: now,
                sent_elapsed: None,
                received_elapsed: None,
                session_timeout: Duration::from_secs(30),
            }),
            responder: RwLock::new(None),
            connected: AtomicBool::new(true),
            send_enabled: AtomicBool::new(false),
            online: AtomicBool::new(false),
            outbound_full: AtomicBool::new(false),
            inbound_full: AtomicBool::new(false),
            timeout_latency: Mutex::new(Duration::from_millis(10)),
        }
    }

    /// Answer the next request with `reply`, ahead of the responder.
    pub fn push_reply(&self, reply: SimReply) {
        self.state.lock().script.push_back(reply);
    }

    pub fn set_responder(&self, f: impl Fn(&Request) -> SimReply + Send + Sync + 'static) {
        *self.responder.write() = Some(Box::new(f));
    }

    pub fn clear_responder(&self) {
        *self.responder.write() = None;
    }

    /// While disconnected every session resolves to `CommsLost`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Pin the reported idle times.  `None` reverts to measured time.
    pub fn set_elapsed(&self, sent: Option<Duration>, received: Option<Duration>) {
        let mut st = self.state.lock();
        st.sent_elapsed = sent;
        st.received_elapsed = received;
    }

    pub fn set_outbound_full(&self, full: bool) {
        self.outbound_full.store(full, Ordering::Relaxed);
    }

    pub fn set_inbound_full(&self, full: bool) {
        self.inbound_full.store(full, Ordering::Relaxed);
    }

    pub fn set_timeout_latency(&self, latency: Duration) {
        *self.timeout_latency.lock() = latency;
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    pub fn send_enabled(&self) -> bool {
        self.send_enabled.load(Ordering::Relaxed)
    }

    /// Requests sent with a session, in order.
    pub fn sent(&self) -> Vec<Request> {
        self.state.lock().sent.clone()
    }

    /// Command names of requests sent with a session, in order.
    pub fn sent_commands(&self) -> Vec<&'static str> {
        self.state.lock().sent.iter().map(|r| r.command.name()).collect()
    }

    pub fn notifications(&self) -> Vec<Request> {
        self.state.lock().notifications.clone()
    }

    /// Every event report sent, with or without a session, as
    /// `(event id, event code)` in send order.
    pub fn event_reports(&self) -> Vec<(u64, String)> {
        self.state
            .lock()
            .traffic
            .iter()
            .filter_map(|r| match &r.command {
                Command::EventReport(e) => Some((e.event_id, e.event_code.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut st = self.state.lock();
        st.sent.clear();
        st.notifications.clear();
        st.traffic.clear();
    }

    fn resolve(&self, request: &Request) -> SimReply {
        if !self.connected.load(Ordering::Relaxed) {
            return SimReply::Fail(SessionState::CommsLost);
        }
        if let Some(reply) = self.state.lock().script.pop_front() {
            return reply;
        }
        if let Some(responder) = self.responder.read().as_ref() {
            return responder(request);
        }
        SimReply::Respond(vec![acknowledge(&request.command)])
    }
}

/// The natural acknowledgement for a command.
pub fn acknowledge(command: &Command) -> Response {
    match command {
        Command::CommsOnLine { .. } => Response::CommsOnLineAck { sync_timer_ms: 0 },
        Command::CommsDisabled => Response::CommsDisabledAck,
        Command::KeepAlive => Response::KeepAliveAck,
        Command::CommsClosing => Response::CommsClosingAck,
        Command::EventReport(event) => Response::EventAck {
            event_id: event.event_id,
        },
        Command::HandpayRequest { transaction_id, .. } => Response::HandpayAck {
            transaction_id: *transaction_id,
        },
        Command::KeyedOff { transaction_id, .. } => Response::KeyedOffAck {
            transaction_id: *transaction_id,
        },
        Command::IssueVoucher { transaction_id, .. } => Response::IssueVoucherAck {
            transaction_id: *transaction_id,
        },
        Command::RedeemVoucher { transaction_id, .. } => Response::AuthorizeVoucher {
            transaction_id: *transaction_id,
            amount: 0,
            accepted: true,
        },
        Command::CommitVoucher { transaction_id, .. } => Response::CommitVoucherAck {
            transaction_id: *transaction_id,
        },
        Command::ProgressiveHit {
            transaction_id,
            amount,
            ..
        } => Response::SetProgressiveWin {
            transaction_id: *transaction_id,
            amount: *amount,
        },
        Command::ProgressiveCommit { transaction_id, .. } => Response::ProgressiveCommitAck {
            transaction_id: *transaction_id,
        },
        Command::VerificationResult { transaction_id, .. } => Response::VerificationResultAck {
            transaction_id: *transaction_id,
        },
        Command::DownloadStatus { transaction_id, .. } => Response::DownloadStatusAck {
            transaction_id: *transaction_id,
        },
        Command::GetIdValidation {
            transaction_id,
            id_number,
        } => Response::SetIdValidation {
            transaction_id: *transaction_id,
            id_number: id_number.clone(),
            id_type: "G2S_unknown".into(),
            valid: false,
            player_id: None,
        },
    }
}

impl HostQueue for SimHostQueue {
    fn send(&self, request: Request, timeout: Option<Duration>) -> Box<dyn Session> {
        debug!("SIM[{}] send {}", request.host_id, request.command.name());
        let reply = self.resolve(&request);
        let now = Instant::now();
        let wait = {
            let mut st = self.state.lock();
            st.sent_at = now;
            if matches!(reply, SimReply::Respond(_) | SimReply::RequestError(_)) {
                st.received_at = now;
            }
            st.traffic.push(request.clone());
            st.sent.push(request);
            timeout.unwrap_or(st.session_timeout)
        };
        let latency = (*self.timeout_latency.lock()).min(wait);
        Box::new(SimSession::from_reply(reply, latency))
    }

    fn send_notification(&self, request: Request) {
        debug!("SIM[{}] notify {}", request.host_id, request.command.name());
        let mut st = self.state.lock();
        st.sent_at = Instant::now();
        st.traffic.push(request.clone());
        st.notifications.push(request);
    }

    fn can_send(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && self.send_enabled.load(Ordering::Relaxed)
    }

    fn sent_elapsed(&self) -> Duration {
        let st = self.state.lock();
        st.sent_elapsed.unwrap_or_else(|| st.sent_at.elapsed())
    }

    fn received_elapsed(&self) -> Duration {
        let st = self.state.lock();
        st.received_elapsed
            .unwrap_or_else(|| st.received_at.elapsed())
    }

    fn enable_send(&self, enable: bool) {
        self.send_enabled.store(enable, Ordering::Relaxed);
    }

    fn set_online(&self) {
        self.online.store(true, Ordering::Relaxed);
    }

    fn outbound_queue_full(&self) -> bool {
        self.outbound_full.load(Ordering::Relaxed)
    }

    fn inbound_queue_full(&self) -> bool {
        self.inbound_full.load(Ordering::Relaxed)
    }

    fn session_timeout(&self) -> Duration {
        self.state.lock().session_timeout
    }

    fn set_session_timeout(&self, timeout: Duration) {
        self.state.lock().session_timeout = timeout;
    }
}

/// A session that is already decided when handed out.
pub struct SimSession {
    state: SessionState,
    responses: Vec<Response>,
    error: Option<RequestError>,
    /// Time a timed-out session blocks in `wait_for_completion`.
    latency: Duration,
}

impl SimSession {
    fn from_reply(reply: SimReply, latency: Duration) -> Self {
        let (state, responses, error) = match reply {
            SimReply::Respond(responses) => (SessionState::Success, responses, None),
            SimReply::Fail(state) => (state, Vec::new(), None),
            SimReply::RequestError(error) => (SessionState::RequestError, Vec::new(), Some(error)),
        };
        Self {
            state,
            responses,
            error,
            latency,
        }
    }
}

impl Session for SimSession {
    fn wait_for_completion(&mut self, timeout: Option<Duration>) -> SessionState {
        if self.state == SessionState::TimedOut {
            let latency = timeout.map_or(self.latency, |t| t.min(self.latency));
            thread::sleep(latency);
        }
        self.state
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn responses(&self) -> &[Response] {
        &self.responses
    }

    fn request_error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DeviceClass;

    fn keep_alive() -> Request {
        Request::new(1, DeviceClass::Communications, 1, Command::KeepAlive)
    }

    #[test]
    fn default_reply_acknowledges() {
        let q = SimHostQueue::new();
        let mut s = q.send(keep_alive(), None);
        assert_eq!(s.wait_for_completion(None), SessionState::Success);
        assert_eq!(s.responses(), &[Response::KeepAliveAck]);
        assert_eq!(q.sent_commands(), vec!["keepAlive"]);
    }

    #[test]
    fn script_runs_before_responder() {
        let q = SimHostQueue::new();
        q.set_responder(|_| SimReply::Fail(SessionState::ResponseError));
        q.push_reply(SimReply::RequestError(RequestError::new("G2S_MSX006")));

        let s = q.send(keep_alive(), None);
        assert_eq!(s.state(), SessionState::RequestError);
        assert!(s.request_error().is_some_and(RequestError::is_host_unavailable));

        let s = q.send(keep_alive(), None);
        assert_eq!(s.state(), SessionState::ResponseError);
    }

    #[test]
    fn disconnected_loses_comms_and_cannot_send() {
        let q = SimHostQueue::new();
        q.enable_send(true);
        assert!(q.can_send());
        q.set_connected(false);
        assert!(!q.can_send());
        assert_eq!(q.send(keep_alive(), None).state(), SessionState::CommsLost);
    }

    #[test]
    fn pinned_elapsed_times() {
        let q = SimHostQueue::new();
        q.set_elapsed(Some(Duration::from_secs(400)), Some(Duration::from_secs(1)));
        assert_eq!(q.sent_elapsed(), Duration::from_secs(400));
        assert_eq!(q.received_elapsed(), Duration::from_secs(1));
        q.set_elapsed(None, None);
        assert!(q.sent_elapsed() < Duration::from_secs(5));
    }
}
