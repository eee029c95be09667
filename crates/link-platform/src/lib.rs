//! Host seams for the shiplink client runtimes.
//!
//! The cores in `link-core` never sleep and never touch a socket. They ask a
//! [`TimerRegistry`] for one-shot timers and a [`SessionTransport`] for duplex
//! sessions, and are driven by the fires and signals those collaborators
//! deliver back. This crate defines both contracts plus deterministic
//! in-memory implementations.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use thiserror::Error;
use url::Url;

/// WebSocket close code for an intentional, normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when a session ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Handle for one scheduled timer. Never reused by a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Identity of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One-shot timer contract provided by the host runtime.
///
/// Fires are not delivered through this trait. The host hands each fired
/// [`TimerId`] back to the component that scheduled it, which must treat a
/// fire it no longer expects as a no-op.
pub trait TimerRegistry {
    /// Schedule a timer that fires once after `delay`.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancel a timer before it fires. Returns `false` if it was not pending.
    fn cancel(&mut self, id: TimerId) -> bool;

    /// Host clock in milliseconds.
    fn now_ms(&self) -> u64;

    /// Number of timers scheduled but not yet fired or cancelled.
    fn pending(&self) -> usize;
}

/// Errors raised synchronously by a [`SessionTransport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint scheme cannot be served by this transport.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// The session is not known to the transport (never opened or already closed).
    #[error("{0} is not open")]
    UnknownSession(SessionId),
    /// Transport backend failure.
    #[error("transport failure: {0}")]
    Backend(String),
}

/// Lifecycle signal emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The session finished its handshake.
    Open,
    /// A text payload arrived.
    Message(String),
    /// The transport reported an error. A `Close` follows when the session ends.
    Error(String),
    /// The session ended.
    Close { code: u16, reason: String },
}

/// A [`Signal`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSignal {
    pub session: SessionId,
    pub signal: Signal,
}

impl SessionSignal {
    pub fn new(session: SessionId, signal: Signal) -> Self {
        Self { session, signal }
    }
}

/// Duplex message transport provided by the host runtime.
pub trait SessionTransport {
    /// Start opening `session` against `uri`. Completion arrives later as a
    /// [`Signal::Open`] or [`Signal::Close`].
    fn open(&mut self, session: SessionId, uri: &Url) -> Result<(), TransportError>;

    /// Forward an already-serialized payload.
    fn send(&mut self, session: SessionId, payload: &str) -> Result<(), TransportError>;

    /// Close `session` with `code` and stop delivering its signals.
    fn close(&mut self, session: SessionId, code: u16);
}

#[derive(Debug, Default)]
struct ManualClock {
    now_ms: u64,
    next_id: u64,
    pending: BTreeMap<TimerId, u64>,
}

/// Deterministic timer registry driven by an explicit simulated clock.
///
/// Clones share the same clock, so a test can keep one handle while the
/// component under test owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualTimers {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and return the timers that fired, earliest first.
    pub fn advance(&self, by: Duration) -> Vec<TimerId> {
        let target = self.now_ms().saturating_add(by.as_millis() as u64);
        self.advance_to(target)
    }

    /// Move the clock to `target_ms` (never backwards) and return fired timers.
    pub fn advance_to(&self, target_ms: u64) -> Vec<TimerId> {
        let mut clock = self.lock();
        clock.now_ms = clock.now_ms.max(target_ms);
        let now = clock.now_ms;

        let mut due: Vec<(u64, TimerId)> = clock
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        due.sort();

        for (_, id) in &due {
            clock.pending.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Deadline of a pending timer.
    pub fn deadline_of(&self, id: TimerId) -> Option<u64> {
        self.lock().pending.get(&id).copied()
    }

    fn lock(&self) -> MutexGuard<'_, ManualClock> {
        self.clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TimerRegistry for ManualTimers {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut clock = self.lock();
        clock.next_id += 1;
        let id = TimerId(clock.next_id);
        let deadline = clock.now_ms.saturating_add(delay.as_millis() as u64);
        clock.pending.insert(id, deadline);
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    fn now_ms(&self) -> u64 {
        self.lock().now_ms
    }

    fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

#[derive(Debug, Default)]
struct TransportLog {
    opened: Vec<(SessionId, Url)>,
    sent: Vec<(SessionId, String)>,
    closed: Vec<(SessionId, u16)>,
    live: Vec<SessionId>,
    reject_opens: Option<String>,
}

/// Transport that records every call instead of touching the network.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail with a backend error.
    pub fn reject_opens(&self, reason: impl Into<String>) {
        self.lock().reject_opens = Some(reason.into());
    }

    /// Accept opens again.
    pub fn accept_opens(&self) {
        self.lock().reject_opens = None;
    }

    pub fn opened(&self) -> Vec<(SessionId, Url)> {
        self.lock().opened.clone()
    }

    pub fn sent(&self) -> Vec<(SessionId, String)> {
        self.lock().sent.clone()
    }

    pub fn closed(&self) -> Vec<(SessionId, u16)> {
        self.lock().closed.clone()
    }

    /// Sessions opened and not yet closed.
    pub fn live(&self) -> Vec<SessionId> {
        self.lock().live.clone()
    }

    fn lock(&self) -> MutexGuard<'_, TransportLog> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionTransport for InMemoryTransport {
    fn open(&mut self, session: SessionId, uri: &Url) -> Result<(), TransportError> {
        let mut log = self.lock();
        if let Some(reason) = &log.reject_opens {
            return Err(TransportError::Backend(reason.clone()));
        }
        log.opened.push((session, uri.clone()));
        log.live.push(session);
        Ok(())
    }

    fn send(&mut self, session: SessionId, payload: &str) -> Result<(), TransportError> {
        let mut log = self.lock();
        if !log.live.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        log.sent.push((session, payload.to_owned()));
        Ok(())
    }

    fn close(&mut self, session: SessionId, code: u16) {
        let mut log = self.lock();
        log.live.retain(|live| *live != session);
        log.closed.push((session, code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_timers_fire_in_deadline_order() {
        let mut timers = ManualTimers::new();
        let late = timers.schedule(Duration::from_millis(300));
        let early = timers.schedule(Duration::from_millis(100));
        let _never = timers.schedule(Duration::from_millis(1_000));

        assert_eq!(timers.advance(Duration::from_millis(50)), Vec::new());
        assert_eq!(timers.advance(Duration::from_millis(250)), vec![early, late]);
        assert_eq!(timers.now_ms(), 300);
        assert_eq!(timers.pending(), 1);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timers = ManualTimers::new();
        let id = timers.schedule(Duration::from_millis(10));

        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.advance(Duration::from_secs(60)).is_empty());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn clones_share_one_clock() {
        let observer = ManualTimers::new();
        let mut owned = observer.clone();
        let id = owned.schedule(Duration::from_millis(5));

        assert_eq!(observer.deadline_of(id), Some(5));
        assert_eq!(observer.advance(Duration::from_millis(5)), vec![id]);
        assert_eq!(owned.pending(), 0);
    }

    #[test]
    fn timer_ids_are_not_reused() {
        let mut timers = ManualTimers::new();
        let a = timers.schedule(Duration::ZERO);
        timers.advance(Duration::ZERO);
        let b = timers.schedule(Duration::ZERO);
        assert_ne!(a, b);
    }

    #[test]
    fn in_memory_transport_records_session_calls() {
        let mut transport = InMemoryTransport::new();
        let log = transport.clone();
        let uri = Url::parse("ws://localhost:8080/ws").expect("valid url");

        transport.open(SessionId(1), &uri).expect("open should work");
        transport.send(SessionId(1), "ping").expect("send should work");
        transport.close(SessionId(1), NORMAL_CLOSURE);

        assert_eq!(log.opened(), vec![(SessionId(1), uri)]);
        assert_eq!(log.sent(), vec![(SessionId(1), "ping".to_owned())]);
        assert_eq!(log.closed(), vec![(SessionId(1), NORMAL_CLOSURE)]);
        assert!(log.live().is_empty());
    }

    #[test]
    fn in_memory_transport_rejects_sends_to_closed_sessions() {
        let mut transport = InMemoryTransport::new();
        let err = transport
            .send(SessionId(7), "late")
            .expect_err("send to unknown session must fail");
        assert_eq!(err, TransportError::UnknownSession(SessionId(7)));
    }

    #[test]
    fn rejected_open_reports_backend_error() {
        let mut transport = InMemoryTransport::new();
        transport.reject_opens("refused");
        let uri = Url::parse("ws://localhost/ws").expect("valid url");

        let err = transport
            .open(SessionId(1), &uri)
            .expect_err("open should be rejected");
        assert_eq!(err, TransportError::Backend("refused".to_owned()));
        assert!(transport.opened().is_empty());

        transport.accept_opens();
        transport.open(SessionId(2), &uri).expect("open should work again");
    }
}
