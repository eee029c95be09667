//! Resilient connection manager.
//!
//! [`ConnectionManager`] owns at most one live session at a time and replaces
//! it on every (re)connect. Subscribers register once through [`on`] and keep
//! receiving events across every replacement, so they never see which session
//! object is current.
//!
//! The manager is driven from outside: the host feeds it transport signals
//! through [`handle_signal`] and timer fires through [`handle_timer`]. Each
//! call runs to completion, so no locking is needed.
//!
//! [`on`]: ConnectionManager::on
//! [`handle_signal`]: ConnectionManager::handle_signal
//! [`handle_timer`]: ConnectionManager::handle_timer

use std::sync::Arc;

use link_platform::{
    NORMAL_CLOSURE, SessionId, SessionSignal, SessionTransport, Signal, TimerId, TimerRegistry,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    error::{CloseKind, LinkError, LinkErrorCategory, classify_close_code},
    state_machine::{ConnectionInput, ConnectionStateMachine, Recovery},
    subscribers::{SubscriberTable, SubscriptionId},
    types::{ConnectionConfig, ConnectionEvent, ConnectionState, EventKind},
};

/// Query parameter carrying the auth token.
pub const TOKEN_QUERY_PARAM: &str = "token";

const CLIENT_CLOSE_REASON: &str = "closed by client";

/// Parse `endpoint` and append the token credential when one is supplied.
pub fn build_endpoint_uri(endpoint: &str, auth_token: Option<&str>) -> Result<Url, LinkError> {
    let mut uri = Url::parse(endpoint).map_err(|err| {
        LinkError::new(
            LinkErrorCategory::Config,
            "invalid_endpoint",
            format!("invalid endpoint '{endpoint}': {err}"),
        )
    })?;

    if let Some(token) = auth_token.filter(|token| !token.is_empty()) {
        uri.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    }
    Ok(uri)
}

pub struct ConnectionManager<T: SessionTransport, R: TimerRegistry> {
    config: ConnectionConfig,
    transport: T,
    timers: R,
    machine: ConnectionStateMachine,
    current_session: Option<SessionId>,
    last_session: u64,
    pending_retry: Option<TimerId>,
    subscribers: SubscriberTable<EventKind, ConnectionEvent>,
}

impl<T: SessionTransport, R: TimerRegistry> ConnectionManager<T, R> {
    pub fn new(config: ConnectionConfig, transport: T, timers: R) -> Self {
        let machine = ConnectionStateMachine::new(config.reconnect.max_attempts());
        Self {
            config,
            transport,
            timers,
            machine,
            current_session: None,
            last_session: 0,
            pending_retry: None,
            subscribers: SubscriberTable::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.machine.attempts()
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.current_session
    }

    pub fn has_pending_retry(&self) -> bool {
        self.pending_retry.is_some()
    }

    /// Subscribe to one event kind. The subscription outlives every session.
    pub fn on<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.subscribers.on(kind, Arc::new(callback))
    }

    pub fn off(&mut self, kind: EventKind, id: SubscriptionId) -> bool {
        self.subscribers.off(kind, id)
    }

    /// Open a session unless one is already opening or open.
    pub fn connect(&mut self) {
        match self.machine.apply(ConnectionInput::Connect) {
            Ok(events) => {
                self.dispatch_all(events);
                self.open_session();
            }
            Err(err) => debug!(state = ?self.state(), "connect ignored: {}", err.message),
        }
    }

    /// Forward a payload on the current session.
    ///
    /// Outside `Connected` this logs a `not_connected` warning and returns.
    pub fn send(&mut self, payload: &str) {
        let session = match (self.state(), self.current_session) {
            (ConnectionState::Connected, Some(session)) => session,
            (state, _) => {
                let err = LinkError::not_connected(state);
                warn!(code = %err.code, "{}", err.message);
                return;
            }
        };

        if let Err(err) = self.transport.send(session, payload) {
            let err = LinkError::new(LinkErrorCategory::Transport, "send_failed", err.to_string());
            warn!(%session, "{}", err.message);
            self.dispatch(ConnectionEvent::Error(err));
        }
    }

    /// Close the current session and stop reconnecting.
    ///
    /// Safe from any state. Leaves the manager `Disconnected` with no pending
    /// timer before returning.
    pub fn close(&mut self) {
        self.cancel_retry();
        let closed = self.detach_session(NORMAL_CLOSURE);
        let events = self
            .machine
            .apply(ConnectionInput::CloseRequested)
            .unwrap_or_default();

        if let Some(session) = closed {
            info!(%session, "connection closed by client");
            self.dispatch(ConnectionEvent::Close {
                session,
                code: NORMAL_CLOSURE,
                reason: CLIENT_CLOSE_REASON.to_owned(),
            });
        }
        self.dispatch_all(events);
    }

    /// Feed a transport signal. Signals from superseded sessions are dropped.
    pub fn handle_signal(&mut self, signal: SessionSignal) {
        let SessionSignal { session, signal } = signal;
        if self.current_session != Some(session) {
            trace!(%session, ?signal, "dropping signal from superseded session");
            return;
        }

        match signal {
            Signal::Open => match self.machine.apply(ConnectionInput::Opened) {
                Ok(events) => {
                    info!(%session, "connection open");
                    self.dispatch(ConnectionEvent::Open { session });
                    self.dispatch_all(events);
                }
                Err(err) => debug!(%session, "open ignored: {}", err.message),
            },
            Signal::Message(payload) => {
                self.dispatch(ConnectionEvent::Message { session, payload });
            }
            Signal::Error(message) => {
                debug!(%session, "transport error: {message}");
                self.dispatch(ConnectionEvent::Error(LinkError::transport(message)));
            }
            Signal::Close { code, reason } => {
                self.current_session = None;
                self.dispatch(ConnectionEvent::Close {
                    session,
                    code,
                    reason,
                });

                match classify_close_code(code) {
                    CloseKind::Normal => {
                        info!(%session, code, "connection closed");
                        let events = self
                            .machine
                            .apply(ConnectionInput::ClosedNormally)
                            .unwrap_or_default();
                        self.dispatch_all(events);
                    }
                    CloseKind::Abnormal => {
                        warn!(%session, code, "connection dropped");
                        self.recover(None);
                    }
                }
            }
        }
    }

    /// Feed a timer fire. Returns `true` when the fire belonged to this manager.
    pub fn handle_timer(&mut self, id: TimerId) -> bool {
        if self.pending_retry != Some(id) {
            return false;
        }
        self.pending_retry = None;

        if self.state() != ConnectionState::Connecting {
            debug!(state = ?self.state(), "reconnect timer fired outside connecting state");
            return true;
        }

        info!(attempt = self.reconnect_attempts(), "reconnecting");
        self.open_session();
        true
    }

    fn open_session(&mut self) {
        self.cancel_retry();
        self.detach_session(NORMAL_CLOSURE);

        self.last_session += 1;
        let session = SessionId(self.last_session);

        let opened = build_endpoint_uri(&self.config.endpoint, self.config.auth_token.as_deref())
            .and_then(|uri| {
                self.transport
                    .open(session, &uri)
                    .map_err(LinkError::session_open_failed)
            });

        match opened {
            Ok(()) => {
                debug!(%session, endpoint = %self.config.endpoint, "session opening");
                self.current_session = Some(session);
            }
            Err(err) => {
                warn!(%session, code = %err.code, "{}", err.message);
                self.recover(Some(err));
            }
        }
    }

    fn recover(&mut self, cause: Option<LinkError>) {
        match self.machine.on_abnormal_close() {
            Ok(Recovery::Retry { attempt, events }) => {
                let delay = self.config.reconnect.delay_for_attempt(attempt);
                if let Some(err) = cause {
                    self.dispatch(ConnectionEvent::Error(err.with_retry_after(delay)));
                }
                self.dispatch_all(events);
                self.pending_retry = Some(self.timers.schedule(delay));
                info!(
                    attempt,
                    max_attempts = self.config.reconnect.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
            }
            Ok(Recovery::Exhausted { attempts, events }) => {
                if let Some(err) = cause {
                    self.dispatch(ConnectionEvent::Error(err));
                }
                warn!(attempts, "reconnect budget exhausted");
                self.dispatch(ConnectionEvent::Error(LinkError::budget_exhausted(attempts)));
                self.dispatch_all(events);
            }
            Err(err) => debug!("recovery skipped: {}", err.message),
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(id) = self.pending_retry.take() {
            self.timers.cancel(id);
        }
    }

    fn detach_session(&mut self, code: u16) -> Option<SessionId> {
        let session = self.current_session.take()?;
        self.transport.close(session, code);
        Some(session)
    }

    fn dispatch(&self, event: ConnectionEvent) {
        self.subscribers.dispatch(event.kind(), &event);
    }

    fn dispatch_all(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            self.dispatch(event);
        }
    }
}

impl<T: SessionTransport, R: TimerRegistry> Drop for ConnectionManager<T, R> {
    fn drop(&mut self) {
        self.cancel_retry();
        self.detach_session(NORMAL_CLOSURE);
    }
}
