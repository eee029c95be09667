use std::{fmt, sync::Arc, time::Duration};

use link_platform::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{error::LinkError, retry::ReconnectPolicy};

/// Lifecycle state of a connection manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session and nothing scheduled.
    #[default]
    Disconnected,
    /// A session is being opened, or a reconnection attempt is scheduled.
    Connecting,
    /// The current session is open.
    Connected,
    /// The reconnect budget ran out. Only an explicit `connect()` leaves this state.
    Failed,
}

/// Payload-free discriminant of [`ConnectionEvent`], used as a subscription key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
    StateChanged,
}

/// Event re-dispatched by the connection manager to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The current session finished its handshake.
    Open { session: SessionId },
    /// A payload arrived on the current session.
    Message { session: SessionId, payload: String },
    /// Transport failure, misuse report, or budget exhaustion.
    Error(LinkError),
    /// The current session ended.
    Close {
        session: SessionId,
        code: u16,
        reason: String,
    },
    /// The manager moved to a new lifecycle state.
    StateChanged { state: ConnectionState },
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open { .. } => EventKind::Open,
            Self::Message { .. } => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Close { .. } => EventKind::Close,
            Self::StateChanged { .. } => EventKind::StateChanged,
        }
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Endpoint URI, for example `wss://realtime.shiplink.app/ws`.
    pub endpoint: String,
    /// Optional credential appended to the endpoint as a query parameter.
    pub auth_token: Option<String>,
    /// Retry interval and attempt budget.
    pub reconnect: ReconnectPolicy,
}

impl ConnectionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Default-expiry policy for the notification scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDefaults {
    /// Expiry applied to non-error notices raised without an explicit expiry.
    pub expiry_ms: u64,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            expiry_ms: crate::notifications::DEFAULT_EXPIRY_MS,
        }
    }
}

/// Opaque notification identity. Never reused by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notice-{}", self.0)
    }
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Success,
    Warning,
    Info,
    Error,
}

/// Presentation hint for a notification action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ActionStyle {
    #[default]
    Primary,
    Secondary,
    Danger,
}

/// Callback run when the user picks a notification action.
pub type ActionCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Button attached to a notification.
#[derive(Clone)]
pub struct NotificationAction {
    pub label: String,
    pub style: ActionStyle,
    callback: ActionCallback,
}

impl NotificationAction {
    pub fn new<F>(label: impl Into<String>, style: ActionStyle, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            style,
            callback: Arc::new(callback),
        }
    }

    /// Run the action callback.
    pub fn invoke(&self) {
        (self.callback)();
    }
}

impl fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAction")
            .field("label", &self.label)
            .field("style", &self.style)
            .finish_non_exhaustive()
    }
}

/// One user-visible notification.
///
/// Records handed out by the scheduler are snapshots; editing them has no
/// effect on the scheduler.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    /// Host clock at creation, in milliseconds.
    pub created_at_ms: u64,
    /// Pinned records are exempt from auto-expiry.
    pub pinned: bool,
    /// Auto-expiry window. `0` means never auto-expire.
    pub expiry_ms: u64,
}

/// Optional overrides for `raise`.
#[derive(Debug, Clone, Default)]
pub struct RaiseOptions {
    pub expiry_ms: Option<u64>,
    pub pinned: Option<bool>,
    pub actions: Vec<NotificationAction>,
}

impl RaiseOptions {
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry_ms = Some(expiry.as_millis() as u64);
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Change pushed to scheduler listeners.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationChange {
    Raised(NotificationId),
    Dismissed(NotificationId),
    PinToggled { id: NotificationId, pinned: bool },
    Cleared,
}

/// Command accepted by a runtime host.
#[derive(Debug)]
pub enum RuntimeCommand {
    /// Open a connection unless one is already active.
    Connect,
    /// Forward a payload on the current session.
    Send { payload: String },
    /// Close the connection and stop reconnecting.
    Close,
    /// Raise a notification and reply with its id.
    Raise {
        kind: NotificationKind,
        title: String,
        body: String,
        options: RaiseOptions,
        reply: oneshot::Sender<NotificationId>,
    },
    Dismiss { id: NotificationId },
    TogglePin { id: NotificationId },
    ClearAll,
    /// Reply with the current notifications, oldest first.
    List {
        reply: oneshot::Sender<Vec<NotificationRecord>>,
    },
    /// Close everything and stop the runtime.
    Shutdown,
}

/// Event broadcast by a runtime host.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Connection manager event.
    Connection(ConnectionEvent),
    /// Notification collection changed; carries the new snapshot.
    NotificationsChanged {
        change: NotificationChange,
        notifications: Vec<NotificationRecord>,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn event_kind_matches_variant() {
        let session = SessionId(3);
        assert_eq!(ConnectionEvent::Open { session }.kind(), EventKind::Open);
        assert_eq!(
            ConnectionEvent::Close {
                session,
                code: 1000,
                reason: String::new(),
            }
            .kind(),
            EventKind::Close
        );
        assert_eq!(
            ConnectionEvent::StateChanged {
                state: ConnectionState::Failed,
            }
            .kind(),
            EventKind::StateChanged
        );
    }

    #[test]
    fn action_callback_runs_on_invoke() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let action = NotificationAction::new("Track shipment", ActionStyle::Primary, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        action.clone().invoke();
        action.invoke();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn raise_options_builder_sets_overrides() {
        let options = RaiseOptions::default()
            .with_expiry(Duration::from_secs(7))
            .pinned(false);
        assert_eq!(options.expiry_ms, Some(7_000));
        assert_eq!(options.pinned, Some(false));
        assert!(options.actions.is_empty());
    }
}
