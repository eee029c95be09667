//! Client-side runtime cores shared by every shiplink host.
//!
//! This crate holds the resilient connection manager, the notification
//! lifecycle scheduler, and the protocol types, retry policy, state machine
//! and channel abstractions around them. Nothing here sleeps or performs I/O:
//! timers and sessions come from the `link-platform` seams.

/// Async command/event channel primitives for runtime hosts.
pub mod channel;
/// Resilient connection manager.
pub mod connection;
/// Stable error types and close-code classification.
pub mod error;
/// Mapping from connection events to user-visible notices.
pub mod normalization;
/// Notification lifecycle scheduler.
pub mod notifications;
/// Reconnection delay policy.
pub mod retry;
/// Connection lifecycle state machine.
pub mod state_machine;
/// Typed callback tables.
pub mod subscribers;
/// Public protocol types (events, records, commands).
pub mod types;

pub use channel::{EventStream, RuntimeChannelError, RuntimeChannels};
pub use connection::{ConnectionManager, TOKEN_QUERY_PARAM, build_endpoint_uri};
pub use error::{CloseKind, LinkError, LinkErrorCategory, classify_close_code};
pub use link_platform::{
    ABNORMAL_CLOSURE, NORMAL_CLOSURE, SessionId, SessionSignal, SessionTransport, Signal, TimerId,
    TimerRegistry,
};
pub use normalization::{NoticeRequest, notice_for_event};
pub use notifications::{DEFAULT_EXPIRY_MS, NotificationScheduler};
pub use retry::{Backoff, ReconnectPolicy};
pub use state_machine::{ConnectionInput, ConnectionStateMachine, Recovery};
pub use subscribers::{Callback, CallbackList, SubscriberTable, SubscriptionId};
pub use types::{
    ActionStyle, ConnectionConfig, ConnectionEvent, ConnectionState, EventKind,
    NotificationAction, NotificationChange, NotificationDefaults, NotificationId,
    NotificationKind, NotificationRecord, RaiseOptions, RuntimeCommand, RuntimeEvent,
};
