use std::time::Duration;

use link_platform::{NORMAL_CLOSURE, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkErrorCategory {
    /// Connection refused, dropped, or otherwise failed in the transport.
    Transport,
    /// Reconnect budget ran out; terminal until the next explicit connect.
    BudgetExhausted,
    /// Caller tried to send while no session was open.
    NotConnected,
    /// Invalid endpoint or other configuration issue.
    Config,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload carried on the `Error` event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct LinkError {
    /// High-level error category.
    pub category: LinkErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Delay before the next reconnection attempt, when one is scheduled.
    pub retry_after_ms: Option<u64>,
}

impl LinkError {
    /// Construct a new error.
    pub fn new(
        category: LinkErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach the scheduled retry delay to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// `send` was called while the manager was not connected.
    pub fn not_connected(current: ConnectionState) -> Self {
        Self::new(
            LinkErrorCategory::NotConnected,
            "not_connected",
            format!("cannot send while connection is {current:?}"),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            LinkErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is {current:?}"),
        )
    }

    /// Reconnect budget exhausted after `attempts` retries.
    pub fn budget_exhausted(attempts: u32) -> Self {
        Self::new(
            LinkErrorCategory::BudgetExhausted,
            "reconnect_budget_exhausted",
            format!("gave up reconnecting after {attempts} attempts"),
        )
    }

    /// A session could not be constructed.
    pub fn session_open_failed(err: TransportError) -> Self {
        Self::new(
            LinkErrorCategory::Transport,
            "session_open_failed",
            err.to_string(),
        )
    }

    /// Error reported by an open session.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(LinkErrorCategory::Transport, "transport_error", message)
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CloseKind {
    /// Intentional closure; no reconnection.
    Normal,
    /// Anything else; eligible for reconnection.
    Abnormal,
}

/// Map WebSocket close codes to a close kind.
pub fn classify_close_code(code: u16) -> CloseKind {
    match code {
        NORMAL_CLOSURE => CloseKind::Normal,
        _ => CloseKind::Abnormal,
    }
}
