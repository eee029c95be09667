//! Tokio host for the shiplink runtime cores.
//!
//! [`spawn_runtime`] starts one actor task that owns a
//! [`link_core::ConnectionManager`] over [`WsTransport`] and a
//! [`link_core::NotificationScheduler`], both timed by [`TokioTimers`].
//! Commands, transport signals and timer fires are processed one at a time.

mod runtime;
mod timers;
mod transport;

pub use runtime::{DEFAULT_HANDSHAKE_TIMEOUT_MS, RuntimeConfig, RuntimeHandle, spawn_runtime};
pub use timers::TokioTimers;
pub use transport::WsTransport;
