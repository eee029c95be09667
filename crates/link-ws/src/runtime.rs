use std::time::Duration;

use link_core::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, EventKind, EventStream,
    NotificationChange, NotificationDefaults, NotificationId, NotificationKind,
    NotificationRecord, NotificationScheduler, RaiseOptions, RuntimeChannelError,
    RuntimeChannels, RuntimeCommand, RuntimeEvent, SessionSignal, TimerId, notice_for_event,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::{timers::TokioTimers, transport::WsTransport};

const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;
/// Upper bound on TCP connect plus the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Settings for [`spawn_runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub connection: ConnectionConfig,
    pub notifications: NotificationDefaults,
    /// A session that has not opened within this window fails with an
    /// abnormal close and is retried.
    pub handshake_timeout_ms: u64,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl RuntimeConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            notifications: NotificationDefaults::default(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_notifications(mut self, notifications: NotificationDefaults) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_handshake_timeout_ms(mut self, handshake_timeout_ms: u64) -> Self {
        self.handshake_timeout_ms = handshake_timeout_ms.max(1);
        self
    }
}

/// Cloneable front end of a running runtime.
///
/// The runtime stops when [`shutdown`](Self::shutdown) is processed or when
/// the last handle is dropped.
#[derive(Clone, Debug)]
pub struct RuntimeHandle {
    channels: RuntimeChannels,
}

impl RuntimeHandle {
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub async fn connect(&self) -> Result<(), RuntimeChannelError> {
        self.channels.send_command(RuntimeCommand::Connect).await
    }

    pub async fn send(&self, payload: impl Into<String>) -> Result<(), RuntimeChannelError> {
        self.channels
            .send_command(RuntimeCommand::Send {
                payload: payload.into(),
            })
            .await
    }

    pub async fn close(&self) -> Result<(), RuntimeChannelError> {
        self.channels.send_command(RuntimeCommand::Close).await
    }

    pub async fn raise(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        options: RaiseOptions,
    ) -> Result<NotificationId, RuntimeChannelError> {
        let (reply, wait) = oneshot::channel();
        self.channels
            .send_command(RuntimeCommand::Raise {
                kind,
                title: title.into(),
                body: body.into(),
                options,
                reply,
            })
            .await?;
        wait.await.map_err(|_| RuntimeChannelError::ReplyDropped)
    }

    pub async fn show_success(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<NotificationId, RuntimeChannelError> {
        self.raise(NotificationKind::Success, title, body, RaiseOptions::default())
            .await
    }

    pub async fn show_warning(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<NotificationId, RuntimeChannelError> {
        self.raise(NotificationKind::Warning, title, body, RaiseOptions::default())
            .await
    }

    pub async fn show_info(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<NotificationId, RuntimeChannelError> {
        self.raise(NotificationKind::Info, title, body, RaiseOptions::default())
            .await
    }

    pub async fn show_error(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<NotificationId, RuntimeChannelError> {
        self.raise(NotificationKind::Error, title, body, RaiseOptions::default())
            .await
    }

    pub async fn dismiss(&self, id: NotificationId) -> Result<(), RuntimeChannelError> {
        self.channels
            .send_command(RuntimeCommand::Dismiss { id })
            .await
    }

    pub async fn toggle_pin(&self, id: NotificationId) -> Result<(), RuntimeChannelError> {
        self.channels
            .send_command(RuntimeCommand::TogglePin { id })
            .await
    }

    pub async fn clear_all(&self) -> Result<(), RuntimeChannelError> {
        self.channels.send_command(RuntimeCommand::ClearAll).await
    }

    pub async fn list(&self) -> Result<Vec<NotificationRecord>, RuntimeChannelError> {
        let (reply, wait) = oneshot::channel();
        self.channels
            .send_command(RuntimeCommand::List { reply })
            .await?;
        wait.await.map_err(|_| RuntimeChannelError::ReplyDropped)
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeChannelError> {
        self.channels.send_command(RuntimeCommand::Shutdown).await
    }
}

/// Start a runtime task owning one connection manager and one notification
/// scheduler. Must be called from within a Tokio runtime.
pub fn spawn_runtime(config: RuntimeConfig) -> RuntimeHandle {
    let (channels, command_rx) = RuntimeChannels::new(config.command_buffer, config.event_buffer);
    let runtime = LinkRuntime::new(config, channels.event_sender(), command_rx);
    tokio::spawn(async move {
        runtime.run().await;
    });

    RuntimeHandle { channels }
}

struct LinkRuntime {
    events: broadcast::Sender<RuntimeEvent>,
    command_rx: mpsc::Receiver<RuntimeCommand>,
    signal_rx: mpsc::UnboundedReceiver<SessionSignal>,
    connection_timer_rx: mpsc::UnboundedReceiver<TimerId>,
    notice_timer_rx: mpsc::UnboundedReceiver<TimerId>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    change_rx: mpsc::UnboundedReceiver<NotificationChange>,
    manager: ConnectionManager<WsTransport, TokioTimers>,
    scheduler: NotificationScheduler<TokioTimers>,
}

impl LinkRuntime {
    fn new(
        config: RuntimeConfig,
        events: broadcast::Sender<RuntimeEvent>,
        command_rx: mpsc::Receiver<RuntimeCommand>,
    ) -> Self {
        let (transport, signal_rx) =
            WsTransport::new(Duration::from_millis(config.handshake_timeout_ms));
        let (connection_timers, connection_timer_rx) = TokioTimers::new();
        let (notice_timers, notice_timer_rx) = TokioTimers::new();

        let mut manager = ConnectionManager::new(config.connection, transport, connection_timers);
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        for kind in [
            EventKind::Open,
            EventKind::Message,
            EventKind::Error,
            EventKind::Close,
            EventKind::StateChanged,
        ] {
            let connection_tx = connection_tx.clone();
            manager.on(kind, move |event| {
                let _ = connection_tx.send(event.clone());
            });
        }

        let mut scheduler = NotificationScheduler::with_defaults(notice_timers, config.notifications);
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        scheduler.on_change(move |change| {
            let _ = change_tx.send(*change);
        });

        Self {
            events,
            command_rx,
            signal_rx,
            connection_timer_rx,
            notice_timer_rx,
            connection_rx,
            change_rx,
            manager,
            scheduler,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(RuntimeCommand::Shutdown) => {
                        debug!("runtime shutdown requested");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("every runtime handle dropped");
                        break;
                    }
                },
                Some(signal) = self.signal_rx.recv() => self.manager.handle_signal(signal),
                Some(id) = self.connection_timer_rx.recv() => {
                    self.manager.handle_timer(id);
                }
                Some(id) = self.notice_timer_rx.recv() => {
                    self.scheduler.handle_timer(id);
                }
            }
            self.flush();
        }

        self.manager.close();
        self.flush();
        self.scheduler.clear_all();
        self.flush();
        info!("runtime stopped");
    }

    fn handle_command(&mut self, command: RuntimeCommand) {
        match command {
            RuntimeCommand::Connect => self.manager.connect(),
            RuntimeCommand::Send { payload } => self.manager.send(&payload),
            RuntimeCommand::Close => self.manager.close(),
            RuntimeCommand::Raise {
                kind,
                title,
                body,
                options,
                reply,
            } => {
                let id = self.scheduler.raise(kind, title, body, options);
                if reply.send(id).is_err() {
                    trace!(%id, "raise caller went away before the reply");
                }
            }
            RuntimeCommand::Dismiss { id } => {
                self.scheduler.dismiss(id);
            }
            RuntimeCommand::TogglePin { id } => {
                self.scheduler.toggle_pin(id);
            }
            RuntimeCommand::ClearAll => self.scheduler.clear_all(),
            RuntimeCommand::List { reply } => {
                if reply.send(self.scheduler.list()).is_err() {
                    trace!("list caller went away before the reply");
                }
            }
            RuntimeCommand::Shutdown => {}
        }
    }

    /// Publish queued connection events, raise their notices, then publish
    /// the resulting notification changes.
    fn flush(&mut self) {
        while let Ok(event) = self.connection_rx.try_recv() {
            if let Some(notice) = notice_for_event(&event) {
                self.scheduler
                    .raise(notice.kind, notice.title, notice.body, RaiseOptions::default());
            }
            let _ = self.events.send(RuntimeEvent::Connection(event));
        }

        while let Ok(change) = self.change_rx.try_recv() {
            let _ = self.events.send(RuntimeEvent::NotificationsChanged {
                change,
                notifications: self.scheduler.list(),
            });
        }
    }
}
