use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{RuntimeCommand, RuntimeEvent};

/// Broadcast event stream handed to runtime subscribers.
pub type EventStream = broadcast::Receiver<RuntimeEvent>;

/// Errors returned by runtime channel operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeChannelError {
    /// The runtime stopped and no longer accepts commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The runtime dropped a command without replying.
    #[error("runtime dropped the reply")]
    ReplyDropped,
}

/// Command/event channel pair shared by a runtime and its handles.
#[derive(Clone, Debug)]
pub struct RuntimeChannels {
    command_tx: mpsc::Sender<RuntimeCommand>,
    event_tx: broadcast::Sender<RuntimeEvent>,
}

impl RuntimeChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<RuntimeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Sender for the runtime side. Dropping every handle does not close it.
    pub fn event_sender(&self) -> broadcast::Sender<RuntimeEvent> {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: RuntimeCommand) -> Result<(), RuntimeChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RuntimeChannelError::CommandChannelClosed)
    }
}
