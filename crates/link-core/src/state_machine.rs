use crate::{
    error::LinkError,
    types::{ConnectionEvent, ConnectionState},
};

/// Inputs that move the connection lifecycle, other than abnormal closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    /// Explicit `connect()`.
    Connect,
    /// The current session signalled `open`.
    Opened,
    /// The current session closed with the normal-closure code.
    ClosedNormally,
    /// Explicit `close()`.
    CloseRequested,
}

/// Outcome of an abnormal close or a failed session construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Schedule reconnection attempt number `attempt`.
    Retry {
        attempt: u32,
        events: Vec<ConnectionEvent>,
    },
    /// Budget exhausted; the machine is now `Failed`.
    Exhausted {
        attempts: u32,
        events: Vec<ConnectionEvent>,
    },
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    attempts: u32,
    budget: u32,
    max_attempts: u32,
}

impl ConnectionStateMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            budget: max_attempts,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnection attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts allowed before giving up. Zero after `close()`.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn apply(&mut self, input: ConnectionInput) -> Result<Vec<ConnectionEvent>, LinkError> {
        use ConnectionState::*;

        match input {
            ConnectionInput::Connect => {
                let events = self.transition_from_any_of(&[Disconnected, Failed], Connecting, "connect")?;
                self.attempts = 0;
                self.budget = self.max_attempts;
                Ok(events)
            }
            ConnectionInput::Opened => {
                let events = self.transition_from_state(Connecting, Connected, "open")?;
                self.attempts = 0;
                Ok(events)
            }
            ConnectionInput::ClosedNormally => {
                self.transition_from_any_of(&[Connecting, Connected], Disconnected, "close")
            }
            ConnectionInput::CloseRequested => {
                self.budget = 0;
                self.attempts = 0;
                Ok(self.move_to(Disconnected))
            }
        }
    }

    /// Abnormal close of the current session, or failure to construct one.
    pub fn on_abnormal_close(&mut self) -> Result<Recovery, LinkError> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(LinkError::invalid_state(self.state, "abnormal_close"));
        }

        if self.attempts < self.budget {
            self.attempts += 1;
            let events = self.move_to(ConnectionState::Connecting);
            return Ok(Recovery::Retry {
                attempt: self.attempts,
                events,
            });
        }

        let events = self.move_to(ConnectionState::Failed);
        Ok(Recovery::Exhausted {
            attempts: self.attempts,
            events,
        })
    }

    fn move_to(&mut self, next: ConnectionState) -> Vec<ConnectionEvent> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        vec![ConnectionEvent::StateChanged { state: next }]
    }

    fn transition_from_state(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        action: &str,
    ) -> Result<Vec<ConnectionEvent>, LinkError> {
        if self.state != expected {
            return Err(LinkError::invalid_state(self.state, action));
        }
        Ok(self.move_to(next))
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        action: &str,
    ) -> Result<Vec<ConnectionEvent>, LinkError> {
        if !expected.contains(&self.state) {
            return Err(LinkError::invalid_state(self.state, action));
        }
        Ok(self.move_to(next))
    }
}
