use std::{collections::HashMap, time::Duration};

use futures_util::{SinkExt, StreamExt};
use link_platform::{
    ABNORMAL_CLOSURE, NORMAL_CLOSURE, SessionId, SessionSignal, SessionTransport, Signal,
    TransportError,
};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close(u16),
}

#[derive(Debug)]
struct SessionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

/// WebSocket session transport on top of `tokio-tungstenite`.
///
/// Every session runs in its own task. Signals from all sessions are
/// multiplexed onto the receiver returned by [`WsTransport::new`], tagged
/// with their session id.
///
/// A handshake that does not finish within the configured timeout is
/// reported as an error followed by an abnormal close, so the connection
/// manager retries it like any other failed attempt.
#[derive(Debug)]
pub struct WsTransport {
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
    sessions: HashMap<SessionId, SessionHandle>,
    handshake_timeout: Duration,
    stop: CancellationToken,
}

impl WsTransport {
    pub fn new(handshake_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        (
            Self {
                signal_tx,
                sessions: HashMap::new(),
                handshake_timeout,
                stop: CancellationToken::new(),
            },
            signal_rx,
        )
    }

    /// Sessions whose task is still running.
    pub fn live_sessions(&self) -> usize {
        self.sessions
            .values()
            .filter(|handle| !handle.task.is_finished())
            .count()
    }
}

impl SessionTransport for WsTransport {
    fn open(&mut self, session: SessionId, uri: &Url) -> Result<(), TransportError> {
        match uri.scheme() {
            "ws" | "wss" => {}
            other => return Err(TransportError::UnsupportedScheme(other.to_owned())),
        }

        self.sessions.retain(|_, handle| !handle.task.is_finished());

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            session,
            uri.to_string(),
            self.handshake_timeout,
            outbound_rx,
            self.signal_tx.clone(),
            self.stop.child_token(),
        ));
        self.sessions.insert(session, SessionHandle { outbound, task });
        Ok(())
    }

    fn send(&mut self, session: SessionId, payload: &str) -> Result<(), TransportError> {
        let handle = self
            .sessions
            .get(&session)
            .ok_or(TransportError::UnknownSession(session))?;
        handle
            .outbound
            .send(Outbound::Text(payload.to_owned()))
            .map_err(|_| TransportError::UnknownSession(session))
    }

    fn close(&mut self, session: SessionId, code: u16) {
        if let Some(handle) = self.sessions.remove(&session) {
            let _ = handle.outbound.send(Outbound::Close(code));
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_session(
    session: SessionId,
    uri: String,
    handshake_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
    stop: CancellationToken,
) {
    let emit = |signal: Signal| {
        let _ = signal_tx.send(SessionSignal::new(session, signal));
    };

    let connected = tokio::select! {
        _ = stop.cancelled() => return,
        // Nothing is sent before `Open`, so anything here is a close request.
        _ = outbound_rx.recv() => {
            debug!(%session, "session closed before handshake finished");
            return;
        }
        result = timeout(handshake_timeout, connect_async(uri.as_str())) => result,
    };

    let handshake = match connected {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(err)) => {
            warn!(%session, error = %err, "websocket connect failed");
            Err(err.to_string())
        }
        Err(_) => {
            warn!(
                %session,
                timeout_ms = handshake_timeout.as_millis() as u64,
                "websocket handshake timed out"
            );
            Err("handshake timed out".to_owned())
        }
    };
    let stream = match handshake {
        Ok(stream) => stream,
        Err(message) => {
            emit(Signal::Error(message));
            emit(Signal::Close {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            });
            return;
        }
    };

    debug!(%session, "websocket open");
    emit(Signal::Open);
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = write.send(close_message(NORMAL_CLOSURE)).await;
                return;
            }
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Text(payload)) => {
                    if let Err(err) = write.send(Message::Text(payload)).await {
                        emit(Signal::Error(err.to_string()));
                        emit(Signal::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: String::new(),
                        });
                        return;
                    }
                }
                Some(Outbound::Close(code)) => {
                    trace!(%session, code, "sending close frame");
                    let _ = write.send(close_message(code)).await;
                    return;
                }
                None => {
                    let _ = write.send(close_message(NORMAL_CLOSURE)).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(Signal::Message(text)),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    debug!(%session, code, "peer closed websocket");
                    emit(Signal::Close { code, reason });
                    return;
                }
                Some(Ok(other)) => trace!(%session, ?other, "ignoring non-text frame"),
                Some(Err(err)) => {
                    debug!(%session, error = %err, "websocket stream failed");
                    emit(Signal::Error(err.to_string()));
                    emit(Signal::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    return;
                }
                None => {
                    emit(Signal::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    return;
                }
            },
        }
    }
}

fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}
