use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use link_core::{
    ConnectionConfig, ConnectionEvent, ConnectionState, EventStream, NORMAL_CLOSURE,
    NotificationChange, NotificationDefaults, NotificationKind, RaiseOptions,
    RuntimeChannelError, RuntimeEvent, ReconnectPolicy,
};
use link_ws::{RuntimeConfig, RuntimeHandle, spawn_runtime};
use tokio::{
    net::TcpListener,
    sync::broadcast::error::RecvError,
    task::JoinHandle,
    time::{Instant, timeout},
};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

const WAIT: Duration = Duration::from_secs(5);

/// Echo server. `bye` closes normally, `drop` drops the socket without a
/// close frame.
struct EchoServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl EchoServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(text) if text == "bye" => {
                                let _ = ws
                                    .close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: "bye".into(),
                                    }))
                                    .await;
                                return;
                            }
                            Message::Text(text) if text == "drop" => return,
                            Message::Text(text) => {
                                if ws.send(Message::Text(text)).await.is_err() {
                                    return;
                                }
                            }
                            Message::Close(_) => return,
                            _ => {}
                        }
                    }
                });
            }
        });
        Self { addr, task }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn runtime_for(endpoint: String, policy: ReconnectPolicy) -> RuntimeHandle {
    spawn_runtime(RuntimeConfig::new(
        ConnectionConfig::new(endpoint).with_reconnect(policy),
    ))
}

async fn wait_for<F>(events: &mut EventStream, mut matches: F) -> RuntimeEvent
where
    F: FnMut(&RuntimeEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return event,
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => panic!("event stream closed"),
            Err(_) => panic!("timed out waiting for runtime event"),
        }
    }
}

fn is_open(event: &RuntimeEvent) -> bool {
    matches!(event, RuntimeEvent::Connection(ConnectionEvent::Open { .. }))
}

fn is_state(event: &RuntimeEvent, wanted: ConnectionState) -> bool {
    matches!(
        event,
        RuntimeEvent::Connection(ConnectionEvent::StateChanged { state }) if *state == wanted
    )
}

#[tokio::test]
async fn connects_and_echoes_payloads() {
    let server = EchoServer::start().await;
    let handle = runtime_for(server.url(), ReconnectPolicy::new(50, 3));
    let mut events = handle.subscribe();

    handle.connect().await.expect("connect should enqueue");
    wait_for(&mut events, is_open).await;

    handle
        .send(r#"{"type":"quote","rooms":3}"#)
        .await
        .expect("send should enqueue");
    let echoed = wait_for(&mut events, |event| {
        matches!(event, RuntimeEvent::Connection(ConnectionEvent::Message { .. }))
    })
    .await;
    match echoed {
        RuntimeEvent::Connection(ConnectionEvent::Message { payload, .. }) => {
            assert_eq!(payload, r#"{"type":"quote","rooms":3}"#)
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let notices = handle.list().await.expect("list should reply");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NotificationKind::Success);
    assert_eq!(notices[0].title, "Connected");
}

#[tokio::test]
async fn server_normal_close_does_not_reconnect() {
    let server = EchoServer::start().await;
    let handle = runtime_for(server.url(), ReconnectPolicy::new(20, 3));
    let mut events = handle.subscribe();

    handle.connect().await.expect("connect should enqueue");
    wait_for(&mut events, is_open).await;
    handle.send("bye").await.expect("send should enqueue");

    let closed = wait_for(&mut events, |event| {
        matches!(event, RuntimeEvent::Connection(ConnectionEvent::Close { .. }))
    })
    .await;
    assert!(matches!(
        closed,
        RuntimeEvent::Connection(ConnectionEvent::Close { code, .. }) if code == NORMAL_CLOSURE
    ));
    wait_for(&mut events, |event| {
        is_state(event, ConnectionState::Disconnected)
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!is_open(&event), "normal close must not reconnect");
    }
}

#[tokio::test]
async fn dropped_socket_reconnects_with_a_new_session() {
    let server = EchoServer::start().await;
    let handle = runtime_for(server.url(), ReconnectPolicy::new(20, 3));
    let mut events = handle.subscribe();

    handle.connect().await.expect("connect should enqueue");
    let first = match wait_for(&mut events, is_open).await {
        RuntimeEvent::Connection(ConnectionEvent::Open { session }) => session,
        other => panic!("unexpected event: {other:?}"),
    };

    handle.send("drop").await.expect("send should enqueue");
    let second = match wait_for(&mut events, is_open).await {
        RuntimeEvent::Connection(ConnectionEvent::Open { session }) => session,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_ne!(first, second);

    handle.send("after reconnect").await.expect("send should enqueue");
    wait_for(&mut events, |event| {
        matches!(
            event,
            RuntimeEvent::Connection(ConnectionEvent::Message { session, payload })
                if *session == second && payload == "after reconnect"
        )
    })
    .await;
}

#[tokio::test]
async fn refused_endpoint_fails_after_budget_with_pinned_error_notice() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let handle = runtime_for(format!("ws://127.0.0.1:{port}/ws"), ReconnectPolicy::new(10, 2));
    let mut events = handle.subscribe();
    handle.connect().await.expect("connect should enqueue");

    wait_for(&mut events, |event| is_state(event, ConnectionState::Failed)).await;

    let notices = handle.list().await.expect("list should reply");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NotificationKind::Error);
    assert_eq!(notices[0].title, "Unable to reconnect");
    assert!(notices[0].pinned);
}

#[tokio::test]
async fn close_stops_reconnecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let handle = runtime_for(
        format!("ws://127.0.0.1:{port}/ws"),
        ReconnectPolicy::new(30, 50),
    );
    let mut events = handle.subscribe();
    handle.connect().await.expect("connect should enqueue");
    wait_for(&mut events, |event| {
        matches!(event, RuntimeEvent::Connection(ConnectionEvent::Error(_)))
    })
    .await;

    handle.close().await.expect("close should enqueue");
    wait_for(&mut events, |event| {
        is_state(event, ConnectionState::Disconnected)
    })
    .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !is_state(&event, ConnectionState::Connecting),
            "no attempt may follow close()"
        );
    }
}

#[tokio::test]
async fn raised_notices_expire_and_publish_changes() {
    let handle = spawn_runtime(
        RuntimeConfig::new(ConnectionConfig::new("ws://127.0.0.1:9/ws"))
            .with_notifications(NotificationDefaults { expiry_ms: 40 }),
    );
    let mut events = handle.subscribe();

    let quick = handle
        .show_info("Quote received", "3 movers responded")
        .await
        .expect("raise should reply");
    let sticky = handle
        .show_error("Payment failed", "card declined")
        .await
        .expect("raise should reply");
    let custom = handle
        .raise(
            NotificationKind::Warning,
            "Pickup window",
            "tomorrow 8-10am",
            RaiseOptions::default().with_expiry(Duration::from_secs(60)),
        )
        .await
        .expect("raise should reply");

    wait_for(&mut events, |event| {
        matches!(
            event,
            RuntimeEvent::NotificationsChanged { change: NotificationChange::Dismissed(id), .. }
                if *id == quick
        )
    })
    .await;

    let remaining: Vec<_> = handle
        .list()
        .await
        .expect("list should reply")
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(remaining, vec![sticky, custom]);

    handle.dismiss(sticky).await.expect("dismiss should enqueue");
    handle.toggle_pin(custom).await.expect("pin should enqueue");
    let pinned = handle.list().await.expect("list should reply");
    assert_eq!(pinned.len(), 1);
    assert!(pinned[0].pinned);

    handle.clear_all().await.expect("clear should enqueue");
    assert!(handle.list().await.expect("list should reply").is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_runtime() {
    let server = EchoServer::start().await;
    let handle = runtime_for(server.url(), ReconnectPolicy::new(20, 3));
    let mut events = handle.subscribe();
    handle.connect().await.expect("connect should enqueue");
    wait_for(&mut events, is_open).await;

    handle.shutdown().await.expect("shutdown should enqueue");
    let closed = wait_for(&mut events, |event| {
        matches!(event, RuntimeEvent::NotificationsChanged { change: NotificationChange::Cleared, .. })
    })
    .await;
    assert!(matches!(
        closed,
        RuntimeEvent::NotificationsChanged { notifications, .. } if notifications.is_empty()
    ));

    let err = handle
        .list()
        .await
        .expect_err("a stopped runtime cannot reply");
    assert!(matches!(
        err,
        RuntimeChannelError::CommandChannelClosed | RuntimeChannelError::ReplyDropped
    ));
}

#[tokio::test]
async fn silent_endpoint_times_out_and_fails_after_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let held = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            sockets.push(stream);
        }
    });

    let handle = spawn_runtime(
        RuntimeConfig::new(
            ConnectionConfig::new(format!("ws://{addr}/ws"))
                .with_reconnect(ReconnectPolicy::new(10, 2)),
        )
        .with_handshake_timeout_ms(100),
    );
    let mut events = handle.subscribe();
    handle.connect().await.expect("connect should enqueue");

    let timed_out = wait_for(&mut events, |event| {
        matches!(event, RuntimeEvent::Connection(ConnectionEvent::Error(_)))
    })
    .await;
    assert!(matches!(
        timed_out,
        RuntimeEvent::Connection(ConnectionEvent::Error(err)) if err.message.contains("handshake timed out")
    ));
    wait_for(&mut events, |event| is_state(event, ConnectionState::Failed)).await;

    let notices = handle.list().await.expect("list should reply");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Unable to reconnect");
    held.abort();
}

#[tokio::test]
async fn abandoned_raise_still_records_the_notice() {
    let handle = spawn_runtime(RuntimeConfig::new(ConnectionConfig::new(
        "ws://127.0.0.1:9/ws",
    )));

    // Zero budget: the command is queued, then the reply receiver is dropped.
    let abandoned = timeout(
        Duration::ZERO,
        handle.show_warning("Crew delayed", "new ETA 11am"),
    )
    .await;
    assert!(abandoned.is_err());

    let notices = handle.list().await.expect("runtime should keep serving");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Crew delayed");
}
