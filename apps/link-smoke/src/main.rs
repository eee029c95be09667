mod config;
mod logging;

use link_core::{ConnectionEvent, RuntimeEvent};
use link_ws::{RuntimeHandle, spawn_runtime};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};

use crate::config::SmokeConfig;

const HELP: &str = "lines are sent as payloads; commands: /connect /close /list /clear /quit";

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    info!(endpoint = %config.endpoint, environment = ?config.environment, "starting link smoke");

    let handle = spawn_runtime(config.runtime_config());
    let printer = tokio::spawn(print_events(handle.subscribe()));

    if let Err(err) = handle.connect().await {
        eprintln!("Runtime unavailable: {err}");
        std::process::exit(1);
    }
    println!("{HELP}");

    if let Err(err) = read_stdin(&handle).await {
        warn!(error = %err, "stdin closed with error");
    }

    let _ = handle.shutdown().await;
    drop(handle);
    let _ = printer.await;
}

async fn read_stdin(handle: &RuntimeHandle) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match line.trim() {
            "" => continue,
            "/quit" => break,
            "/connect" => handle.connect().await,
            "/close" => handle.close().await,
            "/clear" => handle.clear_all().await,
            "/list" => handle.list().await.map(|notifications| {
                for record in notifications {
                    let pin = if record.pinned { " [pinned]" } else { "" };
                    println!("  {} {:?}: {}{pin}", record.id, record.kind, record.title);
                }
            }),
            _ => handle.send(line.as_str()).await,
        };
        if let Err(err) = outcome {
            eprintln!("Runtime unavailable: {err}");
            break;
        }
    }
    Ok(())
}

async fn print_events(mut events: link_core::EventStream) {
    loop {
        match events.recv().await {
            Ok(RuntimeEvent::Connection(event)) => match event {
                ConnectionEvent::Open { session } => println!("<< open ({session})"),
                ConnectionEvent::Message { payload, .. } => println!("<< {payload}"),
                ConnectionEvent::Error(err) => println!("<< error {}: {}", err.code, err.message),
                ConnectionEvent::Close { code, reason, .. } => {
                    println!("<< close {code} {reason}")
                }
                ConnectionEvent::StateChanged { state } => println!("<< state {state:?}"),
            },
            Ok(RuntimeEvent::NotificationsChanged {
                change,
                notifications,
            }) => println!("<< notices {change:?} ({} live)", notifications.len()),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
