//! Terminal chat client: streams messages to stdout, reads lines from stdin.

mod config;

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crosstalk_sdk::api::DEFAULT_SUGGESTION_CONTEXT;
use crosstalk_sdk::{
    ChatHandle, ChatObserver, ConnectionMode, ConnectionStatus, Message, MessageKind, connect,
};

use crate::config::{Args, FileConfig};

fn mode_name(mode: ConnectionMode) -> &'static str {
    match mode {
        ConnectionMode::Streaming => "streaming",
        ConnectionMode::Polling => "polling",
        ConnectionMode::Disconnected => "disconnected",
    }
}

struct PrintObserver;

impl ChatObserver for PrintObserver {
    fn on_message(&self, message: &Message) {
        let stamp = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let who = match message.kind {
            MessageKind::Sent => "you",
            _ => message.source_device_id.as_deref().unwrap_or("relay"),
        };
        println!("[{stamp}] {who}: {}", message.content);
    }

    fn on_connection_status_changed(&self, status: ConnectionStatus) {
        println!("* connection: {}", mode_name(status.mode));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crosstalk=info,crosstalk_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = config::resolve(args, FileConfig::load());

    info!(server = %config.server_url, "Connecting");
    let handle = connect(config, Arc::new(PrintObserver)).await?;
    println!("* device id: {}", handle.device_id());
    println!("* commands: /status /devices /suggest [context] /reconnect /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !handle_line(&handle, line).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(handle: &ChatHandle, line: &str) -> bool {
    let (cmd, rest) = match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    if !cmd.starts_with('/') {
        if let Err(e) = handle.send(line).await {
            eprintln!("send failed: {e}");
        }
        return true;
    }

    match cmd {
        "/quit" | "/exit" => return false,
        "/status" => match handle.status().await {
            Ok(status) => {
                let link = if status.connected { "connected" } else { "offline" };
                println!(
                    "* {link} ({}), {} messages, {} reconnect attempts",
                    mode_name(status.mode),
                    status.message_count,
                    status.reconnect_attempts,
                );
            }
            Err(e) => eprintln!("status failed: {e}"),
        },
        "/devices" => {
            let devices = handle.devices().await;
            if devices.is_empty() {
                println!("* no devices connected");
            }
            for device in devices {
                println!("* {device}");
            }
        }
        "/suggest" => {
            let context = if rest.is_empty() { DEFAULT_SUGGESTION_CONTEXT } else { rest };
            for suggestion in handle.suggestions(context).await {
                println!("* {suggestion}");
            }
        }
        "/reconnect" => handle.reconnect_now().await,
        other => eprintln!("unknown command: {other}"),
    }
    true
}
