//! CLI configuration: flags win over the config file, the file over defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crosstalk_sdk::ChatConfig;

#[derive(Debug, Parser)]
#[command(name = "crosstalk", version, about = "Terminal client for crosstalk relays")]
pub struct Args {
    /// Relay URL, e.g. http://localhost:3333
    #[arg(short, long, env = "CROSSTALK_SERVER")]
    pub server: Option<String>,

    /// Prefix for a freshly minted device id (defaults to your username)
    #[arg(long)]
    pub device_prefix: Option<String>,

    /// Directory holding persistent client state
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Polling cadence in milliseconds while the stream is down
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// First reconnect delay in milliseconds
    #[arg(long)]
    pub reconnect_base_ms: Option<u64>,

    /// Scheduled reconnect attempts before settling on polling
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,

    /// Liveness check cadence in seconds
    #[arg(long)]
    pub liveness_secs: Option<u64>,
}

/// Optional on-disk settings, same shape as the flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: Option<String>,
    pub device_prefix: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub reconnect_base_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub liveness_secs: Option<u64>,
}

impl FileConfig {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crosstalk")
            .join("cli.toml")
    }

    /// Missing file is fine; a malformed one is reported and ignored.
    pub fn load() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("warning: ignoring malformed {}: {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

pub fn resolve(args: Args, file: FileConfig) -> ChatConfig {
    let defaults = ChatConfig::default();
    ChatConfig {
        server_url: args.server.or(file.server).unwrap_or(defaults.server_url),
        client_type: "cli".to_string(),
        device_prefix: args
            .device_prefix
            .or(file.device_prefix)
            .unwrap_or_else(default_prefix),
        state_dir: args.state_dir.or(file.state_dir),
        history_cap: defaults.history_cap,
        poll_interval: args
            .poll_interval_ms
            .or(file.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval),
        poll_limit: defaults.poll_limit,
        reconnect_base: args
            .reconnect_base_ms
            .or(file.reconnect_base_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconnect_base),
        max_reconnect_attempts: args
            .max_reconnect_attempts
            .or(file.max_reconnect_attempts)
            .unwrap_or(defaults.max_reconnect_attempts),
        liveness_interval: args
            .liveness_secs
            .or(file.liveness_secs)
            .map(Duration::from_secs)
            .unwrap_or(defaults.liveness_interval),
    }
}

fn default_prefix() -> String {
    whoami::fallible::username().unwrap_or_else(|_| "cli".to_string())
}
