use std::{
    env, fs,
    path::Path,
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_GATEWAY_HOST: &str = "https://ic0.app";
const DEFAULT_SOURCE_CANISTER: &str = "hx36f-waaaa-aaaai-aq32q-cai";
const DEFAULT_REGISTRY_CANISTER: &str = "ja3mj-viaaa-aaaan-qzq2q-cai";

/// Typed configuration for the monitor.
///
/// Credentials come from the environment (or a local `.env`); everything else
/// has production defaults and is overridable for staging setups.
#[derive(Clone, Debug)]
pub struct Config {
    // Chat platform credentials
    pub telegram_bot_token: String,
    /// Absent token disables the Discord guild channel instead of failing
    /// startup; Telegram is the primary connection.
    pub discord_bot_token: Option<String>,

    // Ledger gateway
    pub gateway_host: String,
    pub source_canister: String,
    pub registry_canister: String,

    // Cadences
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,

    // External call budgets
    pub gateway_timeout: Duration,
    pub send_timeout: Duration,

    // Liveness endpoint
    pub liveness_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let discord_bot_token = env_str("DISCORD_BOT_TOKEN").and_then(non_empty);

        let gateway_host = env_str("LEDGER_GATEWAY_HOST")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_GATEWAY_HOST.to_string());
        let source_canister = env_str("SOURCE_CANISTER_ID")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_SOURCE_CANISTER.to_string());
        let registry_canister = env_str("REGISTRY_CANISTER_ID")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_REGISTRY_CANISTER.to_string());

        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECS").unwrap_or(10));
        let heartbeat_interval =
            Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS").unwrap_or(600));
        let reconnect_delay = Duration::from_secs(env_u64("RECONNECT_DELAY_SECS").unwrap_or(5));

        let gateway_timeout = Duration::from_secs(env_u64("GATEWAY_TIMEOUT_SECS").unwrap_or(30));
        let send_timeout = Duration::from_secs(env_u64("SEND_TIMEOUT_SECS").unwrap_or(10));

        let liveness_port = env_u64("LIVENESS_PORT").map(|p| p as u16).unwrap_or(3000);

        Ok(Self {
            telegram_bot_token,
            discord_bot_token,
            gateway_host,
            source_canister,
            registry_canister,
            poll_interval,
            heartbeat_interval,
            reconnect_delay,
            gateway_timeout,
            send_timeout,
            liveness_port,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
