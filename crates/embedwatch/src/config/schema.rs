use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
/// Default schedule resync interval in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60;
/// Default countdown tick in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Base URL of the embedding server's HTTP API.
    pub api_url: String,
    /// Base URL of the push endpoint. Derived from `api_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long to wait for the push channel before falling back to polling.
    #[serde(default = "default_push_connect_timeout_secs")]
    pub push_connect_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub credential: CredentialConfig,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_resync_interval_secs() -> u64 {
    DEFAULT_RESYNC_INTERVAL_SECS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_push_connect_timeout_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Where to find the bearer credential. Sources are tried in field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl WatchConfig {
    /// Creates a config with default timings for the given server.
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            ws_url: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            push_connect_timeout_secs: default_push_connect_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            credential: CredentialConfig::default(),
        }
    }

    /// Push base URL: `ws_url` if set, else `api_url` with `http` → `ws`.
    pub fn push_base_url(&self) -> String {
        if let Some(ws_url) = &self.ws_url {
            return ws_url.trim_end_matches('/').to_string();
        }
        let api = self.api_url.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            api.to_string()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn push_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.push_connect_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
