use std::path::{Path, PathBuf};

use crate::config::schema::WatchConfig;
use crate::error::ConfigError;

const CONFIG_DIR_NAME: &str = "embedwatch";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default config location, e.g. `~/.config/embedwatch/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WatchConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<WatchConfig, ConfigError> {
    let config: WatchConfig = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &WatchConfig) -> Result<(), ConfigError> {
    if !(config.api_url.starts_with("http://") || config.api_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!("apiUrl must be an http(s) URL, got '{}'", config.api_url),
        });
    }

    if let Some(ws_url) = &config.ws_url {
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConfigError::Validation {
                message: format!("wsUrl must be a ws(s) URL, got '{}'", ws_url),
            });
        }
    }

    let intervals = [
        ("pollIntervalSecs", config.poll_interval_secs),
        ("resyncIntervalSecs", config.resync_interval_secs),
        ("tickIntervalMs", config.tick_interval_ms),
        ("pushConnectTimeoutSecs", config.push_connect_timeout_secs),
        ("connectTimeoutSecs", config.connect_timeout_secs),
        ("requestTimeoutSecs", config.request_timeout_secs),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    Ok(())
}
