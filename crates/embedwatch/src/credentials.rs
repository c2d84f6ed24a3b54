//! Resolution of the bearer credential used for the push channel and HTTP calls.
//!
//! Sources are tried in priority order:
//!
//! 1. **Direct value** - `token: "..."` in the config (local testing)
//! 2. **File reference** - `tokenFile: /run/secrets/embedwatch` (Docker secrets)
//! 3. **Env var reference** - `tokenEnv: EMBEDWATCH_TOKEN`
//!
//! A missing credential is not an error: without one the tracker simply skips
//! the push channel and polls.

use std::fs;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::config::CredentialConfig;
use crate::error::CredentialError;

/// Resolves the credential described by `config`.
///
/// Returns `Ok(None)` when no source is configured, when the env var is unset,
/// or when the resolved value is blank.
pub fn resolve_credential(
    config: &CredentialConfig,
) -> Result<Option<SecretString>, CredentialError> {
    if let Some(value) = non_empty(config.token.as_deref()) {
        return Ok(usable(value.trim()));
    }

    if let Some(path) = non_empty(config.token_file.as_deref()) {
        let expanded = expand_home(path);
        return match fs::read_to_string(&expanded) {
            Ok(content) => Ok(usable(content.trim())),
            Err(e) => Err(CredentialError::FileRead {
                path: expanded,
                source: e,
            }),
        };
    }

    if let Some(name) = non_empty(config.token_env.as_deref()) {
        return match std::env::var(name) {
            Ok(value) => Ok(usable(value.trim())),
            Err(std::env::VarError::NotPresent) => {
                log::debug!("Credential env var {} is not set", name);
                Ok(None)
            }
            Err(std::env::VarError::NotUnicode(_)) => Err(CredentialError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Ok(None)
}

/// True when a credential is present and non-blank.
pub fn is_usable(credential: Option<&SecretString>) -> bool {
    credential.is_some_and(|secret| !secret.expose_secret().trim().is_empty())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn usable(value: &str) -> Option<SecretString> {
    if value.is_empty() {
        None
    } else {
        Some(SecretString::from(value))
    }
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return match path.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home,
            };
        }
    }
    PathBuf::from(path)
}
