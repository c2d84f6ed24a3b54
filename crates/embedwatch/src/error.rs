use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors raised at the HTTP boundary of the job and schedule APIs.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-success response. `body` is the server text, unmodified.
    #[error("Request failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Channel-level failures. None of these say anything about the job outcome.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Job id must not be empty")]
    EmptyJobId,

    #[error("Push channel could not be established: {0}")]
    PushConnect(String),

    #[error("Push channel closed: {0}")]
    PushClosed(String),

    #[error("Polling stopped: {0}")]
    Poll(#[from] ApiError),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid schedule: {0}")]
    Invalid(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Failed to read credential from file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}
