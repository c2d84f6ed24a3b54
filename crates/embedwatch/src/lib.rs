pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod progress;
pub mod schedule;
pub mod tracker;
pub mod transport;

pub use api::{CancelAck, HttpApiClient, JobApi, ScheduleApi, TriggerAck};
pub use config::{default_config_path, load_config, CredentialConfig, WatchConfig};
pub use credentials::resolve_credential;
pub use error::{ApiError, ConfigError, CredentialError, ScheduleError, TransportError};
pub use logging::{init_logging, LogFormat};
pub use progress::{JobStatus, ProgressSnapshot};
pub use schedule::{EngineSettings, ScheduleDescriptor, ScheduleEngine, ScheduleType, ScheduleView};
pub use tracker::{
    CancelHandle, CancelOutcome, JobTracker, TrackerCallbacks, TrackerOutcome, TrackerPhase,
    TrackerView,
};
pub use transport::{ReconcilerSettings, TransportReconciler, TransportState, WsConnector};
