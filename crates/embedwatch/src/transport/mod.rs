//! Update channels for a tracked job: a WebSocket push channel with an HTTP
//! poll fallback, reconciled into one stream of snapshots.

pub mod push;
pub mod reconciler;

pub use push::{PushChannel, PushConnector, PushMessage, WsConnector};
pub use reconciler::{ReconcilerSettings, TransportEvent, TransportReconciler, TransportState};
