//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::Span;

use crate::bridge::BridgeState;
use crate::hub::Hub;
use crate::transport::{QoS, TelemetryTransport};
use crate::ws::SessionConfig;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the fan-out hub.
    pub hub: Hub,
    /// Telemetry transport used by the HTTP publish endpoint.
    pub transport: Arc<dyn TelemetryTransport>,
    /// Topic HTTP publishes are sent to.
    pub telemetry_topic: String,
    /// QoS used for HTTP publishes.
    pub telemetry_qos: QoS,
    /// Latest ingest bridge lifecycle state.
    pub bridge_state: watch::Receiver<BridgeState>,
    /// Settings applied to every new WebSocket session.
    pub session_config: SessionConfig,
    /// Parent span for session spans.
    pub session_span: Span,
}
