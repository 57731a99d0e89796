//! Telemetry publish DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::TelemetryReading;

/// Response for `POST /api/v1/telemetry`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublishTelemetryResponse {
    /// Topic the payload was published on.
    pub topic: String,
    /// Size of the published payload in bytes.
    pub bytes: usize,
    /// Reading the bridge will persist, or `None` if the payload is not a
    /// valid reading (it is still broadcast).
    pub reading: Option<TelemetryReading>,
}
