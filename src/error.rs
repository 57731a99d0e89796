//! Error types for every layer of the gateway.
//!
//! Each concern gets its own `thiserror` enum. Only [`GatewayError`] crosses
//! the HTTP boundary: it maps to a status code and a structured JSON body.
//! The others are absorbed where they occur (logged and dropped) or, for
//! [`BridgeError`], surfaced as a startup failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3002,
///     "message": "telemetry transport is not connected",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP-facing error enum with status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status                 |
/// |-----------|------------|-----------------------------|
/// | 1000–1999 | Validation | 400 Bad Request             |
/// | 2000–2999 | Lookup     | 404 Not Found               |
/// | 3000–3999 | Server     | 500 / 503                   |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The telemetry transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The hub event loop is gone or overloaded.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::NotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Transport(TransportError::NotConnected) => 3002,
            Self::Transport(_) => 3001,
            Self::Hub(_) => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transport(TransportError::NotConnected) | Self::Hub(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Transport(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure to hand a command to the hub event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The event loop has stopped; no further routing is possible.
    #[error("hub event loop has stopped")]
    Closed,

    /// The command queue is full and the caller asked not to wait.
    #[error("hub command queue is full")]
    Saturated,
}

/// Errors reported by a [`crate::transport::TelemetryTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport has no live connection to its broker.
    #[error("telemetry transport is not connected")]
    NotConnected,

    /// The broker refused or failed the subscription.
    #[error("failed to subscribe to {topic}: {reason}")]
    SubscribeFailed {
        /// Topic that was requested.
        topic: String,
        /// Broker- or transport-supplied reason.
        reason: String,
    },

    /// Unsubscribing failed.
    #[error("failed to unsubscribe from {topic}: {reason}")]
    UnsubscribeFailed {
        /// Topic that was requested.
        topic: String,
        /// Broker- or transport-supplied reason.
        reason: String,
    },

    /// Publishing failed.
    #[error("failed to publish to {topic}: {reason}")]
    PublishFailed {
        /// Destination topic.
        topic: String,
        /// Broker- or transport-supplied reason.
        reason: String,
    },
}

/// Errors reported by a [`crate::persistence::ReadingSink`].
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Database driver failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure at startup.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The sink refused the reading for a sink-specific reason.
    #[error("reading rejected: {0}")]
    Rejected(String),
}

/// Why a telemetry payload could not be turned into a
/// [`crate::domain::TelemetryReading`].
#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    /// The payload is not JSON at all.
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A required field is present but not numeric.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending JSON value, re-serialized.
        value: String,
    },
}

/// A well-formed control frame that cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// `direct` frame without a `to` address.
    #[error("direct frame has no recipient")]
    MissingRecipient,

    /// `direct` frame whose `to` is not a session id.
    #[error("direct frame addressed to malformed session id {0:?}")]
    InvalidRecipient(String),

    /// Group-addressed frame without a `groupId`.
    #[error("{0} frame has no groupId")]
    MissingGroup(&'static str),
}

/// I/O failure on one client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The underlying WebSocket failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    /// The peer is gone.
    #[error("connection closed")]
    Closed,
}

/// Fatal ingest bridge failure.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Subscribing or unsubscribing failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
