//! Telemetry publish handler.
//!
//! Lets HTTP clients inject a reading into the telemetry feed. The payload
//! goes through the transport like any device message, so the ingest
//! bridge broadcasts and persists it.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::api::dto::PublishTelemetryResponse;
use crate::app_state::AppState;
use crate::domain::TelemetryReading;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /telemetry`: Publish a JSON object on the telemetry topic.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if the body is not a JSON
/// object, or [`GatewayError::Transport`] if the transport is disconnected
/// or refuses the publish.
#[utoipa::path(
    post,
    path = "/api/v1/telemetry",
    tag = "Telemetry",
    summary = "Publish telemetry",
    description = "Publishes the request body on the configured telemetry topic. Any JSON object is accepted and broadcast; `reading` in the response shows what will be persisted.",
    request_body(content = Object, description = "Sensor payload, e.g. {\"temperature\":\"24.5\",\"humidity\":\"60\",\"light_raw\":\"120\"}", content_type = "application/json"),
    responses(
        (status = 202, description = "Payload published", body = PublishTelemetryResponse),
        (status = 400, description = "Body is not a JSON object", body = ErrorResponse),
        (status = 503, description = "Transport not connected", body = ErrorResponse),
    )
)]
pub async fn publish_telemetry(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let fields = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            return Err(GatewayError::InvalidRequest(
                "body must be a JSON object".to_string(),
            ));
        }
        Err(err) => return Err(GatewayError::InvalidRequest(err.to_string())),
    };
    let reading = TelemetryReading::from_fields(&fields).ok();
    let bytes = body.len();

    state
        .transport
        .publish(&state.telemetry_topic, state.telemetry_qos, body)
        .await?;
    tracing::debug!(topic = %state.telemetry_topic, bytes, "telemetry published over http");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishTelemetryResponse {
            topic: state.telemetry_topic.clone(),
            bytes,
            reading,
        }),
    ))
}

/// Telemetry routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/telemetry", post(publish_telemetry))
}
