//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! OpenAPI document live at the root.

pub mod dto;
pub mod handlers;

#[cfg(not(feature = "swagger-ui"))]
use axum::Json;
use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "sensor-hub", description = "Real-time telemetry fan-out gateway"),
    paths(
        handlers::system::health_handler,
        handlers::hub::hub_status,
        handlers::hub::group_members,
        handlers::hub::session_groups,
        handlers::telemetry::publish_telemetry,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::hub::HubStats,
        crate::bridge::BridgeState,
        crate::domain::TelemetryReading,
        dto::HubStatusResponse,
        dto::GroupMembersResponse,
        dto::SessionGroupsResponse,
        dto::PublishTelemetryResponse,
        handlers::system::HealthResponse,
    )),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Hub", description = "Session registry inspection"),
        (name = "Telemetry", description = "Telemetry injection"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route("/api-docs/openapi.json", get(openapi_json));

    router
}

/// Builds the full application: REST API, `/ws` upgrade route, HTTP
/// tracing, and permissive CORS.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(not(feature = "swagger-ui"))]
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
