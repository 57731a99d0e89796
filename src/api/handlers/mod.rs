//! REST endpoint handlers organized by resource.

pub mod hub;
pub mod system;
pub mod telemetry;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(hub::routes())
        .merge(telemetry::routes())
}
