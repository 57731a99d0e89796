//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::split_websocket;
use super::session::run_session;
use crate::app_state::AppState;

/// `GET /ws`: Upgrade HTTP connection to WebSocket and start a session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (reader, writer) = split_websocket(socket);
        run_session(
            state.hub,
            reader,
            writer,
            state.session_config,
            state.session_span,
        )
        .await;
    })
}
