//! Hub inspection handlers.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{GroupMembersResponse, HubStatusResponse, SessionGroupsResponse};
use crate::app_state::AppState;
use crate::domain::{GroupId, SessionId};
use crate::error::{ErrorResponse, GatewayError};

/// `GET /hub`: Registry counters and bridge state.
///
/// # Errors
///
/// Returns [`GatewayError::Hub`] if the hub event loop has stopped.
#[utoipa::path(
    get,
    path = "/api/v1/hub",
    tag = "Hub",
    summary = "Hub status",
    description = "Returns the number of registered sessions, live groups and memberships, plus the ingest bridge state.",
    responses(
        (status = 200, description = "Hub status", body = HubStatusResponse),
        (status = 503, description = "Hub stopped", body = ErrorResponse),
    )
)]
pub async fn hub_status(
    State(state): State<AppState>,
) -> Result<Json<HubStatusResponse>, GatewayError> {
    let hub = state.hub.stats().await?;
    Ok(Json(HubStatusResponse {
        hub,
        bridge: *state.bridge_state.borrow(),
        transport_connected: state.transport.is_connected(),
    }))
}

/// `GET /groups/{group}/members`: Members of one group.
///
/// An unknown group has no members; it is not an error.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a blank group name or
/// [`GatewayError::Hub`] if the hub event loop has stopped.
#[utoipa::path(
    get,
    path = "/api/v1/groups/{group}/members",
    tag = "Hub",
    summary = "List group members",
    params(("group" = String, Path, description = "Group name")),
    responses(
        (status = 200, description = "Group members", body = GroupMembersResponse),
        (status = 400, description = "Blank group name", body = ErrorResponse),
    )
)]
pub async fn group_members(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<GroupMembersResponse>, GatewayError> {
    let group = GroupId::new(group)
        .ok_or_else(|| GatewayError::InvalidRequest("group name must not be blank".to_string()))?;
    let members = state.hub.group_members(group.clone()).await?;
    Ok(Json(GroupMembersResponse {
        group: group.as_str().to_owned(),
        members: members.iter().map(|id| *id.as_uuid()).collect(),
    }))
}

/// `GET /sessions/{session_id}/groups`: Groups one session belongs to.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for a malformed id,
/// [`GatewayError::NotFound`] if the session is not registered, or
/// [`GatewayError::Hub`] if the hub event loop has stopped.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/groups",
    tag = "Hub",
    summary = "List a session's groups",
    params(("session_id" = String, Path, description = "Session UUID")),
    responses(
        (status = 200, description = "Session groups", body = SessionGroupsResponse),
        (status = 400, description = "Malformed session id", body = ErrorResponse),
        (status = 404, description = "Session not registered", body = ErrorResponse),
    )
)]
pub async fn session_groups(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionGroupsResponse>, GatewayError> {
    let id: SessionId = session_id
        .parse()
        .map_err(|_| GatewayError::InvalidRequest(format!("malformed session id {session_id:?}")))?;
    let groups = state
        .hub
        .session_groups(id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("session {id}")))?;
    Ok(Json(SessionGroupsResponse {
        session_id: *id.as_uuid(),
        groups: groups.iter().map(ToString::to_string).collect(),
    }))
}

/// Hub routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/hub", get(hub_status))
        .route("/groups/{group}/members", get(group_members))
        .route("/sessions/{session_id}/groups", get(session_groups))
}
