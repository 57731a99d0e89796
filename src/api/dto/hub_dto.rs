//! Hub inspection DTOs.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::bridge::BridgeState;
use crate::hub::HubStats;

/// Response for `GET /api/v1/hub`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HubStatusResponse {
    /// Registry counters.
    pub hub: HubStats,
    /// Ingest bridge lifecycle state.
    pub bridge: BridgeState,
    /// Whether the telemetry transport has a live connection.
    pub transport_connected: bool,
}

/// Response for `GET /api/v1/groups/{group}/members`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupMembersResponse {
    /// Group name.
    pub group: String,
    /// Registered members, in no particular order.
    pub members: Vec<Uuid>,
}

/// Response for `GET /api/v1/sessions/{session_id}/groups`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionGroupsResponse {
    /// Session identifier.
    pub session_id: Uuid,
    /// Groups the session belongs to, sorted.
    pub groups: Vec<String>,
}
