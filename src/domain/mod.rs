//! Domain layer: session and group identity plus decoded telemetry.
//!
//! These types are shared by the hub, the WebSocket sessions and the
//! ingest bridge. None of them carry behavior beyond parsing and
//! validation.

pub mod group_id;
pub mod reading;
pub mod session_id;

pub use group_id::GroupId;
pub use reading::TelemetryReading;
pub use session_id::SessionId;
