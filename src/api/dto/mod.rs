//! Data Transfer Objects for REST request/response serialization.

pub mod hub_dto;
pub mod telemetry_dto;

pub use hub_dto::*;
pub use telemetry_dto::*;
