//! # sensor-hub
//!
//! Real-time telemetry fan-out gateway.
//!
//! WebSocket clients connect, receive a welcome frame carrying their session
//! id, and exchange broadcast, direct, and group messages through a single
//! hub. An ingest bridge subscribes to a telemetry topic, forwards every raw
//! payload to all sessions, and persists decoded sensor readings.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)         Telemetry transport
//!     │                                   │
//!     ├── Session tasks (ws/)             ├── IngestBridge (bridge/)
//!     ├── REST handlers (api/)            │       │
//!     │                                   │       └── ReadingSink (persistence/)
//!     └──────────────┬────────────────────┘               │
//!                    │                                    └── PostgreSQL
//!              Hub event loop (hub/)
//!                    │
//!              Registry: sessions + groups
//! ```
//!
//! All registry mutation happens on the hub's single event loop, so routing
//! never races with registration. A session whose outbound queue is full is
//! shed rather than allowed to stall the loop.

pub mod api;
pub mod app_state;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod logging;
pub mod persistence;
pub mod transport;
pub mod ws;
