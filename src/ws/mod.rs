//! WebSocket layer: connection halves, wire formats, and sessions.
//!
//! The endpoint at `/ws` upgrades each request into a session that is
//! registered with the [`crate::hub::Hub`] for broadcast, direct and group
//! routing.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod session;

pub use connection::{CloseReason, FrameReader, FrameWriter};
pub use messages::{InboundMessage, WelcomeMessage};
pub use session::{SessionConfig, run_session};
