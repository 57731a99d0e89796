//! Persistence layer: durable storage of decoded telemetry readings.
//!
//! The ingest bridge only sees the [`ReadingSink`] trait. The concrete
//! implementation writes to PostgreSQL through `sqlx::PgPool`;
//! [`DiscardSink`] stands in when persistence is disabled.

pub mod postgres;

use std::fmt;

use async_trait::async_trait;

use crate::domain::TelemetryReading;
use crate::error::PersistenceError;

pub use postgres::PostgresReadingSink;

/// Stores one reading per call.
///
/// Implementations are called from many concurrent tasks and must not
/// assume any ordering between calls.
#[async_trait]
pub trait ReadingSink: Send + Sync + fmt::Debug {
    /// Persists a reading.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the reading could not be stored.
    async fn create(&self, reading: TelemetryReading) -> Result<(), PersistenceError>;
}

/// Sink that accepts and forgets every reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

#[async_trait]
impl ReadingSink for DiscardSink {
    async fn create(&self, reading: TelemetryReading) -> Result<(), PersistenceError> {
        tracing::trace!(?reading, "persistence disabled, reading discarded");
        Ok(())
    }
}
