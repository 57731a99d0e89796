//! PostgreSQL implementation of the reading sink.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::ReadingSink;
use crate::config::GatewayConfig;
use crate::domain::TelemetryReading;
use crate::error::PersistenceError;

/// PostgreSQL-backed reading sink using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresReadingSink {
    pool: PgPool,
}

impl PostgresReadingSink {
    /// Creates a sink over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool from the gateway configuration and applies
    /// the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] if the database is unreachable or a
    /// migration fails.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to postgres"
        );
        Ok(Self::new(pool))
    }

    /// Inserts a reading and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError::Database`] on database failure.
    pub async fn insert(&self, reading: TelemetryReading) -> Result<i64, PersistenceError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO sensor_data (temperature, humidity, light) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.light)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl ReadingSink for PostgresReadingSink {
    async fn create(&self, reading: TelemetryReading) -> Result<(), PersistenceError> {
        let id = self.insert(reading).await?;
        tracing::debug!(id, "reading stored");
        Ok(())
    }
}
