//! Database connection pool management.

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Type alias for the PostgreSQL connection pool.
pub type DbPool = PgPool;

/// Create a connection pool sized from `config`.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout))
        .idle_timeout(config.idle_timeout.map(Duration::from_secs))
        .connect_with(config.connect_options())
        .await?;

    tracing::info!(
        url = %config.connection_url(),
        schema = %config.schema,
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// True if the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
