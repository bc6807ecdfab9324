//! PostgreSQL connection pool construction.

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Connect a pool to the given database URL.
///
/// The pool is the only long-lived shared resource in the system; indexer
/// workers and search requests acquire and release connections per
/// operation.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;
    Ok(pool)
}
