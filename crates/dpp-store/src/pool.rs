use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// A single bounded connection pool per process, shared across the API,
/// worker, Reaper, and Reconciler binaries.
pub async fn connect(db_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await
        .context("connect to dpp postgres database")
}
