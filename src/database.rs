//! Postgres pool construction.

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

const MAX_CONNECTIONS: u32 = 5;

/// Connects to Postgres, retrying up to `attempts` times with a fixed `backoff` between
/// attempts. Returns the last connection error once attempts are exhausted.
pub async fn connect_with_retry(
    url: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<PgPool, sqlx::Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await
        {
            Ok(pool) => {
                tracing::info!(attempt, "connected to Postgres");
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    attempts,
                    backoff_secs = backoff.as_secs(),
                    "database connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
