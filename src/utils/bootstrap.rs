//! Bootstrap utilities for vetledger binaries.

use std::time::Duration;

use backon::Retryable;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{StorageConfig, LOG_ENV_VAR};
use crate::storage;
use crate::utils::retry::{connection_backoff, is_busy};

/// Initialize tracing with the VETLEDGER_LOG environment variable.
///
/// Defaults to "info" level if VETLEDGER_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open the configured store, backing off while another process holds the
/// database locked.
pub async fn connect_with_retry(config: &StorageConfig) -> Result<SqlitePool, sqlx::Error> {
    let pool = (|| storage::connect(config))
        .retry(connection_backoff())
        .when(is_busy)
        .notify(|err: &sqlx::Error, dur: Duration| {
            warn!(path = %config.path, error = %err, delay = ?dur, "Clinic store busy, retrying");
        })
        .await
        .inspect_err(|e| error!(path = %config.path, "Failed to open clinic store: {}", e))?;

    info!(path = %config.path, in_memory = config.in_memory, "Opened clinic store");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_with_retry_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir.path().join("nested/clinic.db").to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let pool = connect_with_retry(&config).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        storage::bootstrap(&mut conn).await.unwrap();
        assert!(storage::table_exists(&mut conn, "_schema_ledger").await.unwrap());
    }
}
