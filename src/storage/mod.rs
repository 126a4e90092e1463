//! SQLite storage substrate.
//!
//! Pool construction, the internal bookkeeping tables and a few catalog
//! helpers shared by the migration engine and the metrics maintainer.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::info;

use crate::config::StorageConfig;

pub mod schema;

/// Open a pool according to configuration.
pub async fn connect(config: &StorageConfig) -> Result<SqlitePool, sqlx::Error> {
    if config.in_memory {
        return connect_in_memory().await;
    }

    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    info!("Storage: sqlite at {}", config.path);

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await
}

/// Open a private in-memory database.
///
/// Every in-memory connection is its own database, so the pool holds exactly
/// one connection and never recycles it.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Begin a transaction that takes the write lock up front.
///
/// Under WAL a deferred transaction that reads first fails with SQLITE_BUSY
/// when it later writes; an immediate one waits out the busy timeout.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}

/// Create the internal bookkeeping tables if missing. Idempotent.
pub async fn bootstrap(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for sql in schema::bootstrap_statements() {
        sqlx::query(sql).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Quote an identifier for inclusion in raw SQL.
pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether a table with this exact name exists.
pub async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

/// Whether `table` currently has a column named `column`.
pub async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
    )
    .bind(table)
    .bind(column)
    .fetch_one(&mut *conn)
    .await
}

/// Row count of a table.
pub async fn count_rows(conn: &mut SqliteConnection, table: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", ident(table)))
        .fetch_one(&mut *conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_escapes_quotes() {
        assert_eq!(ident("pets"), "\"pets\"");
        assert_eq!(ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        bootstrap(&mut conn).await.unwrap();
        bootstrap(&mut conn).await.unwrap();

        assert!(table_exists(&mut conn, schema::LEDGER_TABLE).await.unwrap());
        assert!(table_exists(&mut conn, schema::QUARANTINE_TABLE).await.unwrap());
        assert!(column_exists(&mut conn, schema::ENUM_TYPES_TABLE, "labels")
            .await
            .unwrap());
        assert_eq!(count_rows(&mut conn, schema::LEDGER_TABLE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_backed_pool_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            path: dir
                .path()
                .join("nested/clinic.db")
                .to_string_lossy()
                .into_owned(),
            ..StorageConfig::default()
        };

        let pool = connect(&config).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        bootstrap(&mut conn).await.unwrap();
        assert!(dir.path().join("nested/clinic.db").exists());
    }
}
