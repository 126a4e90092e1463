//! Backup containers for data a reversal would otherwise destroy.
//!
//! Whole tables are preserved by rename, column sets by a key-plus-columns
//! snapshot. Containers are named from the step id and table name, and are
//! consumed by the next forward application of the same step.

use sea_query::{Alias, Expr, Query, SqliteQueryBuilder, Table};
use sqlx::SqliteConnection;
use tracing::warn;

use crate::storage::{self, ident};

use super::enums::EnumCatalog;
use super::step::StepId;
use super::transform::ColumnGroup;
use super::{MigrationError, Result};

/// Deterministic backup container name for `table` under `step`.
pub fn backup_name(step: &StepId, table: &str) -> String {
    format!("backup_{}_{}", step, table)
}

/// Outcome of merging a column backup onto live rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup: String,
    pub backup_rows: u64,
    pub restored: u64,
    /// Backup rows whose key no longer exists live.
    pub skipped: u64,
}

async fn ensure_absent(conn: &mut SqliteConnection, backup: &str) -> Result<()> {
    if storage::table_exists(conn, backup).await? {
        return Err(MigrationError::BackupCollision(backup.to_string()));
    }
    Ok(())
}

/// Rename the live table into its backup container.
pub(crate) async fn preserve_table(
    conn: &mut SqliteConnection,
    step: &StepId,
    table: &str,
) -> Result<String> {
    let backup = backup_name(step, table);
    ensure_absent(conn, &backup).await?;

    let stmt = Table::rename()
        .table(Alias::new(table), Alias::new(&backup))
        .to_string(SqliteQueryBuilder);
    sqlx::query(&stmt).execute(&mut *conn).await?;
    Ok(backup)
}

/// Rename the backup container back into place. Returns false when there is none.
pub(crate) async fn restore_table(
    conn: &mut SqliteConnection,
    step: &StepId,
    table: &str,
) -> Result<bool> {
    let backup = backup_name(step, table);
    if !storage::table_exists(conn, &backup).await? {
        return Ok(false);
    }

    let stmt = Table::rename()
        .table(Alias::new(&backup), Alias::new(table))
        .to_string(SqliteQueryBuilder);
    sqlx::query(&stmt).execute(&mut *conn).await?;
    Ok(true)
}

/// Snapshot key and columns of `group` into its backup container.
///
/// Enum columns are stored as plain TEXT. Returns the snapshot row count.
pub(crate) async fn preserve_columns(
    conn: &mut SqliteConnection,
    step: &StepId,
    group: &ColumnGroup,
) -> Result<u64> {
    let backup = backup_name(step, &group.table);
    ensure_absent(conn, &backup).await?;

    let mut projection = vec![ident(&group.key)];
    for column in &group.columns {
        let name = ident(&column.name);
        if column.enum_name().is_some() {
            projection.push(format!("CAST({name} AS TEXT) AS {name}"));
        } else {
            projection.push(name);
        }
    }

    let sql = format!(
        "CREATE TABLE {} AS SELECT {} FROM {}",
        ident(&backup),
        projection.join(", "),
        ident(&group.table)
    );
    sqlx::query(&sql).execute(&mut *conn).await?;

    Ok(storage::count_rows(conn, &backup).await? as u64)
}

/// Merge the backup container of `group` onto live rows by key, then drop it.
///
/// Returns None when there is no backup (first-ever apply). Backup rows
/// whose key is gone are skipped and counted.
pub(crate) async fn restore_columns(
    conn: &mut SqliteConnection,
    step: &StepId,
    group: &ColumnGroup,
) -> Result<Option<RestoreReport>> {
    let backup = backup_name(step, &group.table);
    if !storage::table_exists(conn, &backup).await? {
        return Ok(None);
    }

    for column in &group.columns {
        if let Some(enum_name) = column.enum_name() {
            check_enum_values(conn, &backup, &group.table, &column.name, enum_name).await?;
        }
    }

    let backup_rows = storage::count_rows(conn, &backup).await? as u64;

    let assignments: Vec<String> = group
        .columns
        .iter()
        .map(|c| format!("{0} = b.{0}", ident(&c.name)))
        .collect();
    let sql = format!(
        "UPDATE {live} SET {sets} FROM {backup} AS b WHERE {live}.{key} = b.{key}",
        live = ident(&group.table),
        sets = assignments.join(", "),
        backup = ident(&backup),
        key = ident(&group.key),
    );
    let restored = sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();

    let drop = Table::drop()
        .table(Alias::new(&backup))
        .to_string(SqliteQueryBuilder);
    sqlx::query(&drop).execute(&mut *conn).await?;

    let skipped = backup_rows.saturating_sub(restored);
    if skipped > 0 {
        warn!(
            step = %step,
            table = %group.table,
            backup = %backup,
            skipped,
            "Restore skipped backup rows whose key no longer exists"
        );
    }

    Ok(Some(RestoreReport {
        backup,
        backup_rows,
        restored,
        skipped,
    }))
}

async fn check_enum_values(
    conn: &mut SqliteConnection,
    backup: &str,
    table: &str,
    column: &str,
    enum_name: &str,
) -> Result<()> {
    let labels = EnumCatalog::labels(conn, enum_name).await?;
    let query = Query::select()
        .column(Alias::new(column))
        .from(Alias::new(backup))
        .and_where(Expr::col(Alias::new(column)).is_not_null())
        .and_where(Expr::col(Alias::new(column)).is_not_in(labels))
        .limit(1)
        .to_string(SqliteQueryBuilder);

    let stranger: Option<String> = sqlx::query_scalar(&query)
        .fetch_optional(&mut *conn)
        .await?;
    match stranger {
        Some(value) => Err(MigrationError::EnumCast {
            table: table.to_string(),
            column: column.to_string(),
            enum_name: enum_name.to_string(),
            value,
        }),
        None => Ok(()),
    }
}
