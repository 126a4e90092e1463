//! Enumerated types on SQLite.
//!
//! An enum is a catalog row holding its labels; enum-typed columns are TEXT
//! columns whose CHECK constraint is rendered from those labels. Column usage
//! is tracked so a reverted step can drop an enum only once nothing live uses it.

use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection};
use tracing::{info, warn};

use crate::storage::schema::{EnumTypes, EnumUsages};

use super::transform::EnumSpec;
use super::{MigrationError, Result};

/// Enum catalog operations.
pub struct EnumCatalog;

impl EnumCatalog {
    /// Define the enum unless it already exists. Returns whether it was created.
    pub async fn define(conn: &mut SqliteConnection, spec: &EnumSpec) -> Result<bool> {
        match Self::try_labels(conn, &spec.name).await? {
            Some(existing) => {
                if existing != spec.labels {
                    warn!(
                        enum_name = %spec.name,
                        ?existing,
                        requested = ?spec.labels,
                        "Enum already defined with different labels; keeping existing"
                    );
                }
                Ok(false)
            }
            None => {
                let labels = serde_json::to_string(&spec.labels)
                    .map_err(|e| MigrationError::Definition(e.to_string()))?;
                let query = Query::insert()
                    .into_table(EnumTypes::Table)
                    .columns([EnumTypes::Name, EnumTypes::Labels])
                    .values_panic([spec.name.as_str().into(), labels.into()])
                    .to_string(SqliteQueryBuilder);
                sqlx::query(&query).execute(&mut *conn).await?;
                info!(enum_name = %spec.name, "Created enum type");
                Ok(true)
            }
        }
    }

    /// Labels of a defined enum.
    pub async fn labels(conn: &mut SqliteConnection, name: &str) -> Result<Vec<String>> {
        Self::try_labels(conn, name)
            .await?
            .ok_or_else(|| MigrationError::UnknownEnum(name.to_string()))
    }

    async fn try_labels(conn: &mut SqliteConnection, name: &str) -> Result<Option<Vec<String>>> {
        let query = Query::select()
            .column(EnumTypes::Labels)
            .from(EnumTypes::Table)
            .and_where(Expr::col(EnumTypes::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        match row {
            Some(row) => {
                let raw: String = row.get("labels");
                let labels = serde_json::from_str(&raw)
                    .map_err(|e| MigrationError::Definition(format!("enum {name}: {e}")))?;
                Ok(Some(labels))
            }
            None => Ok(None),
        }
    }

    /// Record that `table.column` is typed by `enum_name`.
    pub async fn register_usage(
        conn: &mut SqliteConnection,
        table: &str,
        column: &str,
        enum_name: &str,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(EnumUsages::Table)
            .columns([EnumUsages::TableName, EnumUsages::ColumnName, EnumUsages::EnumName])
            .values_panic([table.into(), column.into(), enum_name.into()])
            .on_conflict(
                OnConflict::columns([EnumUsages::TableName, EnumUsages::ColumnName])
                    .update_column(EnumUsages::EnumName)
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    /// Forget usages of one column, or of every column of `table` when `column` is None.
    pub async fn release_usage(
        conn: &mut SqliteConnection,
        table: &str,
        column: Option<&str>,
    ) -> Result<()> {
        let mut query = Query::delete();
        query
            .from_table(EnumUsages::Table)
            .and_where(Expr::col(EnumUsages::TableName).eq(table));
        if let Some(column) = column {
            query.and_where(Expr::col(EnumUsages::ColumnName).eq(column));
        }
        sqlx::query(&query.to_string(SqliteQueryBuilder))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Drop the enum if no live column uses it. Returns whether it was dropped.
    pub async fn drop_if_unreferenced(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
        let usages = Query::select()
            .expr(Expr::col(EnumUsages::ColumnName).count())
            .from(EnumUsages::Table)
            .and_where(Expr::col(EnumUsages::EnumName).eq(name))
            .to_string(SqliteQueryBuilder);
        let count: i64 = sqlx::query_scalar(&usages).fetch_one(&mut *conn).await?;
        if count > 0 {
            info!(enum_name = %name, usages = count, "Enum still referenced; keeping");
            return Ok(false);
        }

        let query = Query::delete()
            .from_table(EnumTypes::Table)
            .and_where(Expr::col(EnumTypes::Name).eq(name))
            .to_string(SqliteQueryBuilder);
        let dropped = sqlx::query(&query).execute(&mut *conn).await?.rows_affected() > 0;
        if dropped {
            info!(enum_name = %name, "Dropped enum type");
        }
        Ok(dropped)
    }
}
