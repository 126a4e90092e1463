//! Idempotent historical backfill.
//!
//! Inserts are guarded by an anti-join on the target key and updates by the
//! pre-backfill NULL sentinel, so running a backfill twice is the same as
//! running it once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sea_query::{Alias, Expr, Query, SelectStatement, SimpleExpr, SqliteQueryBuilder};
use sqlx::SqliteConnection;
use tracing::info;

use super::{MigrationError, Result};

/// Backfill computed in code rather than as a single statement.
///
/// Implementations must be deterministic and safe to re-run.
#[async_trait]
pub trait BackfillTask: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Run on the step's transaction; returns the number of rows written.
    async fn run(&self, conn: &mut SqliteConnection) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub enum BackfillKind {
    /// `INSERT INTO target (columns) <source> WHERE NOT EXISTS (target row keyed by source_key)`.
    ///
    /// `source` must select exactly `columns`, in order.
    InsertMissing {
        target: String,
        target_key: String,
        columns: Vec<String>,
        source: SelectStatement,
        source_key: SimpleExpr,
    },
    /// `UPDATE table SET column = value WHERE column IS NULL`.
    FillNull {
        table: String,
        column: String,
        value: SimpleExpr,
    },
    Task(Arc<dyn BackfillTask>),
}

/// A named backfill.
#[derive(Debug, Clone)]
pub struct Backfill {
    pub name: String,
    pub kind: BackfillKind,
}

impl Backfill {
    pub fn insert_missing(
        name: &str,
        target: &str,
        target_key: &str,
        columns: &[&str],
        source: SelectStatement,
        source_key: impl Into<SimpleExpr>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: BackfillKind::InsertMissing {
                target: target.to_string(),
                target_key: target_key.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                source,
                source_key: source_key.into(),
            },
        }
    }

    pub fn fill_null(name: &str, table: &str, column: &str, value: impl Into<SimpleExpr>) -> Self {
        Self {
            name: name.to_string(),
            kind: BackfillKind::FillNull {
                table: table.to_string(),
                column: column.to_string(),
                value: value.into(),
            },
        }
    }

    pub fn task(task: Arc<dyn BackfillTask>) -> Self {
        Self {
            name: task.name().to_string(),
            kind: BackfillKind::Task(task),
        }
    }

    /// Run the backfill; returns the number of rows written.
    pub async fn run(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let written = match &self.kind {
            BackfillKind::InsertMissing {
                target,
                target_key,
                columns,
                source,
                source_key,
            } => {
                let sql = self.insert_missing_sql(target, target_key, columns, source, source_key)?;
                self.execute(conn, &sql).await?
            }
            BackfillKind::FillNull {
                table,
                column,
                value,
            } => {
                let sql = Query::update()
                    .table(Alias::new(table))
                    .value(Alias::new(column), value.clone())
                    .and_where(Expr::col(Alias::new(column)).is_null())
                    .to_string(SqliteQueryBuilder);
                self.execute(conn, &sql).await?
            }
            BackfillKind::Task(task) => task.run(conn).await?,
        };

        info!(backfill = %self.name, rows = written, "Backfill complete");
        Ok(written)
    }

    fn insert_missing_sql(
        &self,
        target: &str,
        target_key: &str,
        columns: &[String],
        source: &SelectStatement,
        source_key: &SimpleExpr,
    ) -> Result<String> {
        let already_present = Query::select()
            .expr(Expr::val(1))
            .from(Alias::new(target))
            .and_where(
                Expr::col((Alias::new(target), Alias::new(target_key))).eq(source_key.clone()),
            )
            .to_owned();

        let mut select = source.clone();
        select.and_where(Expr::exists(already_present).not());

        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(target))
            .columns(columns.iter().map(Alias::new));
        insert
            .select_from(select)
            .map_err(|e| MigrationError::Backfill {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(insert.to_string(SqliteQueryBuilder))
    }

    async fn execute(&self, conn: &mut SqliteConnection, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::Backfill {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(result.rows_affected())
    }
}
