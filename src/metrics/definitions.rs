//! Metric definitions and bulk recomputation.

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::info;

use crate::migration::{self, BackfillTask, MigrationError};
use crate::storage::ident;

use super::{consistency, EntityKind, Result};

/// How appointments are folded into the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of matching appointments; 0 when none.
    Count,
    /// Latest calendar date of matching appointments; NULL when none.
    LatestDate,
}

/// Which appointments contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Completed,
    Any,
}

/// A stored field defined as an aggregate over appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    pub kind: EntityKind,
    pub field: &'static str,
    pub aggregate: Aggregate,
    pub predicate: Predicate,
}

const DEFINITIONS: [MetricDefinition; 3] = [
    MetricDefinition {
        kind: EntityKind::Pet,
        field: "visit_count",
        aggregate: Aggregate::Count,
        predicate: Predicate::Completed,
    },
    MetricDefinition {
        kind: EntityKind::Pet,
        field: "last_visit_date",
        aggregate: Aggregate::LatestDate,
        predicate: Predicate::Completed,
    },
    MetricDefinition {
        kind: EntityKind::Veterinarian,
        field: "total_appointments",
        aggregate: Aggregate::Count,
        predicate: Predicate::Any,
    },
];

/// Every maintained metric.
pub fn definitions() -> &'static [MetricDefinition] {
    &DEFINITIONS
}

pub(crate) fn definitions_for(kind: EntityKind) -> impl Iterator<Item = &'static MetricDefinition> {
    DEFINITIONS.iter().filter(move |d| d.kind == kind)
}

pub(crate) fn definition(kind: EntityKind, field: &str) -> Option<&'static MetricDefinition> {
    definitions_for(kind).find(|d| d.field == field)
}

impl MetricDefinition {
    /// `table.field`, for logs and drift reports.
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind.table(), self.field)
    }

    /// Correlated subquery computing the field fresh for the current row of
    /// the owning table.
    pub fn fresh_sql(&self) -> String {
        let table = ident(self.kind.table());
        let key = ident(self.kind.key());
        let aggregate = match self.aggregate {
            Aggregate::Count => "COUNT(*)",
            Aggregate::LatestDate => "MAX(date(a.appointment_date))",
        };
        let filter = match self.predicate {
            Predicate::Completed => " AND a.status = 'completed'",
            Predicate::Any => "",
        };
        format!(
            "(SELECT {aggregate} FROM appointments AS a WHERE a.{key} = {table}.{key}{filter})"
        )
    }
}

/// Overwrite every metric field of `kind` with its fresh aggregate, for one
/// entity or all of them. Returns the number of rows updated.
pub async fn recompute(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: Option<i64>,
) -> Result<u64> {
    let sets: Vec<String> = definitions_for(kind)
        .map(|d| format!("{} = {}", ident(d.field), d.fresh_sql()))
        .collect();

    let mut sql = format!("UPDATE {} SET {}", ident(kind.table()), sets.join(", "));
    if id.is_some() {
        sql.push_str(&format!(" WHERE {} = ?1", ident(kind.key())));
    }

    let mut query = sqlx::query(&sql);
    if let Some(id) = id {
        query = query.bind(id);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// Bulk recomputation run as a migration backfill.
///
/// Overwrites unconditionally, so re-running is harmless, and releases any
/// quarantine since every entity now matches its aggregate.
#[derive(Debug, Default)]
pub struct RecomputeMetrics;

impl RecomputeMetrics {
    async fn recompute_all(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let mut rows = 0;
        for kind in EntityKind::ALL {
            rows += recompute(conn, kind, None).await?;
        }
        let released = consistency::release(conn, None).await?;
        if released > 0 {
            info!(released, "Released quarantined entities after recomputation");
        }
        Ok(rows)
    }
}

#[async_trait]
impl BackfillTask for RecomputeMetrics {
    fn name(&self) -> &str {
        "recompute derived metrics"
    }

    async fn run(&self, conn: &mut SqliteConnection) -> migration::Result<u64> {
        self.recompute_all(conn)
            .await
            .map_err(|e| MigrationError::Backfill {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}
