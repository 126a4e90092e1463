//! Incremental maintenance on the caller's transaction.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use sea_query::{Alias, Expr, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::SqliteConnection;
use tracing::{debug, error, warn};

use crate::storage::ident;

use super::consistency::{check, is_quarantined};
use super::definitions::definition;
use super::transition::MetricDelta;
use super::{EntityKind, EntityRef, MetricDrift, MetricsError, Result};

/// Applies [`MetricDelta`]s alongside the appointment mutation that caused them.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMaintainer {
    verify_after_mutation: bool,
}

impl MetricsMaintainer {
    pub fn new(verify_after_mutation: bool) -> Self {
        Self {
            verify_after_mutation,
        }
    }

    /// Apply deltas after the appointment row has been written.
    ///
    /// Refuses quarantined entities. A count that would go negative means the
    /// stored value had already drifted and is reported, not clamped.
    pub async fn apply(&self, conn: &mut SqliteConnection, deltas: &[MetricDelta]) -> Result<()> {
        let touched: BTreeSet<EntityRef> = deltas.iter().map(|d| d.entity()).collect();
        for entity in &touched {
            if is_quarantined(conn, entity).await? {
                return Err(MetricsError::Quarantined(*entity));
            }
        }

        for delta in deltas {
            debug!(?delta, "Applying metric delta");
            match *delta {
                MetricDelta::TotalAppointments {
                    veterinarian_id,
                    delta,
                } => {
                    adjust_count(
                        conn,
                        EntityRef::veterinarian(veterinarian_id),
                        "total_appointments",
                        delta,
                    )
                    .await?
                }
                MetricDelta::VisitCount { pet_id, delta } => {
                    adjust_count(conn, EntityRef::pet(pet_id), "visit_count", delta).await?
                }
                MetricDelta::LastVisitRetracted { pet_id, date } => {
                    retract_last_visit(conn, pet_id, date).await?
                }
                MetricDelta::LastVisitObserved { pet_id, date } => {
                    observe_last_visit(conn, pet_id, date).await?
                }
            }
        }

        if self.verify_after_mutation && !touched.is_empty() {
            let scope: Vec<EntityRef> = touched.into_iter().collect();
            let drifts = check(conn, Some(&scope)).await?;
            if !drifts.is_empty() {
                return Err(MetricsError::InvariantViolation { drifts });
            }
        }
        Ok(())
    }
}

/// One guarded `UPDATE f = f + delta`. When no row changes, the owner is
/// either missing or the count would go negative; both are reported.
async fn adjust_count(
    conn: &mut SqliteConnection,
    entity: EntityRef,
    field: &'static str,
    delta: i64,
) -> Result<()> {
    let table = Alias::new(entity.kind.table());
    let key = Alias::new(entity.kind.key());
    let column = Alias::new(field);

    let (sql, values) = Query::update()
        .table(table.clone())
        .value(column.clone(), Expr::col(column.clone()).add(delta))
        .and_where(Expr::col(key.clone()).eq(entity.id))
        .and_where(Expr::expr(Expr::col(column.clone()).add(delta)).gte(0))
        .build_sqlx(SqliteQueryBuilder);
    let updated = sqlx::query_with(&sql, values)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if updated > 0 {
        return Ok(());
    }

    let (sql, values) = Query::select()
        .column(column)
        .from(table)
        .and_where(Expr::col(key).eq(entity.id))
        .build_sqlx(SqliteQueryBuilder);
    let Some(current) = sqlx::query_scalar_with::<_, i64, _>(&sql, values)
        .fetch_optional(&mut *conn)
        .await?
    else {
        warn!(%entity, field, delta, "Metric delta for a missing entity");
        return Err(MetricsError::MissingEntity(entity));
    };

    let expected = fresh_value(conn, entity, field).await?;
    let drift = MetricDrift {
        entity,
        metric: format!("{}.{}", entity.kind.table(), field),
        stored: Some(current.to_string()),
        expected,
    };
    error!(%entity, field, current, delta, "Metric count would go negative");
    Err(MetricsError::InvariantViolation {
        drifts: vec![drift],
    })
}

async fn observe_last_visit(conn: &mut SqliteConnection, pet_id: i64, date: NaiveDate) -> Result<()> {
    sqlx::query(
        "UPDATE pets SET last_visit_date = ?1 \
         WHERE pet_id = ?2 AND (last_visit_date IS NULL OR last_visit_date < ?1)",
    )
    .bind(date)
    .bind(pet_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Only a retraction of the current maximum changes the field; the new value
/// is the maximum over the remaining completed visits.
async fn retract_last_visit(conn: &mut SqliteConnection, pet_id: i64, date: NaiveDate) -> Result<()> {
    let Some(def) = definition(EntityKind::Pet, "last_visit_date") else {
        return Ok(());
    };
    let sql = format!(
        "UPDATE pets SET last_visit_date = {} WHERE pet_id = ?1 AND last_visit_date = ?2",
        def.fresh_sql()
    );
    sqlx::query(&sql)
        .bind(pet_id)
        .bind(date)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fresh_value(
    conn: &mut SqliteConnection,
    entity: EntityRef,
    field: &str,
) -> Result<Option<String>> {
    let Some(def) = definition(entity.kind, field) else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT CAST({} AS TEXT) FROM {} WHERE {} = ?1",
        def.fresh_sql(),
        ident(entity.kind.table()),
        ident(entity.kind.key())
    );
    let value: Option<Option<String>> = sqlx::query_scalar(&sql)
        .bind(entity.id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value.flatten())
}
