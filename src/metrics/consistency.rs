//! Consistency check, quarantine and repair.

use std::collections::BTreeMap;

use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{error, info};

use crate::storage::{self, ident};
use crate::storage::schema::MetricQuarantine;

use super::definitions::{definitions, recompute};
use super::{EntityKind, EntityRef, MetricDrift, MetricsError, Result};

/// A quarantined entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    pub entity: EntityRef,
    pub detail: String,
    pub detected_at: String,
}

/// Outcome of [`repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepairReport {
    pub recomputed: u64,
    pub released: u64,
}

/// Fail unless every metric field exists. A quoted name of a missing column
/// reads as a string literal in SQLite.
async fn ensure_fields(conn: &mut SqliteConnection) -> Result<()> {
    for def in definitions() {
        if !storage::column_exists(conn, def.kind.table(), def.field).await? {
            return Err(MetricsError::MissingField(def.name()));
        }
    }
    Ok(())
}

/// Compare stored metric fields with fresh aggregates.
///
/// With a scope, only those entities are checked.
pub async fn check(
    conn: &mut SqliteConnection,
    scope: Option<&[EntityRef]>,
) -> Result<Vec<MetricDrift>> {
    ensure_fields(conn).await?;
    let mut drifts = Vec::new();

    for def in definitions() {
        let mut sql = format!(
            "SELECT {key} AS entity_id, CAST({field} AS TEXT) AS stored, \
             CAST({fresh} AS TEXT) AS expected FROM {table} WHERE {field} IS NOT {fresh}",
            key = ident(def.kind.key()),
            field = ident(def.field),
            fresh = def.fresh_sql(),
            table = ident(def.kind.table()),
        );

        if let Some(scope) = scope {
            let ids: Vec<String> = scope
                .iter()
                .filter(|e| e.kind == def.kind)
                .map(|e| e.id.to_string())
                .collect();
            if ids.is_empty() {
                continue;
            }
            sql.push_str(&format!(" AND {} IN ({})", ident(def.kind.key()), ids.join(", ")));
        }

        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        for row in rows {
            drifts.push(MetricDrift {
                entity: EntityRef {
                    kind: def.kind,
                    id: row.get("entity_id"),
                },
                metric: def.name(),
                stored: row.get("stored"),
                expected: row.get("expected"),
            });
        }
    }

    drifts.sort_by(|a, b| a.entity.cmp(&b.entity).then_with(|| a.metric.cmp(&b.metric)));
    Ok(drifts)
}

/// Record drifting entities in their own transaction.
pub async fn quarantine(pool: &SqlitePool, drifts: &[MetricDrift]) -> Result<()> {
    let mut by_entity: BTreeMap<EntityRef, Vec<String>> = BTreeMap::new();
    for drift in drifts {
        error!(entity = %drift.entity, metric = %drift.metric, "Metric invariant violated: {}", drift);
        by_entity
            .entry(drift.entity)
            .or_default()
            .push(drift.to_string());
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut tx = storage::begin_write(pool).await?;
    for (entity, details) in by_entity {
        let query = Query::insert()
            .into_table(MetricQuarantine::Table)
            .columns([
                MetricQuarantine::EntityKind,
                MetricQuarantine::EntityId,
                MetricQuarantine::Detail,
                MetricQuarantine::DetectedAt,
            ])
            .values_panic([
                entity.kind.as_str().into(),
                entity.id.into(),
                details.join("; ").into(),
                now.clone().into(),
            ])
            .on_conflict(
                OnConflict::columns([MetricQuarantine::EntityKind, MetricQuarantine::EntityId])
                    .update_columns([MetricQuarantine::Detail, MetricQuarantine::DetectedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

pub(crate) async fn is_quarantined(conn: &mut SqliteConnection, entity: &EntityRef) -> Result<bool> {
    let query = Query::select()
        .expr(Expr::col(MetricQuarantine::EntityId).count())
        .from(MetricQuarantine::Table)
        .and_where(Expr::col(MetricQuarantine::EntityKind).eq(entity.kind.as_str()))
        .and_where(Expr::col(MetricQuarantine::EntityId).eq(entity.id))
        .to_string(SqliteQueryBuilder);
    let count: i64 = sqlx::query_scalar(&query).fetch_one(&mut *conn).await?;
    Ok(count > 0)
}

/// All quarantined entities.
pub async fn quarantined(conn: &mut SqliteConnection) -> Result<Vec<QuarantineEntry>> {
    let query = Query::select()
        .columns([
            MetricQuarantine::EntityKind,
            MetricQuarantine::EntityId,
            MetricQuarantine::Detail,
            MetricQuarantine::DetectedAt,
        ])
        .from(MetricQuarantine::Table)
        .order_by(MetricQuarantine::EntityKind, Order::Asc)
        .order_by(MetricQuarantine::EntityId, Order::Asc)
        .to_string(SqliteQueryBuilder);

    let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let kind = EntityKind::parse(&row.get::<String, _>("entity_kind"))?;
            Some(QuarantineEntry {
                entity: EntityRef {
                    kind,
                    id: row.get("entity_id"),
                },
                detail: row.get("detail"),
                detected_at: row.get("detected_at"),
            })
        })
        .collect())
}

/// Remove one entity, or everything, from quarantine. Returns rows removed.
pub async fn release(conn: &mut SqliteConnection, entity: Option<&EntityRef>) -> Result<u64> {
    let mut query = Query::delete();
    query.from_table(MetricQuarantine::Table);
    if let Some(entity) = entity {
        query
            .and_where(Expr::col(MetricQuarantine::EntityKind).eq(entity.kind.as_str()))
            .and_where(Expr::col(MetricQuarantine::EntityId).eq(entity.id));
    }
    let result = sqlx::query(&query.to_string(SqliteQueryBuilder))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Full consistency check. Drift is quarantined and reported, never fixed.
pub async fn verify(pool: &SqlitePool) -> Result<()> {
    let drifts = {
        let mut conn = pool.acquire().await?;
        check(&mut conn, None).await?
    };
    if drifts.is_empty() {
        info!("Derived metrics consistent");
        return Ok(());
    }
    quarantine(pool, &drifts).await?;
    Err(MetricsError::InvariantViolation { drifts })
}

/// Recompute metrics from appointments and release quarantine, for one
/// entity or all of them.
pub async fn repair(pool: &SqlitePool, entity: Option<EntityRef>) -> Result<RepairReport> {
    let mut tx = storage::begin_write(pool).await?;
    ensure_fields(&mut tx).await?;
    let mut report = RepairReport::default();

    match entity {
        Some(entity) => {
            report.recomputed = recompute(&mut tx, entity.kind, Some(entity.id)).await?;
            report.released = release(&mut tx, Some(&entity)).await?;
        }
        None => {
            for kind in EntityKind::ALL {
                report.recomputed += recompute(&mut tx, kind, None).await?;
            }
            report.released = release(&mut tx, None).await?;
        }
    }

    tx.commit().await?;
    info!(
        recomputed = report.recomputed,
        released = report.released,
        "Repaired derived metrics"
    );
    Ok(report)
}
