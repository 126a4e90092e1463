//! Schema version ledger.
//!
//! A single-row pointer to the applied step plus an append-only history.
//! Both are only ever written inside the transaction of the step that moves
//! the pointer, so the pointer never disagrees with the schema.

use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqliteConnection};

use crate::storage::schema::{LedgerHistory, SchemaLedger};

use super::step::{Direction, MigrationStep, StepId, VersionToken};
use super::{MigrationError, Result};

/// One recorded apply or revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub seq: i64,
    pub step: StepId,
    pub direction: Direction,
    pub from: VersionToken,
    pub to: VersionToken,
    pub recorded_at: String,
}

/// Ledger operations over an open connection or transaction.
pub struct Ledger;

impl Ledger {
    /// Read the stored pointer.
    pub async fn current(conn: &mut SqliteConnection) -> Result<VersionToken> {
        let query = Query::select()
            .column(SchemaLedger::Version)
            .from(SchemaLedger::Table)
            .and_where(Expr::col(SchemaLedger::Id).eq(1))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
        let version: Option<String> = match row {
            Some(row) => row.get("version"),
            None => None,
        };
        Ok(VersionToken::from_db(version))
    }

    /// Verify that `step` may move in `direction` from the caller's token.
    ///
    /// Forward requires the pointer at the step's parent, backward at the
    /// step itself. The caller's token must agree with the stored pointer.
    pub async fn check(
        conn: &mut SqliteConnection,
        step: &MigrationStep,
        direction: Direction,
        caller: &VersionToken,
    ) -> Result<()> {
        let expected = match direction {
            Direction::Forward => step.parent_token(),
            Direction::Backward => step.token(),
        };
        let stored = Self::current(conn).await?;

        if stored != expected {
            return Err(MigrationError::OutOfOrder {
                step: step.id.clone(),
                expected,
                found: stored,
            });
        }
        if caller != &expected {
            return Err(MigrationError::OutOfOrder {
                step: step.id.clone(),
                expected,
                found: caller.clone(),
            });
        }
        Ok(())
    }

    /// Move the pointer across `step` and append a history entry.
    ///
    /// Compare-and-set on the stored pointer; returns the new token.
    pub async fn advance(
        conn: &mut SqliteConnection,
        step: &MigrationStep,
        direction: Direction,
    ) -> Result<VersionToken> {
        let (from, to) = match direction {
            Direction::Forward => (step.parent_token(), step.token()),
            Direction::Backward => (step.token(), step.parent_token()),
        };
        let now = chrono::Utc::now().to_rfc3339();

        let update = Query::update()
            .table(SchemaLedger::Table)
            .value(SchemaLedger::Version, to.as_db())
            .value(SchemaLedger::UpdatedAt, now.clone())
            .and_where(Expr::col(SchemaLedger::Id).eq(1))
            .and_where(Expr::col(SchemaLedger::Version).is(from.as_db()))
            .to_string(SqliteQueryBuilder);

        let updated = sqlx::query(&update).execute(&mut *conn).await?.rows_affected();
        if updated != 1 {
            let found = Self::current(conn).await?;
            return Err(MigrationError::OutOfOrder {
                step: step.id.clone(),
                expected: from,
                found,
            });
        }

        let insert = Query::insert()
            .into_table(LedgerHistory::Table)
            .columns([
                LedgerHistory::StepId,
                LedgerHistory::Direction,
                LedgerHistory::FromVersion,
                LedgerHistory::ToVersion,
                LedgerHistory::RecordedAt,
            ])
            .values_panic([
                step.id.as_str().into(),
                direction.as_str().into(),
                from.as_db().into(),
                to.as_db().into(),
                now.into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&insert).execute(&mut *conn).await?;

        Ok(to)
    }

    /// Full history, oldest first.
    pub async fn history(conn: &mut SqliteConnection) -> Result<Vec<LedgerEntry>> {
        let query = Query::select()
            .columns([
                LedgerHistory::Seq,
                LedgerHistory::StepId,
                LedgerHistory::Direction,
                LedgerHistory::FromVersion,
                LedgerHistory::ToVersion,
                LedgerHistory::RecordedAt,
            ])
            .from(LedgerHistory::Table)
            .order_by(LedgerHistory::Seq, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;
        rows.into_iter()
            .map(|row| {
                let direction: String = row.get("direction");
                let direction = Direction::parse(&direction).ok_or_else(|| {
                    MigrationError::Definition(format!("unknown ledger direction {direction}"))
                })?;
                Ok(LedgerEntry {
                    seq: row.get("seq"),
                    step: StepId::new(row.get::<String, _>("step_id")),
                    direction,
                    from: VersionToken::from_db(row.get("from_version")),
                    to: VersionToken::from_db(row.get("to_version")),
                    recorded_at: row.get("recorded_at"),
                })
            })
            .collect()
    }
}
