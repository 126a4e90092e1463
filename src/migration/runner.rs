//! Step runner: one step, one transaction.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::storage;

use super::catalog::MigrationCatalog;
use super::ledger::{Ledger, LedgerEntry};
use super::step::{Direction, StepId, VersionToken};
use super::{MigrationError, Result};

/// Applies and reverts catalog steps against one database.
#[derive(Clone)]
pub struct Migrator {
    pool: SqlitePool,
    catalog: Arc<MigrationCatalog>,
}

impl Migrator {
    /// Attach to a database, creating the bookkeeping tables on first use.
    pub async fn new(pool: SqlitePool, catalog: MigrationCatalog) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        storage::bootstrap(&mut conn).await?;
        drop(conn);

        Ok(Self {
            pool,
            catalog: Arc::new(catalog),
        })
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The stored ledger pointer.
    pub async fn current(&self) -> Result<VersionToken> {
        let mut conn = self.pool.acquire().await?;
        Ledger::current(&mut conn).await
    }

    /// Apply one step. `token` must equal the step's parent.
    pub async fn apply(&self, step: &StepId, token: &VersionToken) -> Result<VersionToken> {
        self.run(step, Direction::Forward, token).await
    }

    /// Revert one step. `token` must equal the step itself.
    pub async fn revert(&self, step: &StepId, token: &VersionToken) -> Result<VersionToken> {
        self.run(step, Direction::Backward, token).await
    }

    /// Apply every step between the current pointer and `target` (default: head).
    pub async fn upgrade(&self, target: Option<&VersionToken>) -> Result<VersionToken> {
        let target = match target {
            Some(target) => target.clone(),
            None => self.catalog.head()?,
        };
        let mut token = self.current().await?;
        let path: Vec<StepId> = self
            .catalog
            .upgrade_path(&token, &target)?
            .into_iter()
            .map(|s| s.id.clone())
            .collect();

        if path.is_empty() {
            info!(version = %token, "Already at target");
        }
        for id in &path {
            token = self.apply(id, &token).await?;
        }
        Ok(token)
    }

    /// Revert every step between the current pointer and the ancestor `target`.
    pub async fn downgrade(&self, target: &VersionToken) -> Result<VersionToken> {
        let mut token = self.current().await?;
        let path: Vec<StepId> = self
            .catalog
            .downgrade_path(&token, target)?
            .into_iter()
            .map(|s| s.id.clone())
            .collect();

        if path.is_empty() {
            info!(version = %token, "Already at target");
        }
        for id in &path {
            token = self.revert(id, &token).await?;
        }
        Ok(token)
    }

    pub async fn history(&self) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        Ledger::history(&mut conn).await
    }

    async fn run(
        &self,
        id: &StepId,
        direction: Direction,
        token: &VersionToken,
    ) -> Result<VersionToken> {
        let step = self.catalog.get(id)?;
        let mut tx = storage::begin_write(&self.pool).await?;

        Ledger::check(&mut tx, step, direction, token).await?;
        info!(step = %step.id, %direction, "{}", step.description);

        let outcome = match direction {
            Direction::Forward => step.forward(&mut tx).await,
            Direction::Backward => step.backward(&mut tx).await,
        };
        if let Err(e) = outcome {
            tx.rollback().await?;
            error!(step = %step.id, %direction, error = %e, "Step failed; rolled back");
            return Err(MigrationError::StepFailed {
                step: step.id.clone(),
                direction,
                source: Box::new(e),
            });
        }

        let next = Ledger::advance(&mut tx, step, direction).await?;
        tx.commit().await?;

        info!(step = %step.id, %direction, version = %next, "Step committed");
        Ok(next)
    }
}
