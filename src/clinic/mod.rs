//! Clinic serving layer.
//!
//! `ClinicService` owns the record-lifecycle operations the derived metrics
//! depend on. Every appointment mutation and its metric deltas commit in
//! one transaction, so a caller never observes a metric that disagrees with
//! the appointments it summarizes.
//!
//! Operations are gated on the applied schema: a feature whose migration
//! step is not applied fails with [`ClinicError::FeatureUnavailable`].

mod appointments;
mod billing;
mod directory;
pub mod models;
mod records;
mod reports;
pub mod revisions;
mod seed;

pub use models::*;
pub use seed::{seed, SeedPlan, SeedSummary};

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::config::{Config, ReportsConfig};
use crate::metrics::{self, transition, MetricsError, MetricsMaintainer};
use crate::migration::{Ledger, MigrationCatalog, MigrationError, StepId, VersionToken};
use crate::storage;

/// Result type for clinic operations.
pub type Result<T> = std::result::Result<T, ClinicError>;

/// Errors returned by clinic operations.
#[derive(Debug, thiserror::Error)]
pub enum ClinicError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Invoice {0} is already paid")]
    AlreadyPaid(i64),

    #[error("{feature} requires migration step {step}")]
    FeatureUnavailable {
        feature: &'static str,
        step: &'static str,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ClinicError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        ClinicError::NotFound { entity, id }
    }

    /// Map key violations to `Conflict`, leaving other errors as they are.
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return ClinicError::Conflict(format!("{what} already exists"));
            }
            if db.is_foreign_key_violation() {
                return ClinicError::Conflict(format!("{what} is still referenced"));
            }
        }
        ClinicError::Database(err)
    }
}

/// Features enabled by the applied migration steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub medical_records: bool,
    pub vaccinations: bool,
    pub profiles: bool,
    pub invoices: bool,
    pub metrics: bool,
}

impl Features {
    pub fn at(catalog: &MigrationCatalog, token: &VersionToken) -> Self {
        let applied = |id: &str| catalog.is_applied(token, &StepId::new(id));
        Self {
            medical_records: applied(revisions::MEDICAL_RECORDS),
            vaccinations: applied(revisions::VACCINATIONS),
            profiles: applied(revisions::PROFILES),
            invoices: applied(revisions::INVOICES),
            metrics: applied(revisions::METRICS),
        }
    }
}

/// Clinic operations over one database.
pub struct ClinicService {
    pool: SqlitePool,
    version: VersionToken,
    features: Features,
    maintainer: MetricsMaintainer,
    reports: ReportsConfig,
}

impl ClinicService {
    /// Attach to a migrated database.
    ///
    /// Features are fixed from the ledger at open time; reopen after
    /// migrating.
    pub async fn open(pool: SqlitePool, config: &Config) -> Result<Self> {
        let catalog = revisions::catalog()?;
        let version = {
            let mut conn = pool.acquire().await?;
            storage::bootstrap(&mut conn).await?;
            Ledger::current(&mut conn).await?
        };

        if !catalog.is_applied(&version, &StepId::new(revisions::BASE_SCHEMA)) {
            return Err(ClinicError::FeatureUnavailable {
                feature: "clinic records",
                step: revisions::BASE_SCHEMA,
            });
        }

        let features = Features::at(&catalog, &version);
        info!(%version, ?features, "Opened clinic service");

        Ok(Self {
            pool,
            version,
            features,
            maintainer: MetricsMaintainer::new(config.metrics.verify_after_mutation),
            reports: config.reports.clone(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn version(&self) -> &VersionToken {
        &self.version
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub(crate) fn require(&self, enabled: bool, feature: &'static str, step: &'static str) -> Result<()> {
        if enabled {
            Ok(())
        } else {
            Err(ClinicError::FeatureUnavailable { feature, step })
        }
    }

    /// Apply the metric deltas of one appointment change and commit.
    ///
    /// On any metric failure the whole operation rolls back; drift is then
    /// quarantined in a transaction of its own.
    pub(crate) async fn commit_with_metrics(
        &self,
        mut tx: Transaction<'_, Sqlite>,
        old: Option<&Appointment>,
        new: Option<&Appointment>,
    ) -> Result<()> {
        if self.features.metrics {
            let old = old.map(Appointment::facts);
            let new = new.map(Appointment::facts);
            let deltas = transition(old.as_ref(), new.as_ref());

            if let Err(err) = self.maintainer.apply(&mut tx, &deltas).await {
                tx.rollback().await?;
                if let MetricsError::InvariantViolation { drifts } = &err {
                    metrics::quarantine(&self.pool, drifts).await?;
                }
                return Err(err.into());
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
impl ClinicService {
    /// Fresh in-memory store migrated to `target` (head when None).
    pub(crate) async fn for_test(target: Option<&str>, config: &Config) -> Self {
        use crate::migration::Migrator;

        let pool = storage::connect_in_memory().await.unwrap();
        let migrator = Migrator::new(pool.clone(), revisions::catalog().unwrap())
            .await
            .unwrap();
        let target = target.map(|id| VersionToken::at(StepId::new(id)));
        migrator.upgrade(target.as_ref()).await.unwrap();
        Self::open(pool, config).await.unwrap()
    }

    /// One owner with one pet, and one veterinarian; `tag` keeps emails unique.
    pub(crate) async fn sample_pet_and_vet(&self, tag: &str) -> (Pet, Veterinarian) {
        let owner = self
            .create_owner(NewOwner {
                first_name: "Sam".into(),
                last_name: "Rivera".into(),
                email: format!("owner-{tag}@example.com"),
                ..NewOwner::default()
            })
            .await
            .unwrap();
        let pet = self
            .create_pet(NewPet {
                name: format!("Pet {tag}"),
                species: "Dog".into(),
                owner_id: owner.owner_id,
                ..NewPet::default()
            })
            .await
            .unwrap();
        let vet = self
            .create_veterinarian(NewVeterinarian {
                license_number: format!("LIC-{tag}"),
                first_name: "Alex".into(),
                last_name: "Moreau".into(),
                email: format!("vet-{tag}@example.com"),
                ..NewVeterinarian::default()
            })
            .await
            .unwrap();
        (pet, vet)
    }
}
