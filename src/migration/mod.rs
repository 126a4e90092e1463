//! Reversible migration engine.
//!
//! A migration step is a declarative list of [`Transform`]s with a stable id
//! and a parent. Applying a step runs the transforms forward; reverting runs
//! them backward in reverse order, each through its inverse:
//!
//! ```text
//! CreateTable   forward: rename backup_<step>_<t> back, else create
//!               backward: rename live table to backup_<step>_<t>
//! AddColumns    forward: add columns, merge backup_<step>_<t> by key
//!               backward: snapshot key+columns (enum -> TEXT), drop columns
//! CreateEnum    forward: define if absent / backward: drop if unused
//! CreateIndex   forward: create / backward: drop
//! Backfill      forward: idempotent backfill / backward: nothing
//! ```
//!
//! Each step runs inside one transaction together with the ledger update,
//! so a failure leaves schema, data and ledger exactly as they were.

mod backfill;
mod backup;
mod catalog;
mod enums;
mod ledger;
mod runner;
mod step;
mod transform;

pub use backfill::{Backfill, BackfillKind, BackfillTask};
pub use backup::{backup_name, RestoreReport};
pub use catalog::MigrationCatalog;
pub use enums::EnumCatalog;
pub use ledger::{Ledger, LedgerEntry};
pub use runner::Migrator;
pub use step::{Direction, MigrationStep, StepId, VersionToken};
pub use transform::{
    ColumnDefault, ColumnGroup, ColumnSpec, ColumnType, EnumSpec, ForeignKeySpec, IndexSpec,
    OnDelete, TableSpec, Transform,
};

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors that can occur while applying or reverting steps.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Step {step} applied out of order: ledger must be at {expected}, found {found}")]
    OutOfOrder {
        step: StepId,
        expected: VersionToken,
        found: VersionToken,
    },

    #[error("Unknown migration step: {0}")]
    UnknownStep(String),

    #[error("Invalid migration catalog: {0}")]
    InvalidCatalog(String),

    #[error("No migration path from {from} to {to}")]
    NoPath { from: VersionToken, to: VersionToken },

    #[error("Catalog has multiple heads: {}", .0.join(", "))]
    MultipleHeads(Vec<String>),

    #[error("Backup container {0} already exists")]
    BackupCollision(String),

    #[error("Enum type {0} is not defined")]
    UnknownEnum(String),

    #[error("Value {value:?} in {table}.{column} is not a member of enum {enum_name}")]
    EnumCast {
        table: String,
        column: String,
        enum_name: String,
        value: String,
    },

    #[error("Backfill {name} failed: {reason}")]
    Backfill { name: String, reason: String },

    #[error("Invalid transformation: {0}")]
    Definition(String),

    #[error("Step {step} failed during {direction}: {source}")]
    StepFailed {
        step: StepId,
        direction: Direction,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MigrationError {
    /// Id of the failing step, when the error is tied to one.
    pub fn step(&self) -> Option<&StepId> {
        match self {
            MigrationError::OutOfOrder { step, .. } | MigrationError::StepFailed { step, .. } => {
                Some(step)
            }
            _ => None,
        }
    }
}
