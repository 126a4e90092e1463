//! Derived appointment metrics.
//!
//! Visit counts, last-visit dates and appointment totals are stored on pets
//! and veterinarians but are always a function of the appointments table.
//! The same [`MetricDefinition`]s drive bulk recomputation, the consistency
//! check and the retraction path of incremental maintenance.
//!
//! Incremental maintenance is a projection: [`transition`] turns the before
//! and after facts of one appointment into [`MetricDelta`]s, and
//! [`MetricsMaintainer`] applies them on the caller's transaction.

mod consistency;
mod definitions;
mod maintainer;
mod transition;

use std::fmt;

pub use consistency::{
    check, quarantine, quarantined, release, repair, verify, QuarantineEntry, RepairReport,
};
pub use definitions::{
    definitions, recompute, Aggregate, MetricDefinition, Predicate, RecomputeMetrics,
};
pub use maintainer::MetricsMaintainer;
pub use transition::{transition, AppointmentFacts, MetricDelta};

/// Result type for metric operations.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Owner of derived metric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Pet,
    Veterinarian,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Pet, EntityKind::Veterinarian];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Pet => "pet",
            EntityKind::Veterinarian => "veterinarian",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pet" => Some(EntityKind::Pet),
            "veterinarian" => Some(EntityKind::Veterinarian),
            _ => None,
        }
    }

    /// Table holding the metric fields.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Pet => "pets",
            EntityKind::Veterinarian => "veterinarians",
        }
    }

    /// Primary key of [`Self::table`], also the appointments column pointing at it.
    pub fn key(&self) -> &'static str {
        match self {
            EntityKind::Pet => "pet_id",
            EntityKind::Veterinarian => "veterinarian_id",
        }
    }
}

/// One pet or veterinarian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn pet(id: i64) -> Self {
        Self {
            kind: EntityKind::Pet,
            id,
        }
    }

    pub fn veterinarian(id: i64) -> Self {
        Self {
            kind: EntityKind::Veterinarian,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// A stored metric that disagrees with its fresh aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDrift {
    pub entity: EntityRef,
    pub metric: String,
    pub stored: Option<String>,
    pub expected: Option<String>,
}

impl fmt::Display for MetricDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: stored {}, expected {}",
            self.entity,
            self.metric,
            self.stored.as_deref().unwrap_or("NULL"),
            self.expected.as_deref().unwrap_or("NULL")
        )
    }
}

fn describe_drifts(drifts: &[MetricDrift]) -> String {
    drifts
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from metric maintenance.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Derived metrics drifted: {}", describe_drifts(.drifts))]
    InvariantViolation { drifts: Vec<MetricDrift> },

    #[error("{0} is quarantined for metric drift; run repair first")]
    Quarantined(EntityRef),

    #[error("Metric field {0} does not exist; apply the metrics migration first")]
    MissingField(String),

    #[error("{0} does not exist; its metric delta has no owner")]
    MissingEntity(EntityRef),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests;
