//! Serving-layer configuration types.

use serde::Deserialize;

/// Derived-metric maintenance configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Re-check touched entities against fresh aggregates before each
    /// lifecycle operation commits. Drift aborts the operation and
    /// quarantines the entity.
    pub verify_after_mutation: bool,
}

/// Report windows and limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Days ahead of today that a pending vaccination dose raises an alert.
    pub vaccination_alert_days: u32,
    /// Default number of veterinarians in the most-active ranking.
    pub popular_veterinarians_limit: u32,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            vaccination_alert_days: 30,
            popular_veterinarians_limit: 10,
        }
    }
}
