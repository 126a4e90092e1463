//! Step identity, direction and the explicit version token.

use std::fmt;

use sqlx::SqliteConnection;
use tracing::debug;

use super::transform::Transform;
use super::Result;

/// Opaque, globally unique step identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Apply or revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "upgrade",
            Direction::Backward => "downgrade",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upgrade" => Some(Direction::Forward),
            "downgrade" => Some(Direction::Backward),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ledger pointer as an explicit value.
///
/// Callers hold the token they last observed and hand it to every
/// apply/revert; nothing reads an ambient "current schema" global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionToken(Option<StepId>);

impl VersionToken {
    /// Before the first step.
    pub fn base() -> Self {
        Self(None)
    }

    pub fn at(step: StepId) -> Self {
        Self(Some(step))
    }

    pub fn step(&self) -> Option<&StepId> {
        self.0.as_ref()
    }

    pub fn is_base(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn as_db(&self) -> Option<String> {
        self.0.as_ref().map(|s| s.as_str().to_string())
    }

    pub(crate) fn from_db(value: Option<String>) -> Self {
        Self(value.map(StepId::new))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(step) => write!(f, "{}", step),
            None => f.write_str("base"),
        }
    }
}

/// One forward/backward transformation unit.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    pub id: StepId,
    pub parent: Option<StepId>,
    pub description: String,
    pub transforms: Vec<Transform>,
}

impl MigrationStep {
    pub fn new(id: &str, parent: Option<&str>, description: &str) -> Self {
        Self {
            id: StepId::new(id),
            parent: parent.map(StepId::new),
            description: description.to_string(),
            transforms: Vec::new(),
        }
    }

    /// Append a transform (builder style).
    pub fn with(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Token the ledger holds once this step is applied.
    pub fn token(&self) -> VersionToken {
        VersionToken::at(self.id.clone())
    }

    /// Token the ledger holds before this step is applied.
    pub fn parent_token(&self) -> VersionToken {
        VersionToken(self.parent.clone())
    }

    /// Run every transform forward, in declaration order.
    pub async fn forward(&self, conn: &mut SqliteConnection) -> Result<()> {
        for transform in &self.transforms {
            debug!(step = %self.id, transform = %transform.describe(), "forward");
            transform.forward(conn, &self.id).await?;
        }
        Ok(())
    }

    /// Run every transform backward, in reverse declaration order.
    pub async fn backward(&self, conn: &mut SqliteConnection) -> Result<()> {
        for transform in self.transforms.iter().rev() {
            debug!(step = %self.id, transform = %transform.describe(), "backward");
            transform.backward(conn, &self.id).await?;
        }
        Ok(())
    }
}
