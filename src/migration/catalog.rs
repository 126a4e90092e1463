//! The fixed, validated set of known steps and path planning over it.

use std::collections::{HashMap, HashSet};

use super::step::{MigrationStep, StepId, VersionToken};
use super::{MigrationError, Result};

/// All known steps, validated to form a rooted, acyclic parent graph.
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    steps: Vec<MigrationStep>,
    index: HashMap<StepId, usize>,
}

impl MigrationCatalog {
    /// Validate and index the steps.
    ///
    /// Rejects duplicate ids, unknown parents, more than one root and cycles.
    pub fn new(steps: Vec<MigrationStep>) -> Result<Self> {
        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(MigrationError::InvalidCatalog(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
        }

        let roots: Vec<&StepId> = steps
            .iter()
            .filter(|s| s.parent.is_none())
            .map(|s| &s.id)
            .collect();
        if !steps.is_empty() && roots.len() != 1 {
            return Err(MigrationError::InvalidCatalog(format!(
                "expected exactly one root step, found {}",
                roots.len()
            )));
        }

        for step in &steps {
            if let Some(parent) = &step.parent {
                if !index.contains_key(parent) {
                    return Err(MigrationError::InvalidCatalog(format!(
                        "step {} has unknown parent {}",
                        step.id, parent
                    )));
                }
            }
        }

        let catalog = Self { steps, index };
        for step in &catalog.steps {
            let mut seen = HashSet::new();
            let mut cursor = Some(&step.id);
            while let Some(id) = cursor {
                if !seen.insert(id) {
                    return Err(MigrationError::InvalidCatalog(format!(
                        "parent chain of {} contains a cycle",
                        step.id
                    )));
                }
                cursor = catalog.steps[catalog.index[id]].parent.as_ref();
            }
        }

        Ok(catalog)
    }

    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Look up a step by id.
    pub fn get(&self, id: &StepId) -> Result<&MigrationStep> {
        self.index
            .get(id)
            .map(|&i| &self.steps[i])
            .ok_or_else(|| MigrationError::UnknownStep(id.to_string()))
    }

    /// Parse an operator-supplied target: a step id or `base`.
    pub fn resolve(&self, target: &str) -> Result<VersionToken> {
        if target == "base" {
            return Ok(VersionToken::base());
        }
        let id = StepId::new(target);
        self.get(&id)?;
        Ok(VersionToken::at(id))
    }

    /// Steps nothing else builds on.
    pub fn heads(&self) -> Vec<&StepId> {
        let parents: HashSet<&StepId> = self.steps.iter().filter_map(|s| s.parent.as_ref()).collect();
        self.steps
            .iter()
            .map(|s| &s.id)
            .filter(|id| !parents.contains(id))
            .collect()
    }

    /// The single head, or base for an empty catalog.
    pub fn head(&self) -> Result<VersionToken> {
        let heads = self.heads();
        match heads.as_slice() {
            [] => Ok(VersionToken::base()),
            [only] => Ok(VersionToken::at((*only).clone())),
            many => Err(MigrationError::MultipleHeads(
                many.iter().map(|id| id.to_string()).collect(),
            )),
        }
    }

    /// Steps from the root up to and including `token`, root first.
    pub fn lineage(&self, token: &VersionToken) -> Result<Vec<&MigrationStep>> {
        let mut chain = Vec::new();
        let mut cursor = token.step().cloned();
        while let Some(id) = cursor {
            let step = self.get(&id)?;
            cursor = step.parent.clone();
            chain.push(step);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `step` is applied when the ledger holds `token`.
    pub fn is_applied(&self, token: &VersionToken, step: &StepId) -> bool {
        self.lineage(token)
            .map(|chain| chain.iter().any(|s| &s.id == step))
            .unwrap_or(false)
    }

    /// Steps to apply, in order, to move from `from` up to `to`.
    pub fn upgrade_path(&self, from: &VersionToken, to: &VersionToken) -> Result<Vec<&MigrationStep>> {
        let from_chain = self.lineage(from)?;
        let to_chain = self.lineage(to)?;
        if from_chain.len() > to_chain.len() || !is_prefix(&from_chain, &to_chain) {
            return Err(MigrationError::NoPath {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok(to_chain[from_chain.len()..].to_vec())
    }

    /// Steps to revert, in order, to move from `from` down to `to`.
    pub fn downgrade_path(&self, from: &VersionToken, to: &VersionToken) -> Result<Vec<&MigrationStep>> {
        let mut path = self.upgrade_path(to, from).map_err(|_| MigrationError::NoPath {
            from: from.clone(),
            to: to.clone(),
        })?;
        path.reverse();
        Ok(path)
    }
}

fn is_prefix(prefix: &[&MigrationStep], chain: &[&MigrationStep]) -> bool {
    prefix.iter().zip(chain.iter()).all(|(a, b)| a.id == b.id)
}
