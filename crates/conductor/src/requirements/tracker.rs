//! Weighted requirement completion
//!
//! Completion per requirement only moves forward within a run. Reports are
//! accepted from declared owners only and out-of-range values are rejected
//! rather than clamped.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::manifest::{CoreRequirement, RequirementsManifest};
use crate::error::{ConductorError, ConductorResult};

/// A tracked unit of project scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub id: String,
    pub description: String,
    pub weight: f64,
    /// Percentage in [0, 100]
    pub completion: f64,
    pub owners: BTreeSet<String>,
}

impl Requirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            weight,
            completion: 0.0,
            owners: BTreeSet::new(),
        }
    }

    pub fn with_owner(mut self, agent: impl Into<String>) -> Self {
        self.owners.insert(agent.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.completion >= 100.0
    }
}

impl From<&CoreRequirement> for Requirement {
    fn from(req: &CoreRequirement) -> Self {
        Self {
            id: req.id.clone(),
            description: req.description.clone(),
            weight: req.effective_weight(),
            completion: 0.0,
            owners: req.owners.iter().cloned().collect(),
        }
    }
}

/// Outcome of an accepted report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub previous: f64,
    /// Completion after the report; equals `previous` when the report regressed
    pub current: f64,
    pub overall: f64,
}

impl ProgressUpdate {
    pub fn advanced(&self) -> bool {
        self.current > self.previous
    }
}

/// Thread-safe requirement registry
#[derive(Default)]
pub struct RequirementTracker {
    requirements: RwLock<BTreeMap<String, Requirement>>,
}

impl RequirementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(manifest: &RequirementsManifest) -> Self {
        let tracker = Self::new();
        for req in &manifest.core_requirements {
            tracker.add_requirement(Requirement::from(req));
        }
        tracker
    }

    /// Register or replace a requirement
    pub fn add_requirement(&self, requirement: Requirement) {
        self.requirements
            .write()
            .insert(requirement.id.clone(), requirement);
    }

    /// Allow `agent` to report on `requirement_id`
    pub fn add_owner(&self, requirement_id: &str, agent: &str) -> ConductorResult<()> {
        let mut requirements = self.requirements.write();
        let req = requirements.get_mut(requirement_id).ok_or_else(|| {
            ConductorError::Configuration(format!(
                "agent '{}' claims unknown requirement '{}'",
                agent, requirement_id
            ))
        })?;
        req.owners.insert(agent.to_string());
        Ok(())
    }

    /// Record a completion report from `agent`
    pub fn report(
        &self,
        agent: &str,
        requirement_id: &str,
        percent: f64,
    ) -> ConductorResult<ProgressUpdate> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(ConductorError::Validation(format!(
                "completion {} for '{}' is outside 0-100",
                percent, requirement_id
            )));
        }

        let mut requirements = self.requirements.write();
        let req = requirements.get_mut(requirement_id).ok_or_else(|| {
            ConductorError::Validation(format!("unknown requirement '{}'", requirement_id))
        })?;

        if !req.owners.contains(agent) {
            return Err(ConductorError::Validation(format!(
                "unauthorized reporter: '{}' does not own '{}'",
                agent, requirement_id
            )));
        }

        let previous = req.completion;
        if percent < previous {
            debug!(
                requirement = requirement_id,
                agent, previous, percent, "ignoring regressing report"
            );
        } else {
            req.completion = percent;
        }
        let current = req.completion;

        Ok(ProgressUpdate {
            previous,
            current,
            overall: weighted_completion(requirements.values()),
        })
    }

    /// Weighted overall completion in [0, 100]
    pub fn overall_completion(&self) -> f64 {
        weighted_completion(self.requirements.read().values())
    }

    pub fn completion(&self, requirement_id: &str) -> Option<f64> {
        self.requirements
            .read()
            .get(requirement_id)
            .map(|r| r.completion)
    }

    pub fn requirements(&self) -> Vec<Requirement> {
        self.requirements.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.requirements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.read().is_empty()
    }

    /// Completion per requirement id
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.requirements
            .read()
            .values()
            .map(|r| (r.id.clone(), r.completion))
            .collect()
    }

    /// Reapply a snapshot; values never lower the current completion
    pub fn restore(&self, snapshot: &BTreeMap<String, f64>) {
        let mut requirements = self.requirements.write();
        for (id, completion) in snapshot {
            match requirements.get_mut(id) {
                Some(req) if completion.is_finite() => {
                    req.completion = req.completion.max(completion.clamp(0.0, 100.0));
                }
                Some(_) => warn!(requirement = %id, "skipping non-finite checkpoint value"),
                None => warn!(requirement = %id, "checkpoint names unknown requirement"),
            }
        }
    }
}

fn weighted_completion<'a>(requirements: impl Iterator<Item = &'a Requirement>) -> f64 {
    let (weighted, total) = requirements.fold((0.0, 0.0), |(weighted, total), r| {
        (weighted + r.weight * r.completion, total + r.weight)
    });
    if total <= 0.0 {
        0.0
    } else {
        weighted / total
    }
}
