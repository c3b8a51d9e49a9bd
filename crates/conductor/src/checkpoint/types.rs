use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scheduler::{AgentRecord, AgentStatus};

/// Checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable snapshot of a run taken at a level boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub version: u32,
    pub run_id: String,
    /// Fingerprint of the plan the snapshot belongs to
    pub plan_fingerprint: String,
    /// Index of the last level that settled; None when stopped in level 0
    pub last_settled_level: Option<usize>,
    pub agents: BTreeMap<String, AgentRecord>,
    /// Requirement id -> completion
    pub requirements: BTreeMap<String, f64>,
    /// Taken because the run was stopped
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, plan_fingerprint: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            run_id: run_id.into(),
            plan_fingerprint: plan_fingerprint.into(),
            last_settled_level: None,
            agents: BTreeMap::new(),
            requirements: BTreeMap::new(),
            cancelled: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_level(mut self, level: Option<usize>) -> Self {
        self.last_settled_level = level;
        self
    }

    pub fn with_agents<'a>(mut self, records: impl IntoIterator<Item = &'a AgentRecord>) -> Self {
        self.agents = records
            .into_iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        self
    }

    pub fn with_requirements(mut self, requirements: BTreeMap<String, f64>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn completed_agents(&self) -> Vec<&str> {
        self.agents
            .values()
            .filter(|r| r.status == AgentStatus::Completed)
            .map(|r| r.name.as_str())
            .collect()
    }
}
