//! Agent declarations and runtime records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ErrorKind;

/// Declared agent: a named unit of work producing files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub name: String,
    /// Agents that must complete first
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Higher runs first within a level
    #[serde(default)]
    pub priority: i32,
    /// Relative paths that must exist after the agent finishes
    #[serde(default)]
    pub deliverables: Vec<String>,
    /// Requirement ids this agent may report progress on
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: BTreeSet::new(),
            priority: 0,
            deliverables: Vec::new(),
            requirements: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deliverable(mut self, path: impl Into<String>) -> Self {
        self.deliverables.push(path.into());
        self
    }

    pub fn with_requirement(mut self, requirement_id: impl Into<String>) -> Self {
        self.requirements.push(requirement_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Lifecycle of an agent within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// A dependency did not complete; never attempted
    Blocked,
    /// Interrupted by a stop request
    Cancelled,
}

impl AgentStatus {
    /// Settled states end the agent's participation in the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed
                | AgentStatus::Failed
                | AgentStatus::Blocked
                | AgentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Blocked => "blocked",
            AgentStatus::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Runtime state of one agent, mutated only by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub name: String,
    pub status: AgentStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    /// Agents whose failure blocked this one
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

impl AgentRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AgentStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            last_error: None,
            last_error_kind: None,
            blocked_by: Vec::new(),
        }
    }

    /// Back to a fresh Pending record (used when resuming)
    pub fn reset(&mut self) {
        *self = AgentRecord::new(std::mem::take(&mut self.name));
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
