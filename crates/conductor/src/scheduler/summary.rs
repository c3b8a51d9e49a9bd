//! Final run summary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::types::{AgentRecord, AgentStatus};
use crate::locks::LockStatistics;

/// Per-agent line of the summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReport {
    pub name: String,
    pub status: AgentStatus,
    pub attempts: u32,
    pub duration_ms: Option<i64>,
    pub last_error: Option<String>,
}

impl From<&AgentRecord> for AgentReport {
    fn from(record: &AgentRecord) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status,
            attempts: record.attempts,
            duration_ms: record.duration_ms(),
            last_error: record.last_error.clone(),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    /// Agents in plan order
    pub agents: Vec<AgentReport>,
    /// Blocked agent -> the unfinished dependencies that blocked it
    pub blocked_by: BTreeMap<String, Vec<String>>,
    pub overall_completion: f64,
    pub lock_stats: LockStatistics,
    pub cancelled: bool,
    /// Levels skipped because a checkpoint already completed them
    pub levels_skipped: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    pub fn status_of(&self, agent: &str) -> Option<AgentStatus> {
        self.agents
            .iter()
            .find(|a| a.name == agent)
            .map(|a| a.status)
    }

    pub fn with_status(&self, status: AgentStatus) -> Vec<&str> {
        self.agents
            .iter()
            .filter(|a| a.status == status)
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn completed(&self) -> Vec<&str> {
        self.with_status(AgentStatus::Completed)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.with_status(AgentStatus::Failed)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.with_status(AgentStatus::Blocked)
    }

    pub fn all_completed(&self) -> bool {
        !self.cancelled
            && self
                .agents
                .iter()
                .all(|a| a.status == AgentStatus::Completed)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headline = if self.cancelled {
            "cancelled"
        } else if self.all_completed() {
            "succeeded"
        } else {
            "finished with failures"
        };
        writeln!(f, "Run {} {}", self.run_id, headline)?;
        writeln!(
            f,
            "  completed {}/{}, requirements {:.1}%",
            self.completed().len(),
            self.agents.len(),
            self.overall_completion
        )?;

        for agent in &self.agents {
            write!(
                f,
                "  {:<20} {:<10} attempts={}",
                agent.name, agent.status, agent.attempts
            )?;
            if let Some(ms) = agent.duration_ms {
                write!(f, " {}ms", ms)?;
            }
            if let Some(blockers) = self.blocked_by.get(&agent.name) {
                write!(f, " blocked by {}", blockers.join(", "))?;
            } else if let Some(error) = &agent.last_error {
                write!(f, " error: {}", error)?;
            }
            writeln!(f)?;
        }

        write!(
            f,
            "  locks: {} acquisitions, {} contested",
            self.lock_stats.total_acquisitions, self.lock_stats.contested_acquisitions
        )
    }
}
