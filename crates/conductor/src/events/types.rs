use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of execution events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An agent attempt began
    AgentStart,
    /// An agent finished and passed verification
    AgentComplete,
    /// An agent attempt failed (the payload says whether it was the last)
    AgentFailed,
    /// A dependency did not complete, so the agent was skipped
    AgentBlocked,
    /// The agent was interrupted by a stop request
    AgentCancelled,
    LevelStart,
    LevelComplete,
    /// A file lock request was refused because another agent holds it
    LockDenied,
    /// A requirement completion report was accepted
    RequirementProgress,
    RunStart,
    RunComplete,
    CheckpointSaved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStart => "agent_start",
            EventType::AgentComplete => "agent_complete",
            EventType::AgentFailed => "agent_failed",
            EventType::AgentBlocked => "agent_blocked",
            EventType::AgentCancelled => "agent_cancelled",
            EventType::LevelStart => "level_start",
            EventType::LevelComplete => "level_complete",
            EventType::LockDenied => "lock_denied",
            EventType::RequirementProgress => "requirement_progress",
            EventType::RunStart => "run_start",
            EventType::RunComplete => "run_complete",
            EventType::CheckpointSaved => "checkpoint_saved",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of the session event file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Empty for scheduler-level events
    #[serde(default)]
    pub agent_name: String,
    pub event_type: EventType,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, agent_name: impl Into<String>, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_name: agent_name.into(),
            event_type,
            data,
        }
    }

    /// Scheduler-level event with no agent
    pub fn scheduler(event_type: EventType, data: Value) -> Self {
        Self::new(event_type, String::new(), data)
    }

    pub fn is_scheduler_event(&self) -> bool {
        self.agent_name.is_empty()
    }
}
