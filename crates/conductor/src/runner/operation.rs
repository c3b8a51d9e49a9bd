use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConductorError, ConductorResult};

/// Closed set of operations an agent may request
///
/// Raw producer output is validated into this type before anything runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOperation {
    /// Write `content` to `path` under the output root
    WriteFile { path: String, content: String },
    /// Report completion of an owned requirement
    ReportProgress { requirement: String, percent: f64 },
    /// The agent finished
    Done {
        #[serde(default)]
        summary: String,
    },
    /// The agent gave up
    Failed { reason: String },
}

impl AgentOperation {
    /// Validate a raw operation emitted by `agent`
    pub fn parse(agent: &str, raw: Value) -> ConductorResult<Self> {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "<missing>".to_string());

        serde_json::from_value(raw).map_err(|e| {
            ConductorError::execution(agent, format!("invalid operation '{}': {}", kind, e))
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentOperation::WriteFile { .. } => "write_file",
            AgentOperation::ReportProgress { .. } => "report_progress",
            AgentOperation::Done { .. } => "done",
            AgentOperation::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentOperation::Done { .. } | AgentOperation::Failed { .. })
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Value {
        serde_json::json!({"type": "write_file", "path": path.into(), "content": content.into()})
    }

    pub fn report_progress(requirement: impl Into<String>, percent: f64) -> Value {
        serde_json::json!({"type": "report_progress", "requirement": requirement.into(), "percent": percent})
    }

    pub fn done(summary: impl Into<String>) -> Value {
        serde_json::json!({"type": "done", "summary": summary.into()})
    }

    pub fn failed(reason: impl Into<String>) -> Value {
        serde_json::json!({"type": "failed", "reason": reason.into()})
    }
}
