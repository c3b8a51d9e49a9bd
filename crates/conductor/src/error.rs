//! Error taxonomy
//!
//! Every boundary in the engine (planner, lock table, runner, scheduler,
//! checkpoint storage) returns [`ConductorResult`]. Errors are classified as
//! fatal (abort the whole run before any agent starts) or per-agent (fail one
//! attempt and, once retries are exhausted, that agent and its dependents).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Problems found while turning the declared dependency graph into levels
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependencyViolation {
    /// An agent names a prerequisite that was never declared
    #[error("agent '{agent}' depends on unknown agent '{dependency}'")]
    UnknownDependency { agent: String, dependency: String },

    /// A cycle exists; the path starts and ends with the same agent
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Leveling stalled without a cycle being isolated
    #[error("dependencies never satisfied for: {}", .0.join(", "))]
    Unresolvable(Vec<String>),
}

/// Error types for the coordination engine
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Cyclic or unresolved dependency graph
    #[error("Dependency violation: {0}")]
    DependencyViolation(#[from] DependencyViolation),

    /// A file lock is held by another agent
    #[error("Lock denied for '{path}' (held by '{holder}')")]
    LockDenied { path: String, holder: String },

    /// The producer failed, timed out or emitted an invalid operation
    #[error("Agent '{agent}' execution failed: {message}")]
    AgentExecution { agent: String, message: String },

    /// Produced artifacts did not pass verification
    #[error("Agent '{agent}' verification failed: {message}")]
    VerificationFailure { agent: String, message: String },

    /// Malformed configuration, manifest or missing credentials
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A progress report was rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Execution was stopped by an external request
    #[error("Execution cancelled")]
    Cancelled,

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConductorError {
    fn from(err: serde_yaml::Error) -> Self {
        ConductorError::Configuration(err.to_string())
    }
}

/// Coarse classification recorded in `agent_failed` events and summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DependencyViolation,
    LockDenied,
    AgentExecution,
    VerificationFailure,
    Configuration,
    Validation,
    Cancelled,
    Io,
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::DependencyViolation => "dependency_violation",
            ErrorKind::LockDenied => "lock_denied",
            ErrorKind::AgentExecution => "agent_execution",
            ErrorKind::VerificationFailure => "verification_failure",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        };
        write!(f, "{}", s)
    }
}

impl ConductorError {
    /// Build an execution error for an agent
    pub fn execution(agent: impl Into<String>, message: impl Into<String>) -> Self {
        ConductorError::AgentExecution {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Build a verification failure for an agent
    pub fn verification(agent: impl Into<String>, message: impl Into<String>) -> Self {
        ConductorError::VerificationFailure {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConductorError::DependencyViolation(_) => ErrorKind::DependencyViolation,
            ConductorError::LockDenied { .. } => ErrorKind::LockDenied,
            ConductorError::AgentExecution { .. } => ErrorKind::AgentExecution,
            ConductorError::VerificationFailure { .. } => ErrorKind::VerificationFailure,
            ConductorError::Configuration(_) => ErrorKind::Configuration,
            ConductorError::Validation(_) => ErrorKind::Validation,
            ConductorError::Cancelled => ErrorKind::Cancelled,
            ConductorError::Io(_) => ErrorKind::Io,
            ConductorError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Fatal errors abort the run before any agent executes
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConductorError::DependencyViolation(_) | ConductorError::Configuration(_)
        )
    }

    /// Per-agent errors that the retry policy may attempt again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::LockDenied { .. }
                | ConductorError::AgentExecution { .. }
                | ConductorError::VerificationFailure { .. }
                | ConductorError::Validation(_)
                | ConductorError::Io(_)
                | ConductorError::Serialization(_)
        )
    }
}
