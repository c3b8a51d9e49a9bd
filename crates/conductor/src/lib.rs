//! Conductor - level-synchronous coordination for file-producing agents
//!
//! Plans a dependency graph of agents into execution levels and runs each
//! level with bounded concurrency, guarding the shared output tree with a
//! file lock table and recording every step in an append-only event log.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod locks;
pub mod logging;
pub mod planner;
pub mod requirements;
pub mod runner;
pub mod scheduler;
pub mod utils;

pub use config::RunConfig;
pub use context::RunContext;
pub use error::{ConductorError, ConductorResult, DependencyViolation};
pub use planner::{ExecutionPlan, Planner};
pub use scheduler::{AgentSpec, AgentStatus, RunSummary, Scheduler};
