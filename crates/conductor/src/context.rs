//! Per-run shared state
//!
//! One `RunContext` is built for each run and handed to every component.
//! It owns the lock table, the event log and the requirement tracker.

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::{ConductorError, ConductorResult};
use crate::events::{EventLog, EventType};
use crate::locks::FileLockTable;
use crate::requirements::{RequirementTracker, RequirementsManifest};

pub struct RunContext {
    run_id: String,
    config: RunConfig,
    locks: FileLockTable,
    events: EventLog,
    requirements: RequirementTracker,
}

impl RunContext {
    /// Validate `config` and open the event log
    pub fn new(config: RunConfig) -> ConductorResult<Self> {
        config.validate()?;
        Self::open(config)
    }

    /// Like [`RunContext::new`], resolving credentials through `lookup`
    pub fn with_env<F>(config: RunConfig, lookup: F) -> ConductorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate_with_env(lookup)?;
        Self::open(config)
    }

    fn open(config: RunConfig) -> ConductorResult<Self> {
        std::fs::create_dir_all(&config.output_root)?;
        let events = EventLog::open(&config.event_log_path)?;
        let run_id = Uuid::new_v4().to_string();
        info!(run_id = %run_id, output = %config.output_root.display(), "run context ready");

        Ok(Self {
            run_id,
            config,
            locks: FileLockTable::new(),
            events,
            requirements: RequirementTracker::new(),
        })
    }

    /// Seed the requirement tracker from a manifest
    pub fn with_manifest(mut self, manifest: &RequirementsManifest) -> Self {
        self.requirements = RequirementTracker::from_manifest(manifest);
        self
    }

    pub fn with_requirements(mut self, requirements: RequirementTracker) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn locks(&self) -> &FileLockTable {
        &self.locks
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn requirements(&self) -> &RequirementTracker {
        &self.requirements
    }

    /// Append an event; a failed write is logged and does not fail the caller
    pub fn emit(&self, event_type: EventType, agent_name: &str, data: Value) {
        if let Err(e) = self.events.emit(event_type, agent_name, data) {
            warn!(event_type = %event_type, agent = agent_name, error = %e, "failed to append event");
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.config.output_root
    }

    /// Resolve a relative output path, refusing anything that leaves the
    /// output root
    pub fn resolve_output_path(&self, relative: &str) -> ConductorResult<PathBuf> {
        let candidate = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(ConductorError::Validation("empty output path".to_string()));
        }
        if candidate.is_absolute() || relative.starts_with('/') || relative.starts_with('\\') {
            return Err(ConductorError::Validation(format!(
                "output path '{}' must be relative",
                relative
            )));
        }

        let mut depth: i32 = 0;
        let mut resolved = self.config.output_root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => {
                    depth += 1;
                    resolved.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ConductorError::Validation(format!(
                            "output path '{}' escapes the output root",
                            relative
                        )));
                    }
                    resolved.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ConductorError::Validation(format!(
                        "output path '{}' must be relative",
                        relative
                    )));
                }
            }
        }
        if depth == 0 {
            return Err(ConductorError::Validation(format!(
                "output path '{}' names the output root",
                relative
            )));
        }
        Ok(resolved)
    }
}
