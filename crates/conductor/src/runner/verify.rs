//! Verification hook
//!
//! Runs after an agent reports `done`. A failure demotes the attempt to
//! failed and it is retried like any other per-agent error.
//!
//! Verifiers look at the content the attempt itself wrote. Locks are released
//! after every write, so the file on disk may already hold a sibling's version.

use std::path::Path;
use std::sync::Arc;

use crate::error::{ConductorError, ConductorResult};
use crate::locks::normalize_lock_path;
use crate::scheduler::AgentSpec;

/// A file written during an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Normalized relative path
    pub path: String,
    /// Last content the attempt wrote to it
    pub content: String,
}

impl WrittenFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// What a verifier gets to look at
pub struct VerificationContext<'a> {
    pub agent: &'a AgentSpec,
    pub output_root: &'a Path,
    /// Files written during the attempt, in first-write order
    pub written: &'a [WrittenFile],
}

impl VerificationContext<'_> {
    /// Whether the attempt wrote `path` (any spelling)
    pub fn wrote(&self, path: &str) -> bool {
        let key = normalize_lock_path(path);
        self.written.iter().any(|f| f.path == key)
    }
}

#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, ctx: &VerificationContext<'_>) -> ConductorResult<()>;
}

/// Accepts everything
pub struct NoopVerifier;

#[async_trait::async_trait]
impl Verifier for NoopVerifier {
    fn name(&self) -> &str {
        "noop"
    }

    async fn verify(&self, _ctx: &VerificationContext<'_>) -> ConductorResult<()> {
        Ok(())
    }
}

/// Written files must be non-empty; JSON and YAML files must parse
pub struct SyntaxVerifier;

impl SyntaxVerifier {
    fn check(path: &str, content: &str) -> Result<(), String> {
        if content.trim().is_empty() {
            return Err(format!("{} is empty", path));
        }
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => serde_json::from_str::<serde_json::Value>(content)
                .map(|_| ())
                .map_err(|e| format!("{} is not valid JSON: {}", path, e)),
            Some("yaml") | Some("yml") => serde_yaml::from_str::<serde_yaml::Value>(content)
                .map(|_| ())
                .map_err(|e| format!("{} is not valid YAML: {}", path, e)),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Verifier for SyntaxVerifier {
    fn name(&self) -> &str {
        "syntax"
    }

    async fn verify(&self, ctx: &VerificationContext<'_>) -> ConductorResult<()> {
        let problems: Vec<String> = ctx
            .written
            .iter()
            .filter_map(|file| Self::check(&file.path, &file.content).err())
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::verification(
                &ctx.agent.name,
                problems.join("; "),
            ))
        }
    }
}

/// Every declared deliverable must have been written by the attempt or
/// already exist as a file
pub struct DeliverablesVerifier;

#[async_trait::async_trait]
impl Verifier for DeliverablesVerifier {
    fn name(&self) -> &str {
        "deliverables"
    }

    async fn verify(&self, ctx: &VerificationContext<'_>) -> ConductorResult<()> {
        let mut missing = Vec::new();
        for deliverable in &ctx.agent.deliverables {
            if ctx.wrote(deliverable) {
                continue;
            }
            let is_file = tokio::fs::metadata(ctx.output_root.join(deliverable))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                missing.push(deliverable.as_str());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::verification(
                &ctx.agent.name,
                format!("missing deliverables: {}", missing.join(", ")),
            ))
        }
    }
}

/// Runs several verifiers and reports every failure together
#[derive(Default)]
pub struct CompositeVerifier {
    verifiers: Vec<Arc<dyn Verifier>>,
}

impl CompositeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Syntax and deliverable checks
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(SyntaxVerifier))
            .with(Arc::new(DeliverablesVerifier))
    }

    pub fn with(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

#[async_trait::async_trait]
impl Verifier for CompositeVerifier {
    fn name(&self) -> &str {
        "composite"
    }

    async fn verify(&self, ctx: &VerificationContext<'_>) -> ConductorResult<()> {
        let mut failures = Vec::new();
        for verifier in &self.verifiers {
            match verifier.verify(ctx).await {
                Ok(()) => {}
                Err(ConductorError::VerificationFailure { message, .. }) => {
                    failures.push(format!("[{}] {}", verifier.name(), message));
                }
                Err(other) => return Err(other),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConductorError::verification(
                &ctx.agent.name,
                failures.join("; "),
            ))
        }
    }
}
