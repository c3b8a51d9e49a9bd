//! Agent Runner
//!
//! Executes a single attempt of an agent: pulls operations from the producer,
//! validates them, applies file writes under the lock table and forwards
//! progress reports. Every lock the agent holds is released when the attempt
//! ends, whatever the outcome.

use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::operation::AgentOperation;
use super::producer::{AgentProducer, ProducerContext};
use super::verify::{VerificationContext, Verifier, WrittenFile};
use crate::context::RunContext;
use crate::error::{ConductorError, ConductorResult};
use crate::events::EventType;
use crate::locks::normalize_lock_path;
use crate::scheduler::AgentSpec;
use crate::utils::write_atomic;

/// Result of a successful attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub summary: String,
    /// Files written, in first-write order, with the last content written
    pub written: Vec<WrittenFile>,
}

impl AttemptOutcome {
    /// Normalized relative paths written
    pub fn paths(&self) -> Vec<&str> {
        self.written.iter().map(|f| f.path.as_str()).collect()
    }
}

pub struct AgentRunner<P: AgentProducer> {
    ctx: Arc<RunContext>,
    producer: Arc<P>,
    verifier: Arc<dyn Verifier>,
}

impl<P: AgentProducer> AgentRunner<P> {
    pub fn new(ctx: Arc<RunContext>, producer: Arc<P>, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            ctx,
            producer,
            verifier,
        }
    }

    /// Run attempt number `attempt` (1-based) of `agent`
    pub async fn run_attempt(
        &self,
        agent: &AgentSpec,
        attempt: u32,
        previous_error: Option<String>,
        cancel: &CancellationToken,
    ) -> ConductorResult<AttemptOutcome> {
        let max_attempts = self.ctx.config().max_retries;
        let started = Instant::now();
        self.ctx.emit(
            EventType::AgentStart,
            &agent.name,
            json!({"attempt": attempt, "max_attempts": max_attempts}),
        );
        info!(agent = %agent.name, attempt, "agent attempt started");

        let timeout = self.ctx.config().agent_timeout();
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.execute(agent, attempt, previous_error, cancel)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(ConductorError::execution(
                        &agent.name,
                        format!("attempt timed out after {}s", timeout.as_secs()),
                    )),
                }
            }
            _ = cancel.cancelled() => Err(ConductorError::Cancelled),
        };

        let released = self.ctx.locks().release_all(&agent.name);
        if released > 0 {
            debug!(agent = %agent.name, released, "released locks at end of attempt");
        }

        let result = match result {
            Ok(outcome) => self.verify(agent, &outcome).await.map(|_| outcome),
            Err(e) => Err(e),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                info!(agent = %agent.name, attempt, duration_ms, "agent completed");
                self.ctx.emit(
                    EventType::AgentComplete,
                    &agent.name,
                    json!({
                        "attempt": attempt,
                        "summary": outcome.summary,
                        "files": outcome.paths(),
                        "duration_ms": duration_ms,
                    }),
                );
            }
            Err(ConductorError::Cancelled) => {
                debug!(agent = %agent.name, attempt, "attempt interrupted");
            }
            Err(e) => {
                let is_final = !e.is_retryable() || attempt >= max_attempts;
                warn!(agent = %agent.name, attempt, is_final, error = %e, "agent attempt failed");
                self.ctx.emit(
                    EventType::AgentFailed,
                    &agent.name,
                    json!({
                        "attempt": attempt,
                        "max_attempts": max_attempts,
                        "final": is_final,
                        "kind": e.kind(),
                        "error": e.to_string(),
                        "duration_ms": duration_ms,
                    }),
                );
            }
        }

        result
    }

    async fn execute(
        &self,
        agent: &AgentSpec,
        attempt: u32,
        previous_error: Option<String>,
        cancel: &CancellationToken,
    ) -> ConductorResult<AttemptOutcome> {
        let producer_ctx = ProducerContext {
            run_id: self.ctx.run_id().to_string(),
            attempt,
            max_attempts: self.ctx.config().max_retries,
            previous_error,
            requirement_completion: agent
                .requirements
                .iter()
                .filter_map(|id| {
                    self.ctx
                        .requirements()
                        .completion(id)
                        .map(|c| (id.clone(), c))
                })
                .collect(),
        };

        let mut stream = self
            .producer
            .produce(agent, &producer_ctx)
            .await
            .map_err(|e| ConductorError::execution(&agent.name, format!("producer failed: {:#}", e)))?;

        let mut written: Vec<WrittenFile> = Vec::new();
        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }

            let raw = item.map_err(|e| {
                ConductorError::execution(&agent.name, format!("producer stream error: {:#}", e))
            })?;
            let operation = AgentOperation::parse(&agent.name, raw)?;
            debug!(agent = %agent.name, operation = operation.name(), "applying operation");

            match operation {
                AgentOperation::WriteFile { path, content } => {
                    let key = self.write_file(agent, &path, &content, cancel).await?;
                    match written.iter_mut().find(|f| f.path == key) {
                        Some(file) => file.content = content,
                        None => written.push(WrittenFile { path: key, content }),
                    }
                }
                AgentOperation::ReportProgress {
                    requirement,
                    percent,
                } => {
                    let update = self
                        .ctx
                        .requirements()
                        .report(&agent.name, &requirement, percent)?;
                    self.ctx.emit(
                        EventType::RequirementProgress,
                        &agent.name,
                        json!({
                            "requirement": requirement,
                            "reported": percent,
                            "previous": update.previous,
                            "current": update.current,
                            "overall": update.overall,
                        }),
                    );
                }
                AgentOperation::Done { summary } => {
                    return Ok(AttemptOutcome { summary, written });
                }
                AgentOperation::Failed { reason } => {
                    return Err(ConductorError::execution(&agent.name, reason));
                }
            }
        }

        Err(ConductorError::execution(
            &agent.name,
            "operation stream ended without done or failed",
        ))
    }

    /// Write one file under its lock, returning the normalized lock key
    async fn write_file(
        &self,
        agent: &AgentSpec,
        path: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> ConductorResult<String> {
        let target = self
            .ctx
            .resolve_output_path(path)
            .map_err(|e| ConductorError::execution(&agent.name, e.to_string()))?;
        let key = normalize_lock_path(path);

        self.acquire_lock(agent, &key, cancel).await?;

        let result = async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            write_atomic(&target, content.as_bytes()).await
        }
        .await;

        self.ctx.locks().release(&key, &agent.name);
        result?;

        debug!(agent = %agent.name, path = %key, bytes = content.len(), "file written");
        Ok(key)
    }

    /// Non-blocking acquisition with bounded re-requests
    async fn acquire_lock(
        &self,
        agent: &AgentSpec,
        key: &str,
        cancel: &CancellationToken,
    ) -> ConductorResult<()> {
        let config = self.ctx.config();
        let retries = config.lock_retry_attempts;

        for request in 0..=retries {
            if self.ctx.locks().acquire(key, &agent.name) {
                return Ok(());
            }

            let holder = self.ctx.locks().holder(key).unwrap_or_default();
            self.ctx.emit(
                EventType::LockDenied,
                &agent.name,
                json!({
                    "path": key,
                    "holder": holder,
                    "request": request + 1,
                    "max_requests": retries + 1,
                }),
            );

            if request == retries {
                return Err(ConductorError::LockDenied {
                    path: key.to_string(),
                    holder,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(config.lock_retry_delay()) => {}
                _ = cancel.cancelled() => return Err(ConductorError::Cancelled),
            }
        }

        Err(ConductorError::LockDenied {
            path: key.to_string(),
            holder: self.ctx.locks().holder(key).unwrap_or_default(),
        })
    }

    async fn verify(&self, agent: &AgentSpec, outcome: &AttemptOutcome) -> ConductorResult<()> {
        let ctx = VerificationContext {
            agent,
            output_root: self.ctx.output_root(),
            written: &outcome.written,
        };
        self.verifier.verify(&ctx).await
    }
}
