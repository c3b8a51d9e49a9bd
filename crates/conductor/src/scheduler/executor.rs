//! Level-synchronous scheduler
//!
//! Levels run strictly in order. Inside a level, agents are launched in
//! priority order through a semaphore of `max_parallel` permits; a permit is
//! held for the agent's whole retry loop. The level settles before the next
//! one starts, and a checkpoint is written at every level boundary.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::summary::{AgentReport, RunSummary};
use super::types::{AgentRecord, AgentSpec, AgentStatus};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::context::RunContext;
use crate::error::{ConductorError, ConductorResult};
use crate::events::EventType;
use crate::planner::{ExecutionLevel, ExecutionPlan, Planner};
use crate::runner::{AgentProducer, AgentRunner, CompositeVerifier, Verifier};

type Records = Arc<Mutex<BTreeMap<String, AgentRecord>>>;

/// Per-level tallies reported in `level_complete`
#[derive(Debug, Default, Clone, Copy)]
struct LevelStats {
    completed: usize,
    failed: usize,
    blocked: usize,
    cancelled: usize,
}

pub struct Scheduler<P: AgentProducer> {
    ctx: Arc<RunContext>,
    producer: Arc<P>,
    verifier: Arc<dyn Verifier>,
    checkpoints: CheckpointManager,
    cancel: CancellationToken,
    records: Records,
}

impl<P: AgentProducer + 'static> Scheduler<P> {
    pub fn new(ctx: Arc<RunContext>, producer: P) -> Self {
        let checkpoints = CheckpointManager::new(ctx.config().checkpoint_dir.clone());
        Self {
            ctx,
            producer: Arc::new(producer),
            verifier: Arc::new(CompositeVerifier::standard()),
            checkpoints,
            cancel: CancellationToken::new(),
            records: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Replace the default syntax + deliverables verification
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Token that stops the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Live snapshot of every agent record
    pub fn status(&self) -> Vec<AgentRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Plan and execute `agents` from scratch
    pub async fn run(&self, agents: &[AgentSpec]) -> ConductorResult<RunSummary> {
        let plan = self.prepare(agents)?;
        {
            let mut records = self.records.lock();
            records.clear();
            for spec in plan.agents() {
                records.insert(spec.name.clone(), AgentRecord::new(&spec.name));
            }
        }
        self.execute(&plan, false).await
    }

    /// Continue from the latest checkpoint, or start fresh when there is none
    pub async fn resume(&self, agents: &[AgentSpec]) -> ConductorResult<RunSummary> {
        let plan = self.prepare(agents)?;
        let checkpoint = match self.checkpoints.load_latest().await? {
            Some(checkpoint) => checkpoint,
            None => {
                info!("no checkpoint found, starting a fresh run");
                return self.run(agents).await;
            }
        };

        if checkpoint.plan_fingerprint != plan.fingerprint() {
            return Err(ConductorError::Configuration(format!(
                "checkpoint belongs to plan {} but the current plan is {}",
                checkpoint.plan_fingerprint,
                plan.fingerprint()
            )));
        }

        {
            let mut records = self.records.lock();
            records.clear();
            for spec in plan.agents() {
                let record = match checkpoint.agents.get(&spec.name) {
                    Some(saved) if saved.status == AgentStatus::Completed => saved.clone(),
                    _ => AgentRecord::new(&spec.name),
                };
                records.insert(spec.name.clone(), record);
            }
        }
        self.ctx.requirements().restore(&checkpoint.requirements);

        info!(
            checkpoint_run = %checkpoint.run_id,
            completed = checkpoint.completed_agents().len(),
            "resuming from checkpoint"
        );
        self.execute(&plan, true).await
    }

    /// Fatal checks before anything executes
    fn prepare(&self, agents: &[AgentSpec]) -> ConductorResult<ExecutionPlan> {
        let plan = Planner::plan(agents)?;
        for spec in plan.agents() {
            for requirement in &spec.requirements {
                self.ctx.requirements().add_owner(requirement, &spec.name)?;
            }
        }
        Ok(plan)
    }

    async fn execute(&self, plan: &ExecutionPlan, resumed: bool) -> ConductorResult<RunSummary> {
        let started = Instant::now();
        let runner = Arc::new(AgentRunner::new(
            self.ctx.clone(),
            self.producer.clone(),
            self.verifier.clone(),
        ));

        self.ctx.emit(
            EventType::RunStart,
            "",
            json!({
                "run_id": self.ctx.run_id(),
                "agents": plan.agent_count(),
                "levels": plan.level_count(),
                "max_parallel": self.ctx.config().max_parallel,
                "resumed": resumed,
            }),
        );
        info!(
            run_id = %self.ctx.run_id(),
            agents = plan.agent_count(),
            levels = plan.level_count(),
            resumed,
            "run started"
        );

        let mut levels_skipped = 0;
        let mut last_settled: Option<usize> = None;
        let mut cancelled = false;

        for level in plan.levels() {
            if self.level_already_completed(level) {
                debug!(level = level.index, "level completed by checkpoint, skipping");
                levels_skipped += 1;
                last_settled = Some(level.index);
                continue;
            }

            if self.cancel.is_cancelled() {
                cancelled = true;
                self.save_checkpoint(plan, last_settled, true).await?;
                break;
            }

            let level_started = Instant::now();
            self.ctx.emit(
                EventType::LevelStart,
                "",
                json!({"level": level.index, "agents": level.agents}),
            );
            info!(level = level.index, agents = ?level.agents, "level started");

            self.run_level(level, plan, &runner).await?;

            let level_cancelled = self.cancel.is_cancelled();
            if level_cancelled {
                self.cancel_unsettled(level);
            }

            let stats = self.level_stats(level);
            self.ctx.emit(
                EventType::LevelComplete,
                "",
                json!({
                    "level": level.index,
                    "completed": stats.completed,
                    "failed": stats.failed,
                    "blocked": stats.blocked,
                    "cancelled": stats.cancelled,
                    "duration_ms": level_started.elapsed().as_millis() as u64,
                }),
            );
            info!(
                level = level.index,
                completed = stats.completed,
                failed = stats.failed,
                blocked = stats.blocked,
                cancelled = stats.cancelled,
                "level settled"
            );

            if level_cancelled {
                cancelled = true;
                self.save_checkpoint(plan, last_settled, true).await?;
                break;
            }

            last_settled = Some(level.index);
            self.save_checkpoint(plan, last_settled, false).await?;
        }

        let summary = self.summarize(plan, cancelled, levels_skipped, started);
        self.ctx.emit(
            EventType::RunComplete,
            "",
            json!({
                "completed": summary.completed().len(),
                "failed": summary.failed().len(),
                "blocked": summary.blocked().len(),
                "cancelled": cancelled,
                "overall_completion": summary.overall_completion,
                "duration_ms": summary.duration_ms,
            }),
        );
        info!(
            completed = summary.completed().len(),
            total = summary.agents.len(),
            cancelled,
            "run finished"
        );

        if summary.all_completed() && self.ctx.config().clear_checkpoint_on_success {
            self.checkpoints.clear().await?;
        }

        Ok(summary)
    }

    fn level_already_completed(&self, level: &ExecutionLevel) -> bool {
        let records = self.records.lock();
        level.agents.iter().all(|name| {
            records
                .get(name)
                .map(|r| r.status == AgentStatus::Completed)
                .unwrap_or(false)
        })
    }

    async fn run_level(
        &self,
        level: &ExecutionLevel,
        plan: &ExecutionPlan,
        runner: &Arc<AgentRunner<P>>,
    ) -> ConductorResult<()> {
        let runnable = self.block_unready(level, plan);

        let semaphore = Arc::new(Semaphore::new(self.ctx.config().max_parallel));
        let mut tasks = JoinSet::new();

        for spec in runnable {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| {
                    ConductorError::execution(&spec.name, format!("scheduler semaphore closed: {}", e))
                })?,
                _ = self.cancel.cancelled() => break,
            };

            self.update(&spec.name, |record| {
                record.status = AgentStatus::Running;
                record.started_at = Some(Utc::now());
            });

            let ctx = self.ctx.clone();
            let runner = runner.clone();
            let records = self.records.clone();
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                run_with_retries(ctx, runner, records, spec, cancel).await;
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "agent task aborted");
            }
        }

        // A task that panicked leaves its record Running
        let now = Utc::now();
        let mut records = self.records.lock();
        for name in &level.agents {
            if let Some(record) = records.get_mut(name) {
                if record.status == AgentStatus::Running && !self.cancel.is_cancelled() {
                    record.status = AgentStatus::Failed;
                    record.finished_at = Some(now);
                    record.last_error = Some("agent task aborted".to_string());
                }
            }
        }
        Ok(())
    }

    /// Mark agents whose dependencies did not complete as Blocked and return
    /// the rest in launch order
    fn block_unready(&self, level: &ExecutionLevel, plan: &ExecutionPlan) -> Vec<AgentSpec> {
        let mut runnable = Vec::new();
        let mut blocked = Vec::new();
        {
            let mut records = self.records.lock();
            for name in &level.agents {
                let Some(spec) = plan.agent(name) else {
                    continue;
                };
                if records.get(name).map(|r| r.status) == Some(AgentStatus::Completed) {
                    continue;
                }

                let blockers: Vec<String> = spec
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        records.get(dep.as_str()).map(|r| r.status) != Some(AgentStatus::Completed)
                    })
                    .cloned()
                    .collect();

                if blockers.is_empty() {
                    runnable.push(spec.clone());
                    continue;
                }

                if let Some(record) = records.get_mut(name) {
                    record.status = AgentStatus::Blocked;
                    record.finished_at = Some(Utc::now());
                    record.blocked_by = blockers.clone();
                }
                blocked.push((name.clone(), blockers));
            }
        }

        for (name, blockers) in blocked {
            warn!(agent = %name, blocked_by = ?blockers, "agent blocked by unfinished dependencies");
            self.ctx.emit(
                EventType::AgentBlocked,
                &name,
                json!({"blocked_by": blockers}),
            );
        }
        runnable
    }

    /// Pending or Running agents of a stopped level become Cancelled
    fn cancel_unsettled(&self, level: &ExecutionLevel) {
        let mut cancelled = Vec::new();
        {
            let mut records = self.records.lock();
            for name in &level.agents {
                if let Some(record) = records.get_mut(name) {
                    if matches!(record.status, AgentStatus::Pending | AgentStatus::Running) {
                        record.status = AgentStatus::Cancelled;
                        record.finished_at = Some(Utc::now());
                        cancelled.push(name.clone());
                    }
                }
            }
        }
        for name in cancelled {
            self.ctx.locks().release_all(&name);
            self.ctx.emit(
                EventType::AgentCancelled,
                &name,
                json!({"started": false}),
            );
        }
    }

    fn level_stats(&self, level: &ExecutionLevel) -> LevelStats {
        let records = self.records.lock();
        let mut stats = LevelStats::default();
        for record in level.agents.iter().filter_map(|n| records.get(n)) {
            match record.status {
                AgentStatus::Completed => stats.completed += 1,
                AgentStatus::Failed => stats.failed += 1,
                AgentStatus::Blocked => stats.blocked += 1,
                AgentStatus::Cancelled => stats.cancelled += 1,
                AgentStatus::Pending | AgentStatus::Running => {}
            }
        }
        stats
    }

    async fn save_checkpoint(
        &self,
        plan: &ExecutionPlan,
        last_settled: Option<usize>,
        cancelled: bool,
    ) -> ConductorResult<()> {
        let checkpoint = {
            let records = self.records.lock();
            Checkpoint::new(self.ctx.run_id(), plan.fingerprint())
                .with_level(last_settled)
                .with_agents(records.values())
                .with_requirements(self.ctx.requirements().snapshot())
                .with_cancelled(cancelled)
        };
        let path = self.checkpoints.save(&checkpoint).await?;
        self.ctx.emit(
            EventType::CheckpointSaved,
            "",
            json!({
                "level": last_settled,
                "cancelled": cancelled,
                "path": path.display().to_string(),
            }),
        );
        Ok(())
    }

    fn summarize(
        &self,
        plan: &ExecutionPlan,
        cancelled: bool,
        levels_skipped: usize,
        started: Instant,
    ) -> RunSummary {
        let records = self.records.lock();
        let mut agents = Vec::new();
        let mut blocked_by = BTreeMap::new();
        for level in plan.levels() {
            for name in &level.agents {
                if let Some(record) = records.get(name) {
                    agents.push(AgentReport::from(record));
                    if record.status == AgentStatus::Blocked {
                        blocked_by.insert(name.clone(), record.blocked_by.clone());
                    }
                }
            }
        }

        RunSummary {
            run_id: self.ctx.run_id().to_string(),
            agents,
            blocked_by,
            overall_completion: self.ctx.requirements().overall_completion(),
            lock_stats: self.ctx.locks().statistics(),
            cancelled,
            levels_skipped,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn update(&self, name: &str, apply: impl FnOnce(&mut AgentRecord)) {
        update_record(&self.records, name, apply);
    }
}

fn update_record(records: &Records, name: &str, apply: impl FnOnce(&mut AgentRecord)) {
    if let Some(record) = records.lock().get_mut(name) {
        apply(record);
    }
}

/// Attempt loop for one agent; settles its record
async fn run_with_retries<P: AgentProducer>(
    ctx: Arc<RunContext>,
    runner: Arc<AgentRunner<P>>,
    records: Records,
    spec: AgentSpec,
    cancel: CancellationToken,
) {
    let max_attempts = ctx.config().max_retries.max(1);
    let mut previous_error: Option<String> = None;

    for attempt in 1..=max_attempts {
        update_record(&records, &spec.name, |r| r.attempts = attempt);

        match runner
            .run_attempt(&spec, attempt, previous_error.clone(), &cancel)
            .await
        {
            Ok(_) => {
                update_record(&records, &spec.name, |r| {
                    r.status = AgentStatus::Completed;
                    r.finished_at = Some(Utc::now());
                    r.last_error = None;
                    r.last_error_kind = None;
                });
                return;
            }
            Err(ConductorError::Cancelled) => {
                settle_cancelled(&ctx, &records, &spec.name, attempt);
                return;
            }
            Err(e) => {
                let message = e.to_string();
                let retry = e.is_retryable() && attempt < max_attempts;
                update_record(&records, &spec.name, |r| {
                    r.last_error = Some(message.clone());
                    r.last_error_kind = Some(e.kind());
                    if !retry {
                        r.status = AgentStatus::Failed;
                        r.finished_at = Some(Utc::now());
                    }
                });
                if !retry {
                    error!(agent = %spec.name, attempts = attempt, error = %message, "agent failed");
                    return;
                }

                let delay = ctx.config().backoff_for(attempt + 1);
                info!(
                    agent = %spec.name,
                    next_attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying agent after backoff"
                );
                previous_error = Some(message);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        settle_cancelled(&ctx, &records, &spec.name, attempt);
                        return;
                    }
                }
            }
        }
    }
}

fn settle_cancelled(ctx: &RunContext, records: &Records, name: &str, attempt: u32) {
    update_record(records, name, |r| {
        r.status = AgentStatus::Cancelled;
        r.finished_at = Some(Utc::now());
    });
    ctx.locks().release_all(name);
    ctx.emit(
        EventType::AgentCancelled,
        name,
        json!({"started": true, "attempt": attempt}),
    );
    info!(agent = name, attempt, "agent cancelled");
}
