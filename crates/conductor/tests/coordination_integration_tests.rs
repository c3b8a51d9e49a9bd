//! End-to-end coordination tests
//!
//! Drives the public API the way an embedding application does: YAML
//! configuration and manifest, a producer, a monitor tailing the event file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

use conductor::events::{EventCursor, EventType};
use conductor::requirements::RequirementsManifest;
use conductor::runner::{AgentOperation, AgentProducer, OperationStream, ProducerContext};
use conductor::{AgentSpec, AgentStatus, RunConfig, RunContext, Scheduler};

/// Each agent writes its own file, optionally a shared file, reports its
/// requirements and finishes
#[derive(Default)]
struct WorkspaceProducer {
    shared_file: Option<String>,
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, u32>>,
}

impl WorkspaceProducer {
    fn calls(&self, agent: &str) -> u32 {
        self.calls.lock().get(agent).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AgentProducer for WorkspaceProducer {
    async fn produce(
        &self,
        agent: &AgentSpec,
        _context: &ProducerContext,
    ) -> anyhow::Result<OperationStream> {
        *self.calls.lock().entry(agent.name.clone()).or_default() += 1;

        if self.failing.contains(&agent.name) {
            anyhow::bail!("{} cannot start", agent.name);
        }

        let mut ops: Vec<Value> = vec![AgentOperation::write_file(
            format!("{}/README.md", agent.name),
            format!("# {}\n", agent.name),
        )];
        if let Some(shared) = &self.shared_file {
            for i in 0..5 {
                ops.push(AgentOperation::write_file(
                    shared.clone(),
                    json!({"writer": agent.name, "round": i}).to_string(),
                ));
            }
        }
        for requirement in &agent.requirements {
            ops.push(AgentOperation::report_progress(requirement.clone(), 100.0));
        }
        ops.push(AgentOperation::done(format!("{} finished", agent.name)));

        Ok(futures::stream::iter(ops)
            .then(|op| async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                Ok::<Value, anyhow::Error>(op)
            })
            .boxed())
    }
}

const MANIFEST: &str = r#"
project:
  name: todo-service
  version: "0.1.0"
core_requirements:
  - id: REQ-STORAGE
    description: Tasks are persisted
    priority: critical
    owners: [db]
  - id: REQ-API
    description: REST endpoints
    priority: high
  - id: REQ-DOCS
    description: Operator documentation
    priority: low
features:
  - task list
technical_requirements:
  language: rust
"#;

fn agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("architecture"),
        AgentSpec::new("db").with_dependency("architecture"),
        AgentSpec::new("api")
            .with_dependency("architecture")
            .with_requirement("REQ-API")
            .with_deliverable("api/README.md"),
        AgentSpec::new("docs")
            .with_dependencies(["db", "api"])
            .with_requirement("REQ-DOCS"),
    ]
}

fn load_context(dir: &TempDir) -> Arc<RunContext> {
    let config_path = dir.path().join("conductor.yaml");
    std::fs::write(
        &config_path,
        format!(
            "max_parallel: 2\nmax_retries: 2\nbackoff_base_ms: 5\nmax_backoff_ms: 20\nlock_retry_attempts: 50\nlock_retry_delay_ms: 2\noutput_root: {}\ncheckpoint_dir: {}\nevent_log_path: {}\n",
            dir.path().join("out").display(),
            dir.path().join("state").display(),
            dir.path().join("state/events.jsonl").display(),
        ),
    )
    .unwrap();
    let manifest_path = dir.path().join("requirements.yaml");
    std::fs::write(&manifest_path, MANIFEST).unwrap();

    let config = RunConfig::from_yaml_file(&config_path)
        .unwrap()
        .apply_env_from(|_| None)
        .unwrap();
    let manifest = RequirementsManifest::from_yaml_file(&manifest_path).unwrap();

    RunContext::with_env(config, |_| None)
        .unwrap()
        .with_manifest(&manifest)
        .into_shared()
}

#[tokio::test]
async fn manifest_driven_run_with_live_monitor() {
    let dir = TempDir::new().unwrap();
    let ctx = load_context(&dir);
    let event_path = ctx.events().path().to_path_buf();

    let monitor = tokio::spawn(async move {
        let mut cursor = EventCursor::new(event_path);
        let mut seen = Vec::new();
        loop {
            let batch = cursor.poll().unwrap();
            let finished = batch.iter().any(|e| e.event_type == EventType::RunComplete);
            seen.extend(batch);
            if finished {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let producer = Arc::new(WorkspaceProducer::default());
    let summary = Scheduler::new(ctx.clone(), producer.clone())
        .run(&agents())
        .await
        .unwrap();

    assert!(summary.all_completed(), "{}", summary);
    // REQ-STORAGE has no reporting agent, so only API (3) and DOCS (1) count
    let expected = (3.0 * 100.0 + 1.0 * 100.0) / (4.0 + 3.0 + 1.0);
    assert!((summary.overall_completion - expected).abs() < 1e-9);

    let seen = tokio::time::timeout(Duration::from_secs(5), monitor)
        .await
        .unwrap()
        .unwrap();
    let on_disk = ctx.events().read_all().unwrap();
    assert_eq!(seen, on_disk);

    let progress: Vec<&str> = on_disk
        .iter()
        .filter(|e| e.event_type == EventType::RequirementProgress)
        .map(|e| e.data["requirement"].as_str().unwrap())
        .collect();
    assert_eq!(progress.len(), 2);
    assert!(progress.contains(&"REQ-API"));
}

#[tokio::test]
async fn agents_sharing_a_file_are_serialized_by_locks() {
    let dir = TempDir::new().unwrap();
    let ctx = load_context(&dir);
    let producer = Arc::new(WorkspaceProducer {
        shared_file: Some("shared/config.json".to_string()),
        ..Default::default()
    });

    let agents = vec![
        AgentSpec::new("alpha"),
        AgentSpec::new("beta"),
        AgentSpec::new("gamma"),
    ];
    let summary = Scheduler::new(ctx.clone(), producer)
        .run(&agents)
        .await
        .unwrap();

    assert!(summary.all_completed(), "{}", summary);
    let shared = std::fs::read_to_string(ctx.output_root().join("shared/config.json")).unwrap();
    let parsed: Value = serde_json::from_str(&shared).unwrap();
    assert_eq!(parsed["round"], 4);
    assert_eq!(summary.lock_stats.active_locks, 0);
}

#[tokio::test]
async fn producer_start_failure_blocks_dependents() {
    let dir = TempDir::new().unwrap();
    let ctx = load_context(&dir);
    let producer = Arc::new(WorkspaceProducer {
        failing: ["api".to_string()].into_iter().collect(),
        ..Default::default()
    });

    let summary = Scheduler::new(ctx, producer.clone())
        .run(&agents())
        .await
        .unwrap();

    assert_eq!(summary.status_of("api"), Some(AgentStatus::Failed));
    assert_eq!(summary.status_of("db"), Some(AgentStatus::Completed));
    assert_eq!(summary.status_of("docs"), Some(AgentStatus::Blocked));
    assert_eq!(producer.calls("api"), 2);
    assert_eq!(producer.calls("docs"), 0);
}

fn graph_with_failures() -> impl Strategy<Value = (Vec<AgentSpec>, HashSet<String>)> {
    (2usize..9).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n),
            prop::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(edges, fails)| {
                let name = |i: usize| format!("agent{}", i);
                let specs = (0..n)
                    .map(|i| {
                        let mut spec = AgentSpec::new(name(i));
                        if i > 0 {
                            for idx in &edges[i] {
                                spec = spec.with_dependency(name(idx.index(i)));
                            }
                        }
                        spec
                    })
                    .collect();
                let failing = (0..n).filter(|i| fails[*i]).map(name).collect();
                (specs, failing)
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// An agent is Blocked exactly when one of its dependencies did not
    /// complete, and Blocked agents are never started
    #[test]
    fn prop_blocked_iff_dependency_unfinished((specs, failing) in graph_with_failures()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            max_retries: 1,
            ..RunConfig::rooted_at(dir.path())
        };
        let ctx = RunContext::with_env(config, |_| None).unwrap().into_shared();
        let producer = Arc::new(WorkspaceProducer {
            failing: failing.clone(),
            ..Default::default()
        });

        let summary = runtime
            .block_on(Scheduler::new(ctx, producer.clone()).run(&specs))
            .unwrap();

        for spec in &specs {
            let status = summary.status_of(&spec.name).unwrap();
            let dependency_unfinished = spec
                .dependencies
                .iter()
                .any(|d| summary.status_of(d) != Some(AgentStatus::Completed));

            if dependency_unfinished {
                prop_assert_eq!(status, AgentStatus::Blocked);
                prop_assert_eq!(producer.calls(&spec.name), 0);
            } else if failing.contains(&spec.name) {
                prop_assert_eq!(status, AgentStatus::Failed);
            } else {
                prop_assert_eq!(status, AgentStatus::Completed);
            }
        }
    }
}
