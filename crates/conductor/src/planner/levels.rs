//! Dependency Planner
//!
//! Turns agent declarations into execution levels. Level k holds every agent
//! whose prerequisites all sit in levels < k; within a level agents are
//! ordered by descending priority, then by name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use super::graph::DependencyGraph;
use crate::error::{ConductorError, ConductorResult, DependencyViolation};
use crate::scheduler::AgentSpec;

/// A set of agents with no edges among themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLevel {
    pub index: usize,
    /// Agent names in launch order
    pub agents: Vec<String>,
}

impl ExecutionLevel {
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a == agent)
    }
}

/// Immutable leveling of a validated graph
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    levels: Vec<ExecutionLevel>,
    agents: BTreeMap<String, AgentSpec>,
    graph: DependencyGraph,
    fingerprint: String,
}

impl ExecutionPlan {
    pub fn levels(&self) -> &[ExecutionLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Index of the level containing `agent`
    pub fn level_of(&self, agent: &str) -> Option<usize> {
        self.levels
            .iter()
            .find(|level| level.contains(agent))
            .map(|level| level.index)
    }

    /// Every agent that directly or transitively depends on `agent`
    pub fn dependents_of(&self, agent: &str) -> BTreeSet<String> {
        self.graph.transitive_dependents(agent)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.get(name)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Stable hash of names, edges and priorities
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Builds execution plans
pub struct Planner;

impl Planner {
    /// Validate the declarations and compute their levels
    pub fn plan(agents: &[AgentSpec]) -> ConductorResult<ExecutionPlan> {
        let mut seen = HashSet::new();
        for agent in agents {
            if agent.name.trim().is_empty() {
                return Err(ConductorError::Configuration(
                    "agent with empty name".to_string(),
                ));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConductorError::Configuration(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
        }

        let graph = DependencyGraph::from_specs(agents);

        if let Some((agent, dependency)) = graph.unknown_dependency() {
            return Err(DependencyViolation::UnknownDependency { agent, dependency }.into());
        }
        if let Some(cycle) = graph.detect_cycle() {
            return Err(DependencyViolation::Cycle(cycle).into());
        }

        let specs: BTreeMap<String, AgentSpec> = agents
            .iter()
            .map(|a| (a.name.clone(), a.clone()))
            .collect();
        let levels = compute_levels(&graph, &specs)?;
        let fingerprint = fingerprint(&specs);

        info!(
            agents = specs.len(),
            levels = levels.len(),
            "execution plan built"
        );
        for level in &levels {
            debug!(level = level.index, agents = ?level.agents, "planned level");
        }

        Ok(ExecutionPlan {
            levels,
            agents: specs,
            graph,
            fingerprint,
        })
    }

    /// Recompute the plan after the graph was edited
    pub fn replan(previous: &ExecutionPlan, agents: &[AgentSpec]) -> ConductorResult<ExecutionPlan> {
        let plan = Self::plan(agents)?;
        if plan.fingerprint != previous.fingerprint {
            info!(
                from = %previous.fingerprint,
                to = %plan.fingerprint,
                "dependency graph changed"
            );
        }
        Ok(plan)
    }
}

fn compute_levels(
    graph: &DependencyGraph,
    specs: &BTreeMap<String, AgentSpec>,
) -> ConductorResult<Vec<ExecutionLevel>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: BTreeSet<&str> = specs.keys().map(|k| k.as_str()).collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|name| {
                graph
                    .dependencies(name)
                    .map(|deps| deps.iter().all(|d| placed.contains(d.as_str())))
                    .unwrap_or(true)
            })
            .collect();

        if ready.is_empty() {
            return Err(DependencyViolation::Unresolvable(
                remaining.iter().map(|s| s.to_string()).collect(),
            )
            .into());
        }

        ready.sort_by(|a, b| {
            let pa = specs.get(*a).map(|s| s.priority).unwrap_or(0);
            let pb = specs.get(*b).map(|s| s.priority).unwrap_or(0);
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });

        for name in &ready {
            remaining.remove(*name);
            placed.insert(*name);
        }
        levels.push(ExecutionLevel {
            index: levels.len(),
            agents: ready.into_iter().map(String::from).collect(),
        });
    }

    Ok(levels)
}

fn fingerprint(specs: &BTreeMap<String, AgentSpec>) -> String {
    let mut hasher = Sha256::new();
    for (name, spec) in specs {
        hasher.update(name.as_bytes());
        hasher.update(b"|");
        hasher.update(spec.priority.to_string().as_bytes());
        for dep in &spec.dependencies {
            hasher.update(b"<");
            hasher.update(dep.as_bytes());
        }
        hasher.update(b"\n");
    }
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(16);
    digest
}
