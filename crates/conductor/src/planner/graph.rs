use std::collections::{BTreeMap, BTreeSet};

use crate::scheduler::AgentSpec;

/// Agent dependency graph
///
/// Ordered maps keep traversal deterministic, so the same declarations always
/// produce the same cycle path and fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Agent -> its prerequisites
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Agent -> agents that depend on it
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(agents: &[AgentSpec]) -> Self {
        let mut graph = Self::new();
        for agent in agents {
            graph.add_agent(&agent.name);
            for dep in &agent.dependencies {
                graph.add_dependency(&agent.name, dep);
            }
        }
        graph
    }

    pub fn add_agent(&mut self, name: impl Into<String>) {
        self.dependencies.entry(name.into()).or_default();
    }

    /// `agent` depends on `dependency`
    pub fn add_dependency(&mut self, agent: impl Into<String>, dependency: impl Into<String>) {
        let agent = agent.into();
        let dependency = dependency.into();

        self.dependents
            .entry(dependency.clone())
            .or_default()
            .insert(agent.clone());
        self.dependencies.entry(agent).or_default().insert(dependency);
    }

    pub fn dependencies(&self, agent: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(agent)
    }

    /// Direct dependents
    pub fn dependents(&self, agent: &str) -> BTreeSet<String> {
        self.dependents.get(agent).cloned().unwrap_or_default()
    }

    /// Every agent reachable through dependent edges
    pub fn transitive_dependents(&self, agent: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![agent];
        while let Some(current) = stack.pop() {
            if let Some(next) = self.dependents.get(current) {
                for dependent in next {
                    if seen.insert(dependent.clone()) {
                        stack.push(dependent);
                    }
                }
            }
        }
        seen
    }

    /// Declared agents in name order
    pub fn agents(&self) -> impl Iterator<Item = &String> {
        self.dependencies.keys()
    }

    pub fn contains(&self, agent: &str) -> bool {
        self.dependencies.contains_key(agent)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// First (agent, dependency) pair naming an undeclared agent
    pub fn unknown_dependency(&self) -> Option<(String, String)> {
        self.dependencies.iter().find_map(|(agent, deps)| {
            deps.iter()
                .find(|dep| !self.contains(dep))
                .map(|dep| (agent.clone(), dep.clone()))
        })
    }

    /// Find a cycle with DFS; the returned path starts and ends with the same agent
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut on_stack = BTreeSet::new();
        let mut path = Vec::new();

        for agent in self.dependencies.keys() {
            if !visited.contains(agent.as_str()) {
                if let Some(cycle) = self.dfs_cycle(agent, &mut visited, &mut on_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        agent: &'a str,
        visited: &mut BTreeSet<&'a str>,
        on_stack: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(agent);
        on_stack.insert(agent);
        path.push(agent);

        if let Some(deps) = self.dependencies.get(agent) {
            for dep in deps {
                let dep = dep.as_str();
                if on_stack.contains(dep) {
                    let start = path.iter().position(|p| *p == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|p| p.to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, on_stack, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_stack.remove(agent);
        None
    }
}
