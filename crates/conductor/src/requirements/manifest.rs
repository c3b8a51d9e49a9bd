//! Requirements manifest
//!
//! YAML document declaring the project, its core requirements and features.
//! It is read once when the plan is built and seeds the tracker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{ConductorError, ConductorResult};

/// Requirement priority, mapped to a default weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn default_weight(&self) -> f64 {
        match self {
            Priority::Critical => 4.0,
            Priority::High => 3.0,
            Priority::Medium => 2.0,
            Priority::Low => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreRequirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Overrides the priority-derived weight
    #[serde(default)]
    pub weight: Option<f64>,
    /// Agents allowed to report progress
    #[serde(default)]
    pub owners: Vec<String>,
}

impl CoreRequirement {
    /// Explicit weight, else the priority weight, else 1
    pub fn effective_weight(&self) -> f64 {
        self.weight
            .or_else(|| self.priority.map(|p| p.default_weight()))
            .unwrap_or(1.0)
    }
}

/// A feature entry: either a bare name or a detailed record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Feature {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: Option<Priority>,
    },
}

impl Feature {
    pub fn name(&self) -> &str {
        match self {
            Feature::Name(name) => name,
            Feature::Detailed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RequirementsManifest {
    pub project: ProjectInfo,
    #[serde(default)]
    pub core_requirements: Vec<CoreRequirement>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub technical_requirements: Option<Value>,
    #[serde(default)]
    pub success_metrics: Option<Value>,
}

impl RequirementsManifest {
    pub fn from_yaml_str(yaml: &str) -> ConductorResult<Self> {
        let manifest: RequirementsManifest = serde_yaml::from_str(yaml).map_err(|e| {
            ConductorError::Configuration(format!("malformed requirements manifest: {}", e))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConductorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Configuration(format!(
                "cannot read requirements manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Ids must be present and unique; weights finite and non-negative
    pub fn validate(&self) -> ConductorResult<()> {
        if self.project.name.trim().is_empty() {
            return Err(ConductorError::Configuration(
                "manifest project.name is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for req in &self.core_requirements {
            if req.id.trim().is_empty() {
                return Err(ConductorError::Configuration(
                    "requirement with empty id".to_string(),
                ));
            }
            if !seen.insert(req.id.as_str()) {
                return Err(ConductorError::Configuration(format!(
                    "duplicate requirement id '{}'",
                    req.id
                )));
            }
            let weight = req.effective_weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConductorError::Configuration(format!(
                    "requirement '{}' has invalid weight {}",
                    req.id, weight
                )));
            }
        }
        Ok(())
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
project:
  name: todo-app
  description: A small todo application
core_requirements:
  - id: REQ-001
    description: Users can create tasks
    priority: high
    acceptance_criteria:
      - POST /tasks returns 201
    owners: [build]
  - id: REQ-002
    description: Tasks persist across restarts
    weight: 5
features:
  - task list
  - name: reminders
    priority: low
success_metrics:
  coverage: 80
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = RequirementsManifest::from_yaml_str(MANIFEST).unwrap();

        assert_eq!(manifest.project.name, "todo-app");
        assert_eq!(manifest.core_requirements.len(), 2);
        assert_eq!(manifest.core_requirements[0].priority, Some(Priority::High));
        assert_eq!(manifest.core_requirements[0].effective_weight(), 3.0);
        assert_eq!(manifest.core_requirements[1].effective_weight(), 5.0);
        assert_eq!(manifest.feature_names(), vec!["task list", "reminders"]);
        assert!(manifest.success_metrics.is_some());
        assert!(manifest.technical_requirements.is_none());
    }

    #[test]
    fn test_weight_defaults_to_one_without_priority() {
        let req = CoreRequirement {
            id: "R".to_string(),
            description: "d".to_string(),
            priority: None,
            acceptance_criteria: vec![],
            weight: None,
            owners: vec![],
        };
        assert_eq!(req.effective_weight(), 1.0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
project: { name: x }
core_requirements:
  - { id: A, description: one }
  - { id: A, description: two }
"#;
        let err = RequirementsManifest::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }

    #[test]
    fn test_malformed_manifest_is_configuration_error() {
        let err = RequirementsManifest::from_yaml_str("core_requirements: 12").unwrap_err();
        assert!(matches!(err, ConductorError::Configuration(_)));
    }
}
