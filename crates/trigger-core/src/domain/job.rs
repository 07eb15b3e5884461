//! The CI job a trigger is attached to.
//!
//! Jobs belong to the host CI system; the trigger only reads them.

use serde::{Deserialize, Serialize};

/// A declared job parameter and the value used when nothing overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub default_value: String,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: default_value.into(),
        }
    }
}

/// A CI job as seen by the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Full (folder-qualified) job name; keys the pull-request registry.
    pub full_name: String,
    /// GitHub project URL linked to the job. A job without one cannot be bound.
    #[serde(default)]
    pub github_project: Option<String>,
    #[serde(default)]
    pub parameter_definitions: Vec<ParameterDefinition>,
    /// Delay the scheduler applies before starting a queued build.
    #[serde(default)]
    pub quiet_period_secs: u64,
}

impl Job {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            github_project: None,
            parameter_definitions: Vec::new(),
            quiet_period_secs: 0,
        }
    }

    pub fn with_github_project(mut self, url: impl Into<String>) -> Self {
        self.github_project = Some(url.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, default_value: impl Into<String>) -> Self {
        self.parameter_definitions
            .push(ParameterDefinition::new(name, default_value));
        self
    }

    /// Whether the job is linked to a GitHub project.
    pub fn is_linked(&self) -> bool {
        self.github_project
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}
