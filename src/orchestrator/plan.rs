//! Plans produced by the planner and their validation.

use crate::config::LimitsConfig;
use crate::dag::TaskDag;
use crate::errors::{BuildError, BuildResult};
use anyhow::Context;
use async_trait::async_trait;
use nugget_common::{Agent, BuildSpec, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const DEFAULT_ALLOWED_PATHS: &[&str] = &["src/", "tests/"];
pub const DEFAULT_RESTRICTED_PATHS: &[&str] = &[".nugget/"];

/// Task breakdown for one spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub plan_explanation: String,
}

impl Plan {
    /// Read a plan from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse plan YAML: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))
        }
    }

    /// Check references, sanitize paths, cap text, and build the task graph.
    pub fn validate(self, limits: &LimitsConfig) -> BuildResult<ValidatedPlan> {
        if self.tasks.is_empty() {
            return Err(BuildError::Validation("plan has no tasks".into()));
        }

        let mut warnings = Vec::new();
        let mut agents = Vec::with_capacity(self.agents.len());
        let mut agent_names = HashSet::new();
        for mut agent in self.agents {
            if agent.name.trim().is_empty() {
                return Err(BuildError::Validation("agent with empty name".into()));
            }
            if !agent_names.insert(agent.name.clone()) {
                return Err(BuildError::Validation(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            agent.persona = truncate_chars(&agent.persona, limits.max_persona_len);
            agent.allowed_paths = sanitize_paths(&agent.name, agent.allowed_paths, &mut warnings);
            agent.restricted_paths =
                sanitize_paths(&agent.name, agent.restricted_paths, &mut warnings);
            if agent.allowed_paths.is_empty() {
                agent.allowed_paths = DEFAULT_ALLOWED_PATHS.iter().map(|p| p.to_string()).collect();
            }
            if agent.restricted_paths.is_empty() {
                agent.restricted_paths =
                    DEFAULT_RESTRICTED_PATHS.iter().map(|p| p.to_string()).collect();
            }
            agents.push(agent);
        }

        let task_ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(BuildError::Validation("task with empty id".into()));
            }
            if !is_safe_task_id(&task.id) {
                return Err(BuildError::Validation(format!(
                    "task id '{}' must not contain '/', '\\' or '..'",
                    task.id
                )));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(BuildError::Validation(format!("duplicate task id '{}'", task.id)));
            }
            if let Some(dep) = task.dependencies.iter().find(|d| !task_ids.contains(d.as_str())) {
                return Err(BuildError::Validation(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                )));
            }
            if !agent_names.contains(&task.agent_name) {
                return Err(BuildError::Validation(format!(
                    "task '{}' is assigned to unknown agent '{}'",
                    task.id, task.agent_name
                )));
            }
        }

        let mut dag = TaskDag::new();
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for mut task in self.tasks {
            task.name = truncate_chars(&task.name, limits.max_name_len);
            task.description = truncate_chars(&task.description, limits.max_description_len);
            if task.acceptance_criteria.len() > limits.max_criteria {
                warnings.push(format!(
                    "task '{}': keeping the first {} of {} acceptance criteria",
                    task.id,
                    limits.max_criteria,
                    task.acceptance_criteria.len()
                ));
                task.acceptance_criteria.truncate(limits.max_criteria);
            }
            task.acceptance_criteria = task
                .acceptance_criteria
                .iter()
                .map(|c| truncate_chars(c, limits.max_criterion_len))
                .collect();
            task.status = TaskStatus::Pending;
            dag.add_task(&task.id, task.dependencies.iter().cloned());
            tasks.push(task);
        }
        dag.get_order()?;

        for warning in &warnings {
            warn!("{}", warning);
        }

        Ok(ValidatedPlan {
            tasks,
            agents,
            explanation: self.plan_explanation,
            warnings,
            dag,
        })
    }
}

/// A plan whose references resolve and whose graph is acyclic.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub tasks: Vec<Task>,
    pub agents: Vec<Agent>,
    pub explanation: String,
    /// Paths dropped and lists trimmed during validation
    pub warnings: Vec<String>,
    pub dag: TaskDag,
}

/// Turns a spec into a plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, spec: &BuildSpec, cancel: CancellationToken) -> anyhow::Result<Plan>;
}

/// Planner that always returns the same plan.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    plan: Plan,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _spec: &BuildSpec, _cancel: CancellationToken) -> anyhow::Result<Plan> {
        Ok(self.plan.clone())
    }
}

/// Truncate to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Absolute paths (`/x`, `\x`, `C:\x`, `C:/x`) and anything with a `..` segment.
pub fn is_unsafe_path(path: &str) -> bool {
    let path = path.trim();
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }
    path.split(['/', '\\']).any(|segment| segment == "..")
}

/// Task ids name files in the session workspace, so they stay one path segment.
pub fn is_safe_task_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(['/', '\\']) && !id.contains("..")
}

fn sanitize_paths(agent: &str, paths: Vec<String>, warnings: &mut Vec<String>) -> Vec<String> {
    paths
        .into_iter()
        .filter(|p| {
            let unsafe_path = is_unsafe_path(p);
            if unsafe_path {
                warnings.push(format!("agent '{}': dropped unsafe path '{}'", agent, p));
            }
            !unsafe_path
        })
        .collect()
}
