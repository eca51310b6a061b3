//! Data model for build sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Tasks and agents ─────────────────────────────────────────────────

/// Execution status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    /// Check if the task will not run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A unit of work assigned to one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ids of tasks that must finish before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: &str, name: &str, dependencies: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            dependencies,
            agent_name: String::new(),
            acceptance_criteria: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Assign the task to an agent.
    pub fn with_agent(mut self, agent_name: &str) -> Self {
        self.agent_name = agent_name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Role an agent plays in the team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    #[default]
    Builder,
    Tester,
    Reviewer,
    Custom,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Builder => write!(f, "builder"),
            AgentRole::Tester => write!(f, "tester"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::Custom => write!(f, "custom"),
        }
    }
}

/// Observability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Done,
    Error,
}

/// An LLM-driven persona that executes tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub persona: String,
    /// Workspace-relative paths the agent may write
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    /// Workspace-relative paths the agent must not touch
    #[serde(default)]
    pub restricted_paths: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn new(name: &str, role: AgentRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            persona: String::new(),
            allowed_paths: Vec::new(),
            restricted_paths: Vec::new(),
            status: AgentStatus::Idle,
        }
    }
}

// ── Spec ─────────────────────────────────────────────────────────────

/// Declarative description of the nugget to build.
///
/// Only the sections the engine reads are typed; everything else is kept
/// verbatim in `extra` for the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default)]
    pub project: ProjectSpec,
    #[serde(default)]
    pub workflow: WorkflowSpec,
    #[serde(default)]
    pub deployment: DeploymentSpec,
    /// Deploy targets for multi-device builds
    #[serde(default)]
    pub devices: Vec<DeployUnit>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BuildSpec {
    /// Rules that fire on the given trigger.
    pub fn rules_for(&self, trigger: RuleTrigger) -> impl Iterator<Item = &RuleSpec> {
        self.rules.iter().filter(move |r| r.trigger == trigger)
    }

    /// Whether the spec asks for any deployment beyond the preview.
    pub fn wants_deploy(&self) -> bool {
        !self.devices.is_empty()
            || matches!(self.deployment.target, DeployTarget::Esp32 | DeployTarget::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub goal: String,
    #[serde(rename = "type", default = "default_project_type")]
    pub kind: String,
}

fn default_project_type() -> String {
    "software".to_string()
}

impl Default for ProjectSpec {
    fn default() -> Self {
        Self {
            goal: String::new(),
            kind: default_project_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Free-form gate descriptions; any entry enables the mid-build gate
    #[serde(default)]
    pub human_gates: Vec<String>,
    /// Pause for a human review between executing and testing
    #[serde(default)]
    pub review_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    #[default]
    Preview,
    Web,
    Esp32,
    Both,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub target: DeployTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTrigger {
    Always,
    OnTestFail,
    BeforeDeploy,
    #[serde(other)]
    Other,
}

/// A user-authored rule injected into prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub prompt: String,
    pub trigger: RuleTrigger,
}

/// A user-authored skill; `agent` category skills reach every agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub category: String,
}

// ── Sessions ─────────────────────────────────────────────────────────

/// Lifecycle state of a build session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Planning,
    Executing,
    Reviewing,
    Testing,
    Deploying,
    Done,
}

impl SessionState {
    /// `Done` is the only terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Planning => "planning",
            SessionState::Executing => "executing",
            SessionState::Reviewing => "reviewing",
            SessionState::Testing => "testing",
            SessionState::Deploying => "deploying",
            SessionState::Done => "done",
        };
        f.write_str(s)
    }
}

/// One build lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSession {
    pub id: String,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub spec: Option<BuildSpec>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

impl BuildSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.name == name)
    }

    /// Count tasks with the given status.
    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

// ── Feedback loops ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Passed,
    Failed,
}

/// One attempt at a task. Only the last record of a loop may be in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_passing: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_total: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn is_resolved(&self) -> bool {
        self.status != AttemptStatus::InProgress
    }

    /// Fraction of passing tests; falls back to 1 or 0 when counts are absent.
    pub fn pass_ratio(&self) -> f64 {
        match (self.tests_passing, self.tests_total) {
            (Some(passing), Some(total)) if total > 0 => f64::from(passing) / f64::from(total),
            _ => {
                if self.status == AttemptStatus::Passed {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Step within a correction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStep {
    Diagnosing,
    Fixing,
    Retesting,
}

/// Direction successive attempts are heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stalled,
    Diverging,
}

/// Attempt history for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLoop {
    pub task_id: String,
    pub task_name: String,
    pub attempts: Vec<AttemptRecord>,
    pub converged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<CorrectionStep>,
    pub max_attempts: u32,
}

// ── Deployment ───────────────────────────────────────────────────────

/// How a deploy unit reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployMethod {
    /// Physical board; requires a human to connect it before flashing
    Flash,
    Cloud,
    #[default]
    Local,
}

/// Capabilities a plugin produces and consumes, as `name:type` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployManifest {
    #[serde(default)]
    pub method: DeployMethod,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// One device or service target of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployUnit {
    pub plugin_id: String,
    pub instance_id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Inline manifest; when absent the plugin's registered manifest applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_manifest: Option<DeployManifest>,
}

impl DeployUnit {
    pub fn new(plugin_id: &str, instance_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            instance_id: instance_id.to_string(),
            fields: Map::new(),
            deploy_manifest: None,
        }
    }

    pub fn with_manifest(mut self, manifest: DeployManifest) -> Self {
        self.deploy_manifest = Some(manifest);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(status: AttemptStatus, passing: Option<u32>, total: Option<u32>) -> AttemptRecord {
        AttemptRecord {
            attempt_number: 0,
            status,
            failure_reason: None,
            tests_passing: passing,
            tests_total: total,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_pass_ratio_uses_test_counts() {
        let a = attempt(AttemptStatus::Failed, Some(1), Some(4));
        assert_eq!(a.pass_ratio(), 0.25);
    }

    #[test]
    fn test_pass_ratio_defaults_without_counts() {
        assert_eq!(attempt(AttemptStatus::Passed, None, None).pass_ratio(), 1.0);
        assert_eq!(attempt(AttemptStatus::Failed, None, None).pass_ratio(), 0.0);
        assert_eq!(attempt(AttemptStatus::Failed, Some(0), Some(0)).pass_ratio(), 0.0);
    }

    #[test]
    fn test_spec_parses_with_defaults() {
        let spec: BuildSpec = serde_json::from_str(r#"{"project": {"goal": "Blink"}}"#).unwrap();
        assert_eq!(spec.project.goal, "Blink");
        assert_eq!(spec.project.kind, "software");
        assert_eq!(spec.deployment.target, DeployTarget::Preview);
        assert!(!spec.wants_deploy());
    }

    #[test]
    fn test_spec_keeps_unknown_sections() {
        let spec: BuildSpec =
            serde_json::from_str(r#"{"style": {"colors": "blue"}, "deployment": {"target": "esp32"}}"#)
                .unwrap();
        assert!(spec.extra.contains_key("style"));
        assert!(spec.wants_deploy());
    }

    #[test]
    fn test_unknown_rule_trigger_maps_to_other() {
        let rule: RuleSpec =
            serde_json::from_str(r#"{"name": "r", "prompt": "p", "trigger": "someday"}"#).unwrap();
        assert_eq!(rule.trigger, RuleTrigger::Other);
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Done.is_terminal());
        assert!(!SessionState::Deploying.is_terminal());
        assert_eq!(SessionState::Reviewing.to_string(), "reviewing");
    }
}

/// A commit recorded after a task completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub message: String,
    pub agent_name: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// Paths touched relative to the parent commit
    pub files_changed: Vec<String>,
}
