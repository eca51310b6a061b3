//! Outbound event stream.
//!
//! Every event serializes as a flat JSON object tagged by `type`, which is
//! the shape transports forward to clients unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Agent, AttemptRecord, CommitInfo, CorrectionStep, Task, Trend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildEvent {
    // Planning
    PlanningStarted,
    PlanReady {
        tasks: Vec<Task>,
        agents: Vec<Agent>,
        explanation: String,
    },

    // Task lifecycle
    TaskStarted {
        task_id: String,
        task_name: String,
        agent_name: String,
    },
    TaskCompleted {
        task_id: String,
        summary: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
        retry_count: u32,
    },
    AgentOutput {
        task_id: String,
        agent_name: String,
        content: String,
    },
    AgentMessage {
        from: String,
        to: String,
        content: String,
    },
    TokenUsage {
        agent_name: String,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    },
    UserQuestion {
        task_id: String,
        questions: Value,
    },
    CommitCreated {
        /// Abbreviated commit id
        sha: String,
        message: String,
        agent_name: String,
        task_id: String,
        timestamp: DateTime<Utc>,
        files_changed: Vec<String>,
    },

    // Gates
    HumanGate {
        gate_id: String,
        task_id: String,
        question: String,
        context: String,
    },

    // Testing
    TestResult {
        test_name: String,
        passed: bool,
        details: String,
    },
    CoverageUpdate {
        percentage: f64,
        details: Value,
    },

    // Feedback loops
    CorrectionCycleStarted {
        task_id: String,
        attempt_number: u32,
        failure_reason: String,
        max_attempts: u32,
    },
    CorrectionCycleProgress {
        task_id: String,
        attempt_number: u32,
        step: CorrectionStep,
    },
    ConvergenceUpdate {
        task_id: String,
        attempts_so_far: u32,
        tests_passing: Option<u32>,
        tests_total: Option<u32>,
        trend: Trend,
        converged: bool,
        attempts: Vec<AttemptRecord>,
    },
    MeetingInvite {
        #[serde(rename = "meetingTypeId")]
        meeting_type_id: String,
        #[serde(rename = "meetingId")]
        meeting_id: String,
        #[serde(rename = "agentName")]
        agent_name: String,
        title: String,
        description: String,
    },

    // Deployment
    DeployStarted {
        target: String,
    },
    DeployProgress {
        step: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    DeployComplete {
        target: String,
    },
    FlashPrompt {
        device_role: String,
        message: String,
    },
    FlashComplete {
        device_role: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    // Session
    SessionComplete {
        summary: String,
    },
    Error {
        message: String,
        recoverable: bool,
    },
}

impl BuildEvent {
    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildEvent::PlanningStarted => "planning_started",
            BuildEvent::PlanReady { .. } => "plan_ready",
            BuildEvent::TaskStarted { .. } => "task_started",
            BuildEvent::TaskCompleted { .. } => "task_completed",
            BuildEvent::TaskFailed { .. } => "task_failed",
            BuildEvent::AgentOutput { .. } => "agent_output",
            BuildEvent::AgentMessage { .. } => "agent_message",
            BuildEvent::TokenUsage { .. } => "token_usage",
            BuildEvent::UserQuestion { .. } => "user_question",
            BuildEvent::CommitCreated { .. } => "commit_created",
            BuildEvent::HumanGate { .. } => "human_gate",
            BuildEvent::TestResult { .. } => "test_result",
            BuildEvent::CoverageUpdate { .. } => "coverage_update",
            BuildEvent::CorrectionCycleStarted { .. } => "correction_cycle_started",
            BuildEvent::CorrectionCycleProgress { .. } => "correction_cycle_progress",
            BuildEvent::ConvergenceUpdate { .. } => "convergence_update",
            BuildEvent::MeetingInvite { .. } => "meeting_invite",
            BuildEvent::DeployStarted { .. } => "deploy_started",
            BuildEvent::DeployProgress { .. } => "deploy_progress",
            BuildEvent::DeployComplete { .. } => "deploy_complete",
            BuildEvent::FlashPrompt { .. } => "flash_prompt",
            BuildEvent::FlashComplete { .. } => "flash_complete",
            BuildEvent::SessionComplete { .. } => "session_complete",
            BuildEvent::Error { .. } => "error",
        }
    }

    /// Announce a commit, carrying its abbreviated id.
    pub fn commit_created(commit: &CommitInfo) -> Self {
        BuildEvent::CommitCreated {
            sha: commit.short_sha.clone(),
            message: commit.message.clone(),
            agent_name: commit.agent_name.clone(),
            task_id: commit.task_id.clone(),
            timestamp: commit.timestamp,
            files_changed: commit.files_changed.clone(),
        }
    }

    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        BuildEvent::Error {
            message: message.into(),
            recoverable,
        }
    }

    /// Task id the event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            BuildEvent::TaskStarted { task_id, .. }
            | BuildEvent::TaskCompleted { task_id, .. }
            | BuildEvent::TaskFailed { task_id, .. }
            | BuildEvent::AgentOutput { task_id, .. }
            | BuildEvent::UserQuestion { task_id, .. }
            | BuildEvent::CommitCreated { task_id, .. }
            | BuildEvent::HumanGate { task_id, .. }
            | BuildEvent::CorrectionCycleStarted { task_id, .. }
            | BuildEvent::CorrectionCycleProgress { task_id, .. }
            | BuildEvent::ConvergenceUpdate { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
