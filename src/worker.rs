//! Boundary to the agent that executes a task's prompt.
//!
//! The engine treats the worker as opaque: it hands over a request, and only
//! `success` and `summary` of the result influence retry decisions.

use crate::errors::BuildResult;
use crate::events::EventSink;
use crate::gates::QuestionRegistry;
use async_trait::async_trait;
use nugget_common::BuildEvent;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a worker needs to run one task attempt.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub task_id: String,
    pub agent_name: String,
    pub prompt: String,
    pub system_prompt: String,
    pub working_dir: PathBuf,
    /// Budget the orchestrator enforces around the call
    pub timeout: Duration,
    pub output: OutputSink,
    pub interaction: Interaction,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub success: bool,
    pub summary: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ExecuteResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.cost_usd = cost_usd;
        self
    }
}

/// Executes one task attempt.
///
/// Implementations should stop promptly once `cancel` fires; the orchestrator
/// also drops the call at that point.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn execute(
        &self,
        request: ExecuteRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<ExecuteResult>;
}

/// Relays worker output as `agent_output` events.
#[derive(Debug, Clone)]
pub struct OutputSink {
    task_id: String,
    agent_name: String,
    events: EventSink,
}

impl OutputSink {
    pub fn new(task_id: &str, agent_name: &str, events: EventSink) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_name: agent_name.to_string(),
            events,
        }
    }

    pub fn send(&self, content: impl Into<String>) {
        self.events.emit(BuildEvent::AgentOutput {
            task_id: self.task_id.clone(),
            agent_name: self.agent_name.clone(),
            content: content.into(),
        });
    }
}

/// Lets a worker ask the user a question mid-task.
#[derive(Debug, Clone)]
pub struct Interaction {
    task_id: String,
    events: EventSink,
    questions: QuestionRegistry,
    cancel: CancellationToken,
}

impl Interaction {
    pub fn new(
        task_id: &str,
        events: EventSink,
        questions: QuestionRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            events,
            questions,
            cancel,
        }
    }

    /// Emit `user_question` and wait for the answers.
    pub async fn ask(&self, questions: Value) -> BuildResult<Value> {
        let waiter = self.questions.open(&self.task_id);
        debug!(task_id = %self.task_id, "Waiting for user answer");
        self.events.emit(BuildEvent::UserQuestion {
            task_id: self.task_id.clone(),
            questions,
        });
        waiter.wait(&self.cancel).await
    }
}

/// Worker that succeeds immediately. Used by `nugget simulate`.
#[derive(Debug, Default, Clone)]
pub struct DryRunWorker;

#[async_trait]
impl TaskWorker for DryRunWorker {
    async fn execute(
        &self,
        request: ExecuteRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ExecuteResult> {
        request
            .output
            .send(format!("Dry run: would execute {}", request.task_id));
        Ok(ExecuteResult::success(format!(
            "Dry run of {} completed.",
            request.task_id
        )))
    }
}
