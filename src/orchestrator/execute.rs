//! The executing phase: walk the task graph one ready task at a time.

use super::context::{build_system_prompt, build_task_prompt, project_context, retry_prompt};
use super::git::GitTracker;
use super::plan::truncate_chars;
use super::workspace::Workspace;
use super::Orchestrator;
use crate::dag::{ExecutionState, TaskDag};
use crate::errors::{BuildError, BuildResult};
use crate::worker::{ExecuteRequest, ExecuteResult, Interaction, OutputSink};
use nugget_common::{AgentStatus, BuildEvent, BuildSpec, SessionState, Task, TaskStatus};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIDPOINT_QUESTION: &str = "I've made some progress. Want to take a look before I continue?";
const HELP_QUESTION: &str = "We're having trouble with this part. Can you help us figure it out?";
const AGENT_MESSAGE_CHARS: usize = 500;

/// Result of all attempts at one task.
enum TaskOutcome {
    Succeeded { summary: String },
    Exhausted { error: String, retries: u32 },
}

impl Orchestrator {
    pub(super) async fn execute(
        &mut self,
        spec: &BuildSpec,
        workspace: &Workspace,
        git: Option<&GitTracker>,
        mut dag: TaskDag,
    ) -> BuildResult<ExecutionState> {
        self.session.update(|s| s.state = SessionState::Executing);

        let mut state = ExecutionState::new();
        let mut summaries: HashMap<String, String> = HashMap::new();
        let mut midpoint_pending = !spec.workflow.human_gates.is_empty();

        while state.resolved().len() < dag.len() {
            if self.shared.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }

            // Sequential dispatch: lowest insertion index first
            let Some(task_id) = dag.get_ready(state.resolved()).into_iter().next() else {
                error!("No ready tasks but the graph is not exhausted");
                self.events.emit(BuildEvent::error(
                    "Some tasks are blocked and cannot proceed.",
                    false,
                ));
                break;
            };

            let task = self.start_task(&task_id)?;
            let agent = self
                .session
                .snapshot()
                .agents
                .into_iter()
                .find(|a| a.name == task.agent_name);
            let system_prompt = build_system_prompt(agent.as_ref(), spec);
            let prompt = build_task_prompt(
                &task,
                &dag,
                &summaries,
                self.config.limits.max_summary_words,
            );

            match self.run_attempts(&task, &prompt, &system_prompt, spec, workspace).await? {
                TaskOutcome::Succeeded { summary } => {
                    let summary = workspace.read_comms_summary(&task.id).unwrap_or(summary);
                    state.mark_done(&task.id);
                    self.session.update(|s| {
                        if let Some(t) = s.task_mut(&task.id) {
                            t.status = TaskStatus::Done;
                        }
                        if let Some(a) = s.agent_mut(&task.agent_name) {
                            a.status = AgentStatus::Idle;
                        }
                    });

                    self.events.emit(BuildEvent::AgentMessage {
                        from: task.agent_name.clone(),
                        to: "team".into(),
                        content: truncate_chars(&summary, AGENT_MESSAGE_CHARS),
                    });
                    summaries.insert(task.id.clone(), summary.clone());
                    workspace.write_project_context(&project_context(
                        &summaries,
                        self.config.limits.max_summary_words,
                    ));
                    workspace.write_current_state(&self.session.snapshot());
                    if let Some(git) = git {
                        self.commit_task(git, &task);
                    }

                    info!(task_id = %task.id, "Task completed");
                    self.events.emit(BuildEvent::TaskCompleted {
                        task_id: task.id.clone(),
                        summary,
                    });

                    let total = self.session.snapshot().tasks.len();
                    if midpoint_pending && state.done_count() > 0 && state.done_count() == total / 2
                    {
                        midpoint_pending = false;
                        self.midpoint_gate(&task, &mut dag).await?;
                    }
                }
                TaskOutcome::Exhausted { error, retries } => {
                    state.mark_failed(&task.id);
                    self.session.update(|s| {
                        if let Some(t) = s.task_mut(&task.id) {
                            t.status = TaskStatus::Failed;
                        }
                        if let Some(a) = s.agent_mut(&task.agent_name) {
                            a.status = AgentStatus::Error;
                        }
                    });
                    workspace.write_current_state(&self.session.snapshot());

                    warn!(task_id = %task.id, retries, error = %error, "Task failed after retries");
                    self.events.emit(BuildEvent::TaskFailed {
                        task_id: task.id.clone(),
                        error: error.clone(),
                        retry_count: retries,
                    });
                    self.escalate_failure(&task, retries, &error, &mut dag).await?;
                }
            }
        }

        Ok(state)
    }

    fn start_task(&self, task_id: &str) -> BuildResult<Task> {
        let task = self
            .session
            .update(|s| {
                let task = s.task_mut(task_id)?;
                task.status = TaskStatus::Running;
                let task = task.clone();
                if let Some(agent) = s.agent_mut(&task.agent_name) {
                    agent.status = AgentStatus::Working;
                }
                Some(task)
            })
            .ok_or_else(|| BuildError::not_found("task", task_id))?;

        info!(task_id, agent = %task.agent_name, "Task started");
        self.events.emit(BuildEvent::TaskStarted {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            agent_name: task.agent_name.clone(),
        });
        Ok(task)
    }

    /// Dispatch a task until it succeeds or its retries run out.
    async fn run_attempts(
        &mut self,
        task: &Task,
        prompt: &str,
        system_prompt: &str,
        spec: &BuildSpec,
        workspace: &Workspace,
    ) -> BuildResult<TaskOutcome> {
        let max_retries = self.config.orchestrator.max_retries;
        let mut last_failure = String::new();

        for attempt in 0..=max_retries {
            let reason = (attempt > 0).then_some(last_failure.as_str());
            self.tracker
                .start_attempt(&task.id, &task.name, attempt, reason);

            let prompt = if attempt == 0 {
                prompt.to_string()
            } else {
                self.tracker.mark_fixing(&task.id);
                retry_prompt(prompt, spec, attempt, &last_failure)
            };

            let result = self.dispatch(task, prompt, system_prompt, workspace).await;
            if attempt > 0 {
                self.tracker.mark_retesting(&task.id);
            }

            let (passed, summary) = match result {
                Ok(result) => {
                    self.record_usage(&task.agent_name, &result);
                    (result.success, result.summary)
                }
                Err(BuildError::Cancelled) => return Err(BuildError::Cancelled),
                Err(e) => {
                    warn!(task_id = %task.id, attempt, error = %e, "Task attempt errored");
                    (false, e.to_string())
                }
            };

            self.tracker
                .record_attempt_result(&task.id, passed, None, None);
            if passed {
                return Ok(TaskOutcome::Succeeded { summary });
            }

            debug!(task_id = %task.id, attempt, "Task attempt failed");
            last_failure = summary;
            if attempt < max_retries {
                self.events.emit(BuildEvent::AgentOutput {
                    task_id: task.id.clone(),
                    agent_name: task.agent_name.clone(),
                    content: format!(
                        "Retrying... (attempt {} of {})",
                        attempt.saturating_add(2),
                        self.config.max_attempts()
                    ),
                });
                self.pause(self.config.retry_delay()).await?;
            }
        }

        Ok(TaskOutcome::Exhausted {
            error: last_failure,
            retries: max_retries,
        })
    }

    /// One worker call, bounded by the task timeout and the build's cancellation.
    async fn dispatch(
        &self,
        task: &Task,
        prompt: String,
        system_prompt: &str,
        workspace: &Workspace,
    ) -> BuildResult<ExecuteResult> {
        let timeout = self.config.task_timeout();
        let cancel = self.shared.cancel.child_token();
        let request = ExecuteRequest {
            task_id: task.id.clone(),
            agent_name: task.agent_name.clone(),
            prompt,
            system_prompt: system_prompt.to_string(),
            working_dir: workspace.root().to_path_buf(),
            timeout,
            output: OutputSink::new(&task.id, &task.agent_name, self.events.clone()),
            interaction: Interaction::new(
                &task.id,
                self.events.clone(),
                self.shared.questions.clone(),
                cancel.clone(),
            ),
        };

        let call = tokio::time::timeout(
            timeout,
            self.collaborators.worker.execute(request, cancel.clone()),
        );
        let result = tokio::select! {
            _ = self.shared.cancel.cancelled() => return Err(BuildError::Cancelled),
            result = call => result,
        };

        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(BuildError::Execution {
                task_id: task.id.clone(),
                message: format!("{:#}", e),
            }),
            Err(_) => {
                cancel.cancel();
                Err(BuildError::Timeout {
                    task_id: task.id.clone(),
                    after: timeout,
                })
            }
        }
    }

    /// Best effort: a failed commit is logged and the build goes on.
    fn commit_task(&self, git: &GitTracker, task: &Task) {
        let message = format!("{}: {}", task.agent_name, task.name);
        match git.commit(&message, &task.agent_name, &task.id) {
            Ok(Some(commit)) => {
                self.events.emit(BuildEvent::commit_created(&commit));
                self.shared.commits.lock().push(commit);
            }
            Ok(None) => debug!(task_id = %task.id, "No changes to commit"),
            Err(e) => warn!(task_id = %task.id, error = %e, "Git commit failed"),
        }
    }

    fn record_usage(&self, agent_name: &str, result: &ExecuteResult) {
        self.shared.tokens.lock().add_for_agent(
            agent_name,
            result.input_tokens,
            result.output_tokens,
            result.cost_usd,
        );
        self.events.emit(BuildEvent::TokenUsage {
            agent_name: agent_name.to_string(),
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cost_usd: result.cost_usd,
        });
    }

    /// Hand a failed task to a human. The build carries on either way.
    async fn escalate_failure(
        &self,
        task: &Task,
        retries: u32,
        error: &str,
        dag: &mut TaskDag,
    ) -> BuildResult<()> {
        if !self.config.orchestrator.pause_on_retry_exhaustion {
            self.events.emit(BuildEvent::error(
                format!("Agent couldn't complete task: {}", task.name),
                true,
            ));
            return Ok(());
        }

        let context = format!(
            "Task '{}' failed after {} attempt(s): {}",
            task.name,
            retries.saturating_add(1),
            error
        );
        self.task_gate(task, &format!("help:{}", task.id), HELP_QUESTION, context, dag)
            .await
    }

    async fn midpoint_gate(&self, task: &Task, dag: &mut TaskDag) -> BuildResult<()> {
        let context = format!("Just completed: {}", task.name);
        self.task_gate(task, &format!("midpoint:{}", task.id), MIDPOINT_QUESTION, context, dag)
            .await
    }

    /// Pause on a task-level gate. Any rejection queues a revision of the task.
    async fn task_gate(
        &self,
        task: &Task,
        gate_id: &str,
        question: &str,
        context: String,
        dag: &mut TaskDag,
    ) -> BuildResult<()> {
        self.session.update(|s| s.state = SessionState::Reviewing);
        let decision = self.wait_gate(gate_id, &task.id, question, context).await?;

        if !decision.is_approved() {
            let revision = revision_task(task, decision.feedback().unwrap_or_default());
            info!(gate_id, task_id = %revision.id, "Queued revision task");
            dag.add_task(&revision.id, revision.dependencies.iter().cloned());
            self.session.update(|s| s.tasks.push(revision));
        }

        self.session.update(|s| s.state = SessionState::Executing);
        Ok(())
    }

    async fn pause(&self, delay: Duration) -> BuildResult<()> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(BuildError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn revision_task(task: &Task, feedback: &str) -> Task {
    let mut revision = Task::new(
        &format!("task-revision-{}", task.id),
        &format!("Revise: {}", task.name),
        vec![task.id.clone()],
    )
    .with_agent(&task.agent_name)
    .with_description(&format!("Revise based on feedback: {}", feedback));
    revision.acceptance_criteria = vec![format!("Address feedback: {}", feedback)];
    revision
}
