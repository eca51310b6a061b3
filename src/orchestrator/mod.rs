//! Build session state machine.
//!
//! An `Orchestrator` owns one `BuildSession` and drives it through
//! `idle → planning → executing → (reviewing) → testing → deploying → done`.
//! It is the only writer of that session; everything else observes it through
//! a cloned [`OrchestratorHandle`] or the event stream.
//!
//! `Orchestrator::run` never returns an error and never unwinds. Whatever
//! happens inside the phase sequence (errors, panics, cancellation) the
//! session ends in `done`.

mod context;
mod execute;
mod git;
pub mod plan;
mod tokens;
mod workspace;

pub use context::cap_summary;
pub use git::GitTracker;
pub use plan::{Plan, Planner, StaticPlanner, ValidatedPlan};
pub use tokens::{AgentUsage, TokenTracker};
pub use workspace::Workspace;

use crate::config::NuggetToml;
use crate::dag::{ExecutionSummary, ExecutionTimer};
use crate::deploy::{Deployer, DryRunDeployer};
use crate::errors::{BuildError, BuildResult};
use crate::events::EventSink;
use crate::feedback::{FeedbackLoopTracker, MeetingRegistry};
use crate::gates::{GateDecision, GateRegistry, QuestionRegistry};
use crate::phases::{
    DeployPhase, NoopTestRunner, Phase, PhaseContext, PhaseOutcome, TestPhase, TestReport,
    TestRunner,
};
use crate::session_store::SessionHandle;
use crate::worker::{DryRunWorker, TaskWorker};
use futures::FutureExt;
use nugget_common::{
    AgentStatus, BuildEvent, BuildSession, BuildSpec, CommitInfo, DeployManifest, FeedbackLoop,
    SessionState,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub worker: Arc<dyn TaskWorker>,
    pub test_runner: Arc<dyn TestRunner>,
    pub deployer: Arc<dyn Deployer>,
}

impl Collaborators {
    /// Serve `plan` and succeed at everything without doing any work.
    pub fn dry_run(plan: Plan, manifests: HashMap<String, DeployManifest>) -> Self {
        Self {
            planner: Arc::new(StaticPlanner::new(plan)),
            worker: Arc::new(DryRunWorker),
            test_runner: Arc::new(NoopTestRunner),
            deployer: Arc::new(DryRunDeployer { manifests }),
        }
    }
}

/// How a run ended. The session is `done` in every case.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(ExecutionSummary),
    /// An `error` event carrying `message` was emitted
    Failed { message: String },
    Cancelled,
}

/// State reachable from both the running orchestrator and its handles.
#[derive(Debug)]
struct Shared {
    gates: GateRegistry,
    questions: QuestionRegistry,
    cancel: CancellationToken,
    test_report: Mutex<Option<TestReport>>,
    tokens: Mutex<TokenTracker>,
    feedback: Mutex<Vec<FeedbackLoop>>,
    commits: Mutex<Vec<CommitInfo>>,
}

/// Inbound command surface of a running session.
#[derive(Clone, Debug)]
pub struct OrchestratorHandle {
    session: SessionHandle,
    shared: Arc<Shared>,
}

impl OrchestratorHandle {
    /// Resolve the gate the build is blocked on.
    pub fn respond_to_gate(&self, gate_id: &str, decision: GateDecision) -> BuildResult<()> {
        info!(gate_id, approved = decision.is_approved(), "Gate response");
        self.shared.gates.resolve(gate_id, decision)
    }

    /// Deliver answers to a question a worker asked for `task_id`.
    pub fn respond_to_question(&self, task_id: &str, answers: Value) -> BuildResult<()> {
        self.shared.questions.resolve(task_id, answers)
    }

    /// Request cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!(session_id = %self.session.id(), "Cancelling build");
            self.shared.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn pending_gates(&self) -> Vec<String> {
        self.shared.gates.pending()
    }

    pub fn pending_questions(&self) -> Vec<String> {
        self.shared.questions.pending()
    }

    pub fn test_results(&self) -> Option<TestReport> {
        self.shared.test_report.lock().clone()
    }

    pub fn token_usage(&self) -> TokenTracker {
        self.shared.tokens.lock().clone()
    }

    /// Commits made after completed tasks, oldest first.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.shared.commits.lock().clone()
    }

    /// Feedback loops of the last finished run.
    pub fn feedback_history(&self) -> Vec<FeedbackLoop> {
        self.shared.feedback.lock().clone()
    }

    pub fn session(&self) -> BuildSession {
        self.session.snapshot()
    }
}

pub struct Orchestrator {
    session: SessionHandle,
    config: NuggetToml,
    events: EventSink,
    collaborators: Collaborators,
    manifests: HashMap<String, DeployManifest>,
    tracker: FeedbackLoopTracker,
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        session: SessionHandle,
        config: NuggetToml,
        events: EventSink,
        collaborators: Collaborators,
    ) -> Self {
        let meetings = Arc::new(MeetingRegistry::with_defaults());
        let tracker = FeedbackLoopTracker::new(events.clone(), meetings)
            .with_max_attempts(config.max_attempts());
        Self {
            session,
            config,
            events,
            collaborators,
            manifests: HashMap::new(),
            tracker,
            shared: Arc::new(Shared {
                gates: GateRegistry::gates(),
                questions: QuestionRegistry::questions(),
                cancel: CancellationToken::new(),
                test_report: Mutex::new(None),
                tokens: Mutex::new(TokenTracker::new()),
                feedback: Mutex::new(Vec::new()),
                commits: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registered manifests, keyed by plugin id, for units without their own.
    pub fn with_manifests(mut self, manifests: HashMap<String, DeployManifest>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn with_meetings(mut self, meetings: Arc<MeetingRegistry>) -> Self {
        self.tracker = FeedbackLoopTracker::new(self.events.clone(), meetings)
            .with_max_attempts(self.config.max_attempts());
        self
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            session: self.session.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the whole build. Always leaves the session in `done`.
    pub async fn run(mut self, spec: BuildSpec) -> RunOutcome {
        let session_id = self.session.id();
        info!(session_id = %session_id, goal = %spec.project.goal, "Build started");

        let result = AssertUnwindSafe(self.run_phases(spec)).catch_unwind().await;

        let outcome = match result {
            _ if self.shared.cancel.is_cancelled() => {
                info!(session_id = %session_id, "Build cancelled");
                RunOutcome::Cancelled
            }
            Ok(Ok(summary)) => {
                info!(session_id = %session_id, summary = %summary.describe(), "Build finished");
                RunOutcome::Completed(summary)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                error!(session_id = %session_id, error = %message, "Build failed");
                self.events.emit(BuildEvent::error(message.clone(), false));
                RunOutcome::Failed { message }
            }
            Err(panic) => {
                let message = format!("Internal error: {}", panic_message(panic.as_ref()));
                error!(session_id = %session_id, error = %message, "Build panicked");
                self.events.emit(BuildEvent::error(message.clone(), false));
                RunOutcome::Failed { message }
            }
        };

        self.finish();
        outcome
    }

    async fn run_phases(&mut self, spec: BuildSpec) -> BuildResult<ExecutionSummary> {
        let timer = ExecutionTimer::start();
        self.session.update(|s| s.spec = Some(spec.clone()));

        let workspace = Workspace::new(self.config.workspace_root().join(self.session.id()));
        if let Err(e) = workspace.prepare() {
            warn!(error = %e, "Workspace setup failed; workers get an incomplete layout");
        }
        let git = if self.config.orchestrator.git_commits {
            GitTracker::init(workspace.root(), &spec.project.goal)
                .inspect_err(|e| warn!(error = %e, "Git unavailable; continuing without history"))
                .ok()
        } else {
            None
        };

        let plan = self.plan(&spec).await?;
        let state = self
            .execute(&spec, &workspace, git.as_ref(), plan.dag)
            .await?;

        if spec.workflow.review_enabled {
            self.review_gate(state.done_count()).await?;
        }

        let ctx = PhaseContext {
            session: self.session.clone(),
            events: self.events.clone(),
            working_dir: workspace.root().to_path_buf(),
            cancel: self.shared.cancel.clone(),
            gates: self.shared.gates.clone(),
        };

        let test = Phase::Test(TestPhase::new(Arc::clone(&self.collaborators.test_runner)));
        if let PhaseOutcome::Tested(report) = test.execute(&ctx).await? {
            *self.shared.test_report.lock() = Some(report);
        }

        if spec.wants_deploy() {
            let deploy = Phase::Deploy(DeployPhase::new(
                Arc::clone(&self.collaborators.deployer),
                self.manifests.clone(),
                spec.clone(),
            ));
            deploy.execute(&ctx).await?;
        }

        let total = self.session.snapshot().tasks.len();
        let summary = state.summary(total, timer.elapsed());
        self.session.update(|s| {
            for agent in &mut s.agents {
                agent.status = AgentStatus::Done;
            }
        });
        self.events.emit(BuildEvent::SessionComplete {
            summary: summary.describe(),
        });
        Ok(summary)
    }

    async fn plan(&self, spec: &BuildSpec) -> BuildResult<ValidatedPlan> {
        self.session.update(|s| s.state = SessionState::Planning);
        self.events.emit(BuildEvent::PlanningStarted);

        let cancel = &self.shared.cancel;
        let plan = tokio::select! {
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
            plan = self.collaborators.planner.plan(spec, cancel.child_token()) => plan?,
        };

        let validated = plan.validate(&self.config.limits)?;
        info!(
            tasks = validated.tasks.len(),
            agents = validated.agents.len(),
            "Plan ready"
        );
        self.session.update(|s| {
            s.tasks = validated.tasks.clone();
            s.agents = validated.agents.clone();
        });
        self.events.emit(BuildEvent::PlanReady {
            tasks: validated.tasks.clone(),
            agents: validated.agents.clone(),
            explanation: validated.explanation.clone(),
        });
        Ok(validated)
    }

    async fn review_gate(&self, done: usize) -> BuildResult<()> {
        self.session.update(|s| s.state = SessionState::Reviewing);
        let decision = self
            .wait_gate(
                "review",
                "",
                "Your nugget is built. Want to review it before testing?",
                format!("{} task(s) completed", done),
            )
            .await?;
        if !decision.is_approved() {
            return Err(BuildError::Execution {
                task_id: "review".into(),
                message: decision.feedback().unwrap_or("Review rejected").to_string(),
            });
        }
        Ok(())
    }

    /// Emit `human_gate` and block until it is answered or the build is cancelled.
    async fn wait_gate(
        &self,
        gate_id: &str,
        task_id: &str,
        question: &str,
        context: String,
    ) -> BuildResult<GateDecision> {
        let waiter = self.shared.gates.open(gate_id);
        info!(gate_id, "Waiting on human gate");
        self.events.emit(BuildEvent::HumanGate {
            gate_id: gate_id.to_string(),
            task_id: task_id.to_string(),
            question: question.to_string(),
            context,
        });
        waiter.wait(&self.shared.cancel).await
    }

    fn finish(&mut self) {
        *self.shared.feedback.lock() = self.tracker.loops().to_vec();
        self.tracker.reset();
        self.shared.gates.clear();
        self.shared.questions.clear();
        self.session.update(|s| s.state = SessionState::Done);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
