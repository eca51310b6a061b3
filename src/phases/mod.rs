//! Post-execution build phases.
//!
//! Each phase is a variant of `Phase` and runs through the single
//! `Phase::execute(ctx)` entry point. `PhaseContext` carries everything a phase
//! may touch: the session handle, the event sink, the working directory, the
//! cancellation token and the gate registry.

mod deploy;

pub use deploy::{DeployPhase, DeployReport};
pub use test::{NoopTestRunner, TestCase, TestPhase, TestReport, TestRunner};

use crate::errors::BuildResult;
use crate::events::EventSink;
use crate::gates::GateRegistry;
use crate::session_store::SessionHandle;
use nugget_common::SessionState;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Inputs shared by every phase.
#[derive(Clone, Debug)]
pub struct PhaseContext {
    pub session: SessionHandle,
    pub events: EventSink,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
    pub gates: GateRegistry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Tested(TestReport),
    Deployed(DeployReport),
}

pub enum Phase {
    Test(TestPhase),
    Deploy(DeployPhase),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Test(_) => "test",
            Phase::Deploy(_) => "deploy",
        }
    }

    /// Session state while the phase runs.
    pub fn state(&self) -> SessionState {
        match self {
            Phase::Test(_) => SessionState::Testing,
            Phase::Deploy(_) => SessionState::Deploying,
        }
    }

    pub async fn execute(&self, ctx: &PhaseContext) -> BuildResult<PhaseOutcome> {
        if ctx.cancel.is_cancelled() {
            return Err(crate::errors::BuildError::Cancelled);
        }

        let state = self.state();
        ctx.session.update(|s| s.state = state);
        info!(phase = self.name(), "Phase started");

        match self {
            Phase::Test(phase) => phase.execute(ctx).await.map(PhaseOutcome::Tested),
            Phase::Deploy(phase) => phase.execute(ctx).await.map(PhaseOutcome::Deployed),
        }
    }
}
