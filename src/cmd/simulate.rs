//! `nugget simulate`: a full session against dry-run collaborators.
//!
//! Events go to stdout as JSON lines. Gates are approved with `--yes` and
//! declined otherwise; worker questions get an empty answer.

use anyhow::{Context, Result};
use console::style;
use nugget::config::NuggetToml;
use nugget::events;
use nugget::gates::GateDecision;
use nugget::orchestrator::{Collaborators, Orchestrator, OrchestratorHandle, Plan, RunOutcome};
use nugget::session_store::SessionStore;
use nugget_common::{BuildEvent, BuildSession, BuildSpec};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::load_document;

pub async fn cmd_simulate(
    project_dir: &Path,
    plan_path: &Path,
    spec_path: Option<&Path>,
    yes: bool,
) -> Result<()> {
    let config = NuggetToml::load_or_default(project_dir)?.with_env_overrides();
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let plan = Plan::from_path(plan_path)?;
    let spec: BuildSpec = match spec_path {
        Some(path) => load_document(path)?,
        None => BuildSpec::default(),
    };

    let store = SessionStore::new();
    let session_id = uuid::Uuid::new_v4().to_string();
    let entry = store.create(&session_id, BuildSession::new(&session_id));

    let (sink, mut rx) = events::channel();
    let orchestrator = Orchestrator::new(
        entry.session,
        config,
        sink,
        Collaborators::dry_run(plan, HashMap::new()),
    );
    let handle = orchestrator.handle();
    let cancel_handle = handle.clone();
    store.set_cancel_fn(&session_id, move || cancel_handle.cancel())?;

    info!(session_id = %session_id, "Simulating build");
    let run = tokio::spawn(orchestrator.run(spec));

    let interrupt = {
        let store = store.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", style("Interrupted, cancelling build...").yellow());
                store.cancel(&session_id);
            }
        })
    };

    while let Some(event) = rx.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        answer(&handle, &event, yes);
    }
    interrupt.abort();

    let outcome = run.await.context("Build task did not finish")?;
    store.remove(&session_id);

    match outcome {
        RunOutcome::Completed(summary) => {
            eprintln!("{} {}", style("Done:").green().bold(), summary.describe());
            Ok(())
        }
        RunOutcome::Cancelled => {
            eprintln!("{}", style("Cancelled").yellow());
            Ok(())
        }
        RunOutcome::Failed { message } => anyhow::bail!("Build failed: {}", message),
    }
}

fn answer(handle: &OrchestratorHandle, event: &BuildEvent, yes: bool) {
    let gate_id = match event {
        BuildEvent::HumanGate { gate_id, .. } => gate_id.clone(),
        BuildEvent::FlashPrompt { device_role, .. } => format!("flash:{}", device_role),
        BuildEvent::UserQuestion { task_id, .. } => {
            if let Err(e) = handle.respond_to_question(task_id, json!({})) {
                warn!(task_id, error = %e, "Could not answer question");
            }
            return;
        }
        _ => return,
    };

    let decision = if yes {
        GateDecision::Approved
    } else {
        GateDecision::Rejected { feedback: None }
    };
    if let Err(e) = handle.respond_to_gate(&gate_id, decision) {
        warn!(gate_id, error = %e, "Could not answer gate");
    }
}
