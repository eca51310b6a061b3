//! Per-session scratch directory shared with the workers.
//!
//! Layout under the session directory:
//!
//! ```text
//! .nugget/comms/           task summaries written by workers
//! .nugget/comms/reviews/
//! .nugget/context/         project_context.md
//! .nugget/status/          current_state.json
//! src/
//! tests/
//! ```
//!
//! Every write here is best effort: failures are logged and never abort a build.

use crate::config::NUGGET_DIR;
use anyhow::{Context, Result};
use nugget_common::BuildSession;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn nugget_dir(&self) -> PathBuf {
        self.root.join(NUGGET_DIR)
    }

    pub fn comms_path(&self, task_id: &str) -> PathBuf {
        self.nugget_dir()
            .join("comms")
            .join(format!("{}_summary.md", task_id))
    }

    pub fn context_path(&self) -> PathBuf {
        self.nugget_dir().join("context").join("project_context.md")
    }

    pub fn state_path(&self) -> PathBuf {
        self.nugget_dir().join("status").join("current_state.json")
    }

    /// Create the directory skeleton.
    pub fn prepare(&self) -> Result<()> {
        let nugget = self.nugget_dir();
        for dir in [
            nugget.join("comms").join("reviews"),
            nugget.join("context"),
            nugget.join("status"),
            self.root.join("src"),
            self.root.join("tests"),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        debug!(root = %self.root.display(), "Workspace ready");
        Ok(())
    }

    /// Summary a worker left for the task, if any.
    pub fn read_comms_summary(&self, task_id: &str) -> Option<String> {
        let path = self.comms_path(task_id);
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(task_id, error = %e, "Could not read task summary file");
                None
            }
        }
    }

    pub fn write_project_context(&self, content: &str) {
        self.write_best_effort(&self.context_path(), content);
    }

    /// Snapshot task and agent statuses as JSON maps keyed by id and name.
    pub fn write_current_state(&self, session: &BuildSession) {
        let tasks: Map<String, Value> = session
            .tasks
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    json!({
                        "name": t.name,
                        "status": t.status,
                        "agent_name": t.agent_name,
                    }),
                )
            })
            .collect();
        let agents: Map<String, Value> = session
            .agents
            .iter()
            .map(|a| (a.name.clone(), json!({"role": a.role, "status": a.status})))
            .collect();
        let state = json!({
            "session_id": session.id,
            "state": session.state,
            "tasks": tasks,
            "agents": agents,
        });

        match serde_json::to_string_pretty(&state) {
            Ok(content) => self.write_best_effort(&self.state_path(), &content),
            Err(e) => warn!(error = %e, "Could not serialize session state"),
        }
    }

    fn write_best_effort(&self, path: &Path, content: &str) {
        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(path, content));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Workspace write failed");
        }
    }
}
