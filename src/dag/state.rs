//! Execution bookkeeping for a task graph.
//!
//! `ExecutionState` tracks which tasks have been resolved (done or given up
//! on) while the orchestrator walks the graph, and produces the summary
//! reported when a session completes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Progress of one pass over the task graph.
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    /// Tasks whose dependents may run (succeeded or failed past the help gate)
    resolved: HashSet<String>,
    done: HashSet<String>,
    failed: HashSet<String>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_done(&mut self, task_id: &str) {
        self.failed.remove(task_id);
        self.done.insert(task_id.to_string());
        self.resolved.insert(task_id.to_string());
    }

    pub fn mark_failed(&mut self, task_id: &str) {
        self.failed.insert(task_id.to_string());
        self.resolved.insert(task_id.to_string());
    }

    /// Set handed to `TaskDag::get_ready`.
    pub fn resolved(&self) -> &HashSet<String> {
        &self.resolved
    }

    pub fn is_resolved(&self, task_id: &str) -> bool {
        self.resolved.contains(task_id)
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn summary(&self, total_tasks: usize, duration: Duration) -> ExecutionSummary {
        ExecutionSummary {
            total_tasks,
            completed: self.done.len(),
            failed: self.failed.len(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Summary of a finished execution pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn all_success(&self) -> bool {
        self.failed == 0 && self.completed == self.total_tasks
    }

    /// Human-readable line used in the `session_complete` event.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!(
            "Completed {}/{} tasks.",
            self.completed, self.total_tasks
        )];
        if self.failed > 0 {
            parts.push(format!("{} task(s) failed.", self.failed));
        }
        parts.join(" ")
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
