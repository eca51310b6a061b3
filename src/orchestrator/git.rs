//! Version history of a session workspace: one commit per completed task.

use anyhow::{Context, Result};
use chrono::Utc;
use git2::{IndexAddOption, Repository, Signature};
use nugget_common::CommitInfo;
use parking_lot::Mutex;
use std::path::Path;
use tracing::debug;

const AUTHOR_NAME: &str = "nugget";
const AUTHOR_EMAIL: &str = "nugget@localhost";

pub struct GitTracker {
    repo: Mutex<Repository>,
}

impl std::fmt::Debug for GitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTracker")
            .field("path", &self.repo.lock().path())
            .finish()
    }
}

impl GitTracker {
    /// Initialize a repository with a README and a first commit.
    pub fn init(dir: &Path, goal: &str) -> Result<Self> {
        let repo = Repository::init(dir)
            .with_context(|| format!("Failed to init git repository in {}", dir.display()))?;
        let goal = if goal.trim().is_empty() {
            "nugget project"
        } else {
            goal.trim()
        };
        std::fs::write(
            dir.join("README.md"),
            format!("# {}\n\nBuilt with nugget.\n", goal),
        )
        .context("Failed to write README.md")?;

        let tracker = Self {
            repo: Mutex::new(repo),
        };
        tracker.commit_all("Project started!")?;
        Ok(tracker)
    }

    /// Stage everything and commit on behalf of a task.
    ///
    /// Returns `None` when the tree did not change.
    pub fn commit(
        &self,
        message: &str,
        agent_name: &str,
        task_id: &str,
    ) -> Result<Option<CommitInfo>> {
        let Some((sha, files_changed)) = self.commit_all(message)? else {
            return Ok(None);
        };
        Ok(Some(CommitInfo {
            short_sha: sha.chars().take(7).collect(),
            sha,
            message: message.to_string(),
            agent_name: agent_name.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            files_changed,
        }))
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        let repo = self.repo.lock();
        let head = repo.head().ok()?.peel_to_commit().ok()?;
        Some(head.id().to_string())
    }

    fn commit_all(&self, message: &str) -> Result<Option<(String, Vec<String>)>> {
        let repo = self.repo.lock();
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;

        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parent_tree = match &parent {
            Some(commit) => Some(commit.tree()?),
            None => None,
        };
        if parent_tree.as_ref().is_some_and(|t| t.id() == tree.id()) {
            debug!(message, "Nothing to commit");
            return Ok(None);
        }

        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        let files_changed = diff
            .deltas()
            .filter_map(|delta| {
                delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect();

        let sig = Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(sha = %id, message, "Committed");
        Ok(Some((id.to_string(), files_changed)))
    }
}
