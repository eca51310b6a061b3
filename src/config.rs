//! Engine configuration loaded from `.nugget/nugget.toml`.
//!
//! Every field is optional; a missing file yields the defaults below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! max_retries = 2
//! retry_delay_ms = 1000
//! task_timeout_secs = 600
//! pause_on_retry_exhaustion = true
//! workspace_root = "/tmp/nugget"
//! git_commits = true
//!
//! [limits]
//! max_name_len = 200
//! max_description_len = 2000
//! max_criteria = 20
//! max_criterion_len = 500
//! max_persona_len = 500
//! max_summary_words = 500
//!
//! [sessions]
//! cleanup_delay_secs = 300
//! max_age_secs = 3600
//! prune_interval_secs = 600
//! ```
//!
//! `NUGGET_TASK_TIMEOUT_SECS` and `NUGGET_MAX_RETRIES` override the file. The
//! retry override is capped at [`MAX_RETRIES_CAP`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding per-project engine state.
pub const NUGGET_DIR: &str = ".nugget";
pub const CONFIG_FILE: &str = "nugget.toml";

/// Retry, timeout and gate behaviour of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause before re-dispatching a failed task
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Budget for one worker call
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Ask a human whether to continue once a task exhausts its retries
    #[serde(default = "default_true")]
    pub pause_on_retry_exhaustion: bool,
    /// Parent directory for per-session working directories
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Keep a git history of the session workspace, one commit per task
    #[serde(default = "default_true")]
    pub git_commits: bool,
}

/// Ceiling for `NUGGET_MAX_RETRIES`.
pub const MAX_RETRIES_CAP: u32 = 100;

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            pause_on_retry_exhaustion: default_true(),
            workspace_root: None,
            git_commits: default_true(),
        }
    }
}

/// Length caps applied while validating a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
    #[serde(default = "default_max_criteria")]
    pub max_criteria: usize,
    #[serde(default = "default_max_criterion_len")]
    pub max_criterion_len: usize,
    #[serde(default = "default_max_persona_len")]
    pub max_persona_len: usize,
    /// Word cap for predecessor summaries carried into prompts
    #[serde(default = "default_max_summary_words")]
    pub max_summary_words: usize,
}

fn default_max_name_len() -> usize {
    200
}

fn default_max_description_len() -> usize {
    2000
}

fn default_max_criteria() -> usize {
    20
}

fn default_max_criterion_len() -> usize {
    500
}

fn default_max_persona_len() -> usize {
    500
}

fn default_max_summary_words() -> usize {
    500
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_name_len: default_max_name_len(),
            max_description_len: default_max_description_len(),
            max_criteria: default_max_criteria(),
            max_criterion_len: default_max_criterion_len(),
            max_persona_len: default_max_persona_len(),
            max_summary_words: default_max_summary_words(),
        }
    }
}

/// Session registry eviction timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How long a finished session stays queryable
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    /// Age past which the pruner reclaims a session regardless of state
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_cleanup_delay_secs() -> u64 {
    300
}

fn default_max_age_secs() -> u64 {
    3600
}

fn default_prune_interval_secs() -> u64 {
    600
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_secs: default_cleanup_delay_secs(),
            max_age_secs: default_max_age_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Root of `nugget.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NuggetToml {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl NuggetToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse nugget.toml")
    }

    /// Load `<project_dir>/.nugget/nugget.toml`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(NUGGET_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize nugget.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Apply `NUGGET_*` environment overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = env_u64("NUGGET_TASK_TIMEOUT_SECS") {
            self.orchestrator.task_timeout_secs = secs;
        }
        if let Some(retries) = env_u64("NUGGET_MAX_RETRIES") {
            self.orchestrator.max_retries = retries.min(u64::from(MAX_RETRIES_CAP)) as u32;
        }
        self
    }

    /// Human-readable problems with the configuration. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.orchestrator.task_timeout_secs == 0 {
            warnings.push("task_timeout_secs is 0: every task will time out immediately".into());
        }
        if self.orchestrator.max_retries > 10 {
            warnings.push(format!(
                "max_retries = {} is unusually high; failing tasks will retry for a long time",
                self.orchestrator.max_retries
            ));
        }
        if self.limits.max_summary_words == 0 {
            warnings.push("max_summary_words is 0: predecessor summaries will be empty".into());
        }
        if self.sessions.prune_interval_secs == 0 {
            warnings.push("prune_interval_secs must be greater than 0".into());
        }
        if self.sessions.max_age_secs < self.sessions.cleanup_delay_secs {
            warnings.push(format!(
                "max_age_secs ({}) is shorter than cleanup_delay_secs ({}): \
                 finished sessions may be pruned before their cleanup fires",
                self.sessions.max_age_secs, self.sessions.cleanup_delay_secs
            ));
        }

        warnings
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.task_timeout_secs)
    }

    /// First attempt plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.orchestrator.max_retries.saturating_add(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.orchestrator.retry_delay_ms)
    }

    /// Where session working directories are created.
    pub fn workspace_root(&self) -> PathBuf {
        self.orchestrator
            .workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("nugget"))
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}
