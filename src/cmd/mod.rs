//! CLI command implementations.
//!
//! | Module     | Commands handled         |
//! |------------|--------------------------|
//! | `plan`     | `Plan`, `DeployOrder`    |
//! | `simulate` | `Simulate`               |
//! | `config`   | `Config`                 |

pub mod config;
pub mod plan;
pub mod simulate;

pub use config::cmd_config;
pub use plan::{cmd_deploy_order, cmd_plan};
pub use simulate::cmd_simulate;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Parse a `.yaml`/`.yml` file as YAML and anything else as JSON.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML: {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON: {}", path.display()))
    }
}
