//! Multi-target deployment.
//!
//! - `resolver`: orders deploy units by their `provides`/`requires` keys
//! - `Deployer`: the collaborator that actually pushes one unit to its target

mod resolver;

pub use resolver::{manifest_for, resolve_deploy_order};

use crate::events::EventSink;
use async_trait::async_trait;
use nugget_common::{BuildEvent, DeployUnit};
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Values a unit produced, keyed by the capability keys it provides.
pub type DeployOutputs = HashMap<String, String>;

/// Result of deploying one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployOutcome {
    pub success: bool,
    pub message: Option<String>,
    /// Keys not in the unit's `provides` list are ignored
    pub outputs: DeployOutputs,
}

impl DeployOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, key: &str, value: impl Into<String>) -> Self {
        self.outputs.insert(key.to_string(), value.into());
        self
    }
}

/// Narrow handle a deployer uses to report progress.
#[derive(Clone, Debug)]
pub struct DeployReporter {
    events: EventSink,
}

impl DeployReporter {
    pub fn new(events: EventSink) -> Self {
        Self { events }
    }

    pub fn progress(&self, step: impl Into<String>, progress: Option<u8>) {
        self.events.emit(BuildEvent::DeployProgress {
            step: step.into(),
            progress: progress.map(|p| p.min(100)),
        });
    }
}

/// Pushes one deploy unit to its target (board, cloud, local server).
#[async_trait]
pub trait Deployer: Send + Sync {
    /// `inputs` holds a value for every key the unit requires that an earlier
    /// unit produced.
    async fn deploy(
        &self,
        unit: &DeployUnit,
        inputs: &DeployOutputs,
        working_dir: &Path,
        reporter: &DeployReporter,
        cancel: CancellationToken,
    ) -> anyhow::Result<DeployOutcome>;
}

/// Deployer that succeeds immediately and fabricates a placeholder output per
/// provided key. Used by `nugget simulate`.
#[derive(Debug, Default, Clone)]
pub struct DryRunDeployer {
    pub manifests: HashMap<String, nugget_common::DeployManifest>,
}

#[async_trait]
impl Deployer for DryRunDeployer {
    async fn deploy(
        &self,
        unit: &DeployUnit,
        _inputs: &DeployOutputs,
        _working_dir: &Path,
        reporter: &DeployReporter,
        _cancel: CancellationToken,
    ) -> anyhow::Result<DeployOutcome> {
        reporter.progress(format!("Dry run: deploying {}", unit.instance_id), Some(50));

        let mut outcome = DeployOutcome::ok();
        if let Some(manifest) = manifest_for(unit, &self.manifests) {
            for key in &manifest.provides {
                outcome = outcome.with_output(key, format!("dry-run://{}/{}", unit.instance_id, key));
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nugget_common::DeployManifest;

    #[tokio::test]
    async fn test_dry_run_fabricates_provided_outputs() {
        let (sink, mut rx) = crate::events::channel();
        let unit = DeployUnit::new("cloud", "dash").with_manifest(DeployManifest {
            provides: vec!["cloud_url".into()],
            ..Default::default()
        });

        let outcome = DryRunDeployer::default()
            .deploy(
                &unit,
                &DeployOutputs::new(),
                Path::new("."),
                &DeployReporter::new(sink),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.outputs["cloud_url"], "dry-run://dash/cloud_url");
        assert_eq!(rx.drain().len(), 1);
    }

    #[test]
    fn test_reporter_clamps_progress() {
        let (sink, mut rx) = crate::events::channel();
        DeployReporter::new(sink).progress("Flashing", Some(250));
        match rx.drain().pop() {
            Some(BuildEvent::DeployProgress { progress, .. }) => assert_eq!(progress, Some(100)),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
