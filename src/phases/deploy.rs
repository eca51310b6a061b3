use super::PhaseContext;
use crate::deploy::{
    DeployOutcome, DeployOutputs, DeployReporter, Deployer, manifest_for, resolve_deploy_order,
};
use crate::errors::{BuildError, BuildResult};
use nugget_common::{
    BuildEvent, BuildSpec, DeployManifest, DeployMethod, DeployTarget, DeployUnit, RuleTrigger,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to each unit of a deployment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployReport {
    /// Instance ids deployed successfully, in deploy order
    pub deployed: Vec<String>,
    /// Flash units the human declined to flash
    pub skipped: Vec<String>,
    /// Instance id whose failure stopped the deployment
    pub failed: Option<String>,
    pub outputs: DeployOutputs,
}

pub struct DeployPhase {
    deployer: Arc<dyn Deployer>,
    manifests: HashMap<String, DeployManifest>,
    spec: BuildSpec,
}

impl DeployPhase {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        manifests: HashMap<String, DeployManifest>,
        spec: BuildSpec,
    ) -> Self {
        Self {
            deployer,
            manifests,
            spec,
        }
    }

    /// Units to deploy: the spec's devices, or one board for the legacy
    /// `esp32`/`both` target.
    pub fn units(&self) -> Vec<DeployUnit> {
        if !self.spec.devices.is_empty() {
            return self.spec.devices.clone();
        }
        match self.spec.deployment.target {
            DeployTarget::Esp32 | DeployTarget::Both => {
                vec![DeployUnit::new("esp32", "esp32").with_manifest(DeployManifest {
                    method: DeployMethod::Flash,
                    ..Default::default()
                })]
            }
            DeployTarget::Preview | DeployTarget::Web => Vec::new(),
        }
    }

    pub(super) async fn execute(&self, ctx: &PhaseContext) -> BuildResult<DeployReport> {
        let checklist: Vec<String> = self
            .spec
            .rules_for(RuleTrigger::BeforeDeploy)
            .map(|r| format!("- {}: {}", r.name, r.prompt))
            .collect();
        if !checklist.is_empty() {
            info!("Before-deploy rules:\n{}", checklist.join("\n"));
        }

        let order = resolve_deploy_order(&self.units(), &self.manifests)?;
        let reporter = DeployReporter::new(ctx.events.clone());
        let mut report = DeployReport::default();

        for unit in &order {
            let target = unit.instance_id.clone();
            let method = manifest_for(unit, &self.manifests)
                .map(|m| m.method)
                .unwrap_or_default();
            ctx.events.emit(BuildEvent::DeployStarted {
                target: target.clone(),
            });

            if method == DeployMethod::Flash {
                let waiter = ctx.gates.open(&format!("flash:{}", target));
                ctx.events.emit(BuildEvent::FlashPrompt {
                    device_role: target.clone(),
                    message: format!(
                        "Plug in the {} board ({}) and press Ready to flash it.",
                        target, unit.plugin_id
                    ),
                });
                let decision = waiter.wait(&ctx.cancel).await?;
                if !decision.is_approved() {
                    info!(target = %target, "Flash skipped by user");
                    ctx.events.emit(BuildEvent::FlashComplete {
                        device_role: target.clone(),
                        success: false,
                        message: Some(
                            decision
                                .feedback()
                                .unwrap_or("Flashing skipped")
                                .to_string(),
                        ),
                    });
                    report.skipped.push(target);
                    continue;
                }
            }

            let requires = manifest_for(unit, &self.manifests)
                .map(|m| m.requires.clone())
                .unwrap_or_default();
            let inputs: DeployOutputs = requires
                .iter()
                .filter_map(|k| report.outputs.get(k).map(|v| (k.clone(), v.clone())))
                .collect();

            reporter.progress(format!("Deploying {}...", target), Some(0));
            let outcome = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(BuildError::Cancelled),
                result = self.deployer.deploy(
                    unit,
                    &inputs,
                    &ctx.working_dir,
                    &reporter,
                    ctx.cancel.child_token(),
                ) => result.unwrap_or_else(|e| DeployOutcome::failed(format!("{:#}", e))),
            };

            if !outcome.success {
                let message = outcome
                    .message
                    .unwrap_or_else(|| format!("Deploying {} failed", target));
                warn!(target = %target, %message, "Deploy failed");
                reporter.progress(message.clone(), None);
                if method == DeployMethod::Flash {
                    ctx.events.emit(BuildEvent::FlashComplete {
                        device_role: target.clone(),
                        success: false,
                        message: Some(message.clone()),
                    });
                }
                ctx.events.emit(BuildEvent::error(message, true));
                report.failed = Some(target);
                return Ok(report);
            }

            let provides = manifest_for(unit, &self.manifests)
                .map(|m| m.provides.clone())
                .unwrap_or_default();
            for (key, value) in outcome.outputs {
                if provides.contains(&key) {
                    report.outputs.insert(key, value);
                }
            }

            reporter.progress(format!("{} deployed", target), Some(100));
            if method == DeployMethod::Flash {
                ctx.events.emit(BuildEvent::FlashComplete {
                    device_role: target.clone(),
                    success: true,
                    message: outcome.message,
                });
            }
            ctx.events.emit(BuildEvent::DeployComplete {
                target: target.clone(),
            });
            info!(target = %target, "Unit deployed");
            report.deployed.push(target);
        }

        Ok(report)
    }
}
