//! Offline inspection commands: `nugget plan` and `nugget deploy-order`.

use anyhow::Result;
use console::style;
use nugget::config::NuggetToml;
use nugget::deploy::resolve_deploy_order;
use nugget::orchestrator::Plan;
use nugget_common::{DeployManifest, DeployUnit};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::load_document;

pub fn cmd_plan(project_dir: &Path, file: &Path) -> Result<()> {
    let config = NuggetToml::load_or_default(project_dir)?;
    let plan = Plan::from_path(file)?;
    let validated = plan.validate(&config.limits)?;
    let order = validated.dag.get_order()?;

    println!();
    println!(
        "{} {} task(s), {} agent(s)",
        style("Plan:").bold(),
        validated.tasks.len(),
        validated.agents.len()
    );
    if !validated.explanation.is_empty() {
        println!("{}", validated.explanation);
    }
    println!();
    println!("{:<6} {:<24} {:<16} Depends on", "Order", "Task", "Agent");
    println!(
        "{:<6} {:<24} {:<16} ----------",
        "-----", "------------------------", "----------------"
    );

    for (i, id) in order.iter().enumerate() {
        let Some(task) = validated.tasks.iter().find(|t| &t.id == id) else {
            continue;
        };
        let deps = if task.dependencies.is_empty() {
            "-".to_string()
        } else {
            task.dependencies.join(", ")
        };
        println!("{:<6} {:<24} {:<16} {}", i + 1, task.id, task.agent_name, deps);
    }

    if !validated.warnings.is_empty() {
        println!();
        println!("{}", style("Warnings:").yellow());
        for warning in &validated.warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

/// Deploy section of a spec plus registered manifests by plugin id.
#[derive(Debug, Default, Deserialize)]
struct DeployFile {
    #[serde(default)]
    devices: Vec<DeployUnit>,
    #[serde(default)]
    manifests: HashMap<String, DeployManifest>,
}

pub fn cmd_deploy_order(file: &Path) -> Result<()> {
    let deploy: DeployFile = load_document(file)?;
    let ordered = resolve_deploy_order(&deploy.devices, &deploy.manifests)?;

    if ordered.is_empty() {
        println!("No deploy units.");
        return Ok(());
    }
    for (i, unit) in ordered.iter().enumerate() {
        println!("{}. {} ({})", i + 1, unit.instance_id, unit.plugin_id);
    }
    Ok(())
}
