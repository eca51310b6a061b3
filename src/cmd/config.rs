//! `nugget config`: view, validate and initialize the project configuration.

use anyhow::{Context, Result};
use nugget::config::{CONFIG_FILE, NUGGET_DIR, NuggetToml};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let nugget_dir = project_dir.join(NUGGET_DIR);
    let config_path = nugget_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}; using defaults.", CONFIG_FILE, config_path.display());
            }
            println!();

            let config = NuggetToml::load_or_default(project_dir)?.with_env_overrides();
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", rendered);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let config = NuggetToml::load(&config_path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&nugget_dir)
                .with_context(|| format!("Failed to create {}", nugget_dir.display()))?;
            NuggetToml::default().save(&config_path)?;
            println!("Created {} at {}", CONFIG_FILE, config_path.display());
        }
    }

    Ok(())
}
