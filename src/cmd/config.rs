//! Configuration view and validation commands: `riskaudit config`.

use anyhow::{Context, Result};
use riskaudit::audit_config::{AuditConfig, AuditToml};
use riskaudit::estimate::ErrorModel;

use super::super::ConfigCommands;

fn print_effective(toml: &AuditToml) -> Result<()> {
    println!("[audit]");
    println!("  audit_type = \"{}\"", toml.audit.audit_type);
    println!("  risk_limit = {}", toml.audit.risk_limit);
    println!("  seed = {}", toml.audit.seed);
    println!("  with_replacement = {}", toml.audit.with_replacement);
    println!();

    println!("[rounds]");
    println!("  max_rounds = {}", toml.rounds.max_rounds);
    println!("  max_sample_fraction = {}", toml.rounds.max_sample_fraction);
    println!("  min_margin = {}", toml.rounds.min_margin);
    println!("  check_phantoms = {}", toml.rounds.check_phantoms);
    println!();

    println!("[estimation]");
    println!("  nsim = {}", toml.estimation.nsim);
    println!("  quantile = {}", toml.estimation.quantile);
    println!("  nthreads = {}", toml.estimation.nthreads);
    match &toml.estimation.error_model {
        ErrorModel::None => println!("  error_model = none"),
        model => println!("  error_model = {:?}", model),
    }
    println!();

    let strategy =
        toml::to_string_pretty(&toml.strategy()).context("Failed to render strategy")?;
    let source = if toml.strategy.is_some() { "" } else { " (default for audit type)" };
    println!("[strategy]{}", source);
    for line in strategy.lines() {
        println!("  {}", line);
    }
    println!();
    Ok(())
}

pub fn cmd_config(config: &AuditConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Audit Configuration");
            println!("===================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No audit.toml found at {}; using defaults.", config_path.display());
            }
            println!("Effective values (with env/CLI overrides):");
            println!();
            print_effective(&config.toml)?;
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            config
                .toml
                .validate()
                .context("Configuration is invalid")?;
            let warnings = config.toml.warnings();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration is valid, with warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("audit.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if !config.audit_dir.exists() {
                std::fs::create_dir_all(&config.audit_dir)?;
            }

            AuditToml::default().save(&config_path)?;

            println!("Created audit.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [audit] audit_type, risk_limit, seed");
            println!("  - [rounds] max_rounds, max_sample_fraction, min_margin");
            println!("  - [estimation] nsim, quantile, nthreads, error_model");
            println!();
        }
    }

    Ok(())
}
