//! `riskaudit init <election.json>`.

use std::path::Path;

use anyhow::Result;
use riskaudit::audit_config::AuditConfig;
use riskaudit::init::init_project;
use riskaudit::ui::icons::CHECK;

pub fn cmd_init(config: &AuditConfig, election: &Path) -> Result<()> {
    let result = init_project(&config.project_dir, election, config.toml.clone())?;

    println!(
        "{}Initialized audit record at {}",
        CHECK,
        result.audit_dir.display()
    );
    println!(
        "  {} contest(s), {} card(s) including phantoms",
        result.contests, result.cards
    );
    if result.wrote_config {
        println!("  wrote {}", config.config_file().display());
    }
    println!();
    println!("Run 'riskaudit round' to draw the first sample.");
    Ok(())
}
