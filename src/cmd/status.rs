//! Read-only commands: `riskaudit status` and `riskaudit verify`.

use anyhow::{Result, bail};
use riskaudit::audit_config::AuditConfig;
use riskaudit::config::RecordPaths;
use riskaudit::record::RecordStore;
use riskaudit::ui;
use riskaudit::verify::verify;

pub fn cmd_status(config: &AuditConfig) -> Result<()> {
    let store = RecordStore::new(RecordPaths::new(config.audit_dir.clone()));
    let record = store.load(config.toml.clone())?;
    ui::print_status(&record);
    println!();
    Ok(())
}

/// Recompute the record; fails if anything disagrees.
pub fn cmd_verify(config: &AuditConfig) -> Result<()> {
    let store = RecordStore::new(RecordPaths::new(config.audit_dir.clone()));
    let record = store.load(config.toml.clone())?;
    let found = verify(&record);
    ui::print_discrepancies(&found);
    println!();
    if !found.is_empty() {
        bail!("Verification failed with {} discrepancy(ies)", found.len());
    }
    Ok(())
}
