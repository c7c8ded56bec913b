//! `riskaudit remove <contest> [--assertion <idx>]`.

use anyhow::Result;
use riskaudit::audit_config::AuditConfig;
use riskaudit::ui::icons::REMOVED;

use super::load_workflow;

pub fn cmd_remove(config: &AuditConfig, contest: &str, assertion: Option<usize>) -> Result<()> {
    let mut workflow = load_workflow(config)?;
    match assertion {
        Some(index) => {
            workflow.remove_assertion(contest, index)?;
            println!("{}Removed assertion {} of {}", REMOVED, index, contest);
        }
        None => {
            workflow.remove_contest(contest)?;
            println!("{}Removed contest {}", REMOVED, contest);
        }
    }
    println!("The removal takes effect in round {}.", workflow.record().next_round());
    Ok(())
}
