//! Round commands: `riskaudit round` and `riskaudit estimate`.

use anyhow::{Context, Result};
use console::style;
use riskaudit::audit_config::AuditConfig;
use riskaudit::config::RecordPaths;
use riskaudit::ui;
use riskaudit::ui::icons::assertion_icon;
use riskaudit::workflow::DirectoryMvrSource;

use super::load_workflow;

/// Start the next round, or evaluate the pending one once its reviews are in.
pub async fn cmd_round(config: &AuditConfig) -> Result<()> {
    let mut workflow = load_workflow(config)?;

    if workflow.record().pending.is_none() {
        let plan = workflow.start_round()?;
        let requested = workflow.requested_prns();
        ui::print_sample_plan(&plan, &requested, workflow.record());

        if requested.is_empty() {
            // only phantoms or nothing left to sample
            let round = workflow.evaluate_round(Vec::new())?;
            ui::print_round(&round);
        } else {
            let paths = RecordPaths::new(config.audit_dir.clone());
            println!();
            println!(
                "Write the reviewed cards to {} and run 'riskaudit round' again.",
                paths.mvrs_file(plan.round).display()
            );
        }
        return Ok(());
    }

    let source = DirectoryMvrSource::new(RecordPaths::new(config.audit_dir.clone()));
    let round = workflow
        .run_round(&source)
        .await
        .context("Failed to evaluate round")?;
    ui::print_round(&round);
    Ok(())
}

/// Show what the next round would request, without drawing it.
pub fn cmd_estimate(config: &AuditConfig) -> Result<()> {
    let workflow = load_workflow(config)?;
    let plans = workflow.estimate();

    println!();
    println!("Estimated sample sizes for round {}", workflow.record().next_round());
    for plan in &plans {
        println!(
            "  {} {}  +{} -> {}",
            style(&plan.contest).bold(),
            plan.status,
            plan.estimated,
            plan.target
        );
        for a in &plan.assertions {
            let Some(est) = &a.estimate else {
                continue;
            };
            println!(
                "      {}{}  +{} (fail {:.1}%, deciles {:?})",
                assertion_icon(a.status),
                a.name,
                est.samples,
                est.fail_pct,
                est.deciles
            );
        }
    }
    println!();
    Ok(())
}
