//! Plain-text reports printed by the CLI.

use console::style;

use crate::record::AuditRecord;
use crate::ui::icons::{CHECK, REVIEW, SAMPLE, WARN, assertion_icon, contest_icon};
use crate::verify::Discrepancy;
use crate::workflow::{AuditRound, ContestRound};

fn print_contest(contest: &ContestRound) {
    println!(
        "  {}{} {}  samples {}/{}",
        contest_icon(contest.status),
        style(&contest.contest).bold(),
        contest.status,
        contest.samples_used,
        contest.target
    );
    if let Some(error) = &contest.error {
        println!("      {}{}", WARN, style(error).yellow());
    }
    for a in &contest.assertions {
        let p = a
            .p_value()
            .map(|p| format!("p={p:.4}"))
            .unwrap_or_else(|| "p=-".into());
        let estimate = a
            .estimate
            .as_ref()
            .map(|e| format!("  est +{}", e.samples))
            .unwrap_or_default();
        println!("      {}{}  {}{}", assertion_icon(a.status), a.name, p, estimate);
    }
}

/// Cards the reviewers must pull for a freshly planned round.
pub fn print_sample_plan(round: &AuditRound, requested: &[u64], record: &AuditRecord) {
    println!();
    println!(
        "{}Round {} sample: {} card(s), {} new",
        SAMPLE,
        round.round,
        round.prns.len(),
        round.new_prns.len()
    );
    for contest in &round.contests {
        print_contest(contest);
    }
    if requested.is_empty() {
        return;
    }
    println!();
    println!("{}Cards to review:", REVIEW);
    let by_prn = record.card_by_prn();
    for prn in requested {
        if let Some(card) = by_prn.get(prn) {
            println!("  {:>20}  {}", prn, card.location);
        }
    }
}

pub fn print_round(round: &AuditRound) {
    println!();
    println!("Round {} evaluated", style(round.round).bold());
    for contest in &round.contests {
        print_contest(contest);
    }
    if round.complete {
        println!();
        println!("{}Audit complete", CHECK);
    }
}

pub fn print_status(record: &AuditRecord) {
    println!();
    println!("Audit {}", style(record.header.id).dim());
    println!(
        "  type {}  risk limit {}  seed {}",
        record.config.audit.audit_type, record.config.audit.risk_limit, record.header.prng.seed()
    );
    println!(
        "  {} contest(s), {} card(s), {} reviewed",
        record.election().contests.len(),
        record.cards.len(),
        record.mvrs.len()
    );

    match (&record.pending, record.last_round()) {
        (Some(pending), _) => {
            println!();
            println!(
                "Round {} awaiting review of {} card(s)",
                pending.round,
                pending.new_prns.len()
            );
        }
        (None, None) => {
            println!();
            println!("No rounds yet. Run `riskaudit round` to start one.");
        }
        (None, Some(_)) => {}
    }
    if let Some(last) = record.last_round() {
        print_round(last);
    }
}

pub fn print_discrepancies(found: &[Discrepancy]) {
    println!();
    if found.is_empty() {
        println!("{}Record verified: no discrepancies", CHECK);
        return;
    }
    println!("{}{} discrepancy(ies) found:", WARN, found.len());
    for d in found {
        println!("  - {d}");
    }
}
