//! Independent re-verification of a persisted audit record.
//!
//! Everything an auditor's claims rest on is recomputed from the frozen
//! inputs: prns from the seed, assertions from the reported tallies,
//! samples from the targets, and every test from the reviewed cards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::assort::make_assertions;
use crate::election::{CardPool, ContestUnderAudit};
use crate::record::AuditRecord;
use crate::selection::consistent_sample;
use crate::workflow::orchestrator::{sample_ceiling, screen};
use crate::workflow::{
    AssertionStatus, AuditRound, ContestRound, ContestStatus, UnauditableReason, evaluate_contest,
};

const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Card index or prn does not follow from the seed.
    Manifest,
    /// Reported mean or pool average does not follow from the tallies.
    Assertion,
    Pool,
    /// Round numbering or sampled prns do not follow from the targets.
    Sample,
    MissingMvr,
    /// Replaying the test gives a different result.
    Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contest: Option<String>,
    pub kind: DiscrepancyKind,
    pub message: String,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(round) = self.round {
            write!(f, "round {round}: ")?;
        }
        if let Some(contest) = &self.contest {
            write!(f, "{contest}: ")?;
        }
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Recompute the record and list every way it disagrees with itself.
///
/// An empty result means the record is internally consistent.
pub fn verify(record: &AuditRecord) -> Vec<Discrepancy> {
    let mut found = Vec::new();
    check_manifest(record, &mut found);
    check_assertions(record, &mut found);

    let mut previous: BTreeSet<u64> = BTreeSet::new();
    let mut prior: Option<&AuditRound> = None;
    for (i, round) in record.rounds.iter().enumerate() {
        let expected = i as u32 + 1;
        if round.round != expected {
            found.push(Discrepancy {
                round: Some(round.round),
                contest: None,
                kind: DiscrepancyKind::Sample,
                message: format!("expected round {expected}"),
            });
        }
        check_selection(record, round, &previous, &mut found);
        check_mvrs(record, round, &mut found);
        check_outcomes(record, round, prior, &mut found);
        previous = round.prns.iter().copied().collect();
        prior = Some(round);
    }

    debug!(discrepancies = found.len(), "Verified audit record");
    found
}

fn check_manifest(record: &AuditRecord, found: &mut Vec<Discrepancy>) {
    let prng = &record.header.prng;
    for (position, card) in record.cards.iter().enumerate() {
        if card.index != position {
            found.push(Discrepancy {
                round: None,
                contest: None,
                kind: DiscrepancyKind::Manifest,
                message: format!("card {} has index {}, expected {position}", card.location, card.index),
            });
        }
        let prn = prng.prn(card.index as u64);
        if card.prn != prn {
            found.push(Discrepancy {
                round: None,
                contest: None,
                kind: DiscrepancyKind::Manifest,
                message: format!("card {} has prn {}, seed gives {prn}", card.location, card.prn),
            });
        }
    }
}

fn check_assertions(record: &AuditRecord, found: &mut Vec<Discrepancy>) {
    let election = record.election();
    for pool in &election.pools {
        if let Err(e) = pool.check_consistent(&record.cards) {
            found.push(Discrepancy {
                round: None,
                contest: None,
                kind: DiscrepancyKind::Pool,
                message: e.to_string(),
            });
        }
    }

    let pools: BTreeMap<&str, &CardPool> = election.pools.iter().map(|p| (p.id.as_str(), p)).collect();
    for cua in &election.contests {
        let id = Some(cua.id().to_string());
        let recomputed = match make_assertions(&cua.contest, &pools) {
            Ok(a) => a,
            Err(e) => {
                found.push(Discrepancy {
                    round: None,
                    contest: id,
                    kind: DiscrepancyKind::Assertion,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if recomputed.len() != cua.assertions.len() {
            found.push(Discrepancy {
                round: None,
                contest: id,
                kind: DiscrepancyKind::Assertion,
                message: format!(
                    "record has {} assertions, tallies give {}",
                    cua.assertions.len(),
                    recomputed.len()
                ),
            });
            continue;
        }
        for (stored, fresh) in cua.assertions.iter().zip(&recomputed) {
            if (stored.reported_mean - fresh.reported_mean).abs() > TOLERANCE {
                found.push(Discrepancy {
                    round: None,
                    contest: id.clone(),
                    kind: DiscrepancyKind::Assertion,
                    message: format!(
                        "{} reported mean {} recomputes to {}",
                        stored.name(),
                        stored.reported_mean,
                        fresh.reported_mean
                    ),
                });
            }
            let pools_match = stored.pool_averages.len() == fresh.pool_averages.len()
                && stored.pool_averages.iter().all(|(pool, avg)| {
                    fresh
                        .pool_averages
                        .get(pool)
                        .is_some_and(|f| (f - avg).abs() <= TOLERANCE)
                });
            if !pools_match {
                found.push(Discrepancy {
                    round: None,
                    contest: id.clone(),
                    kind: DiscrepancyKind::Pool,
                    message: format!("{} pool averages do not match pool tallies", stored.name()),
                });
            }
        }
    }
}

fn check_selection(
    record: &AuditRecord,
    round: &AuditRound,
    previous: &BTreeSet<u64>,
    found: &mut Vec<Discrepancy>,
) {
    let mut sample = |message: String| {
        found.push(Discrepancy {
            round: Some(round.round),
            contest: None,
            kind: DiscrepancyKind::Sample,
            message,
        })
    };

    let sampled: BTreeSet<u64> = round.prns.iter().copied().collect();
    if !previous.is_subset(&sampled) {
        sample("sample drops cards sampled in an earlier round".into());
    }
    let new: Vec<u64> = sampled.difference(previous).copied().collect();
    if new != round.new_prns {
        sample(format!(
            "{} new prns recorded, sample adds {}",
            round.new_prns.len(),
            new.len()
        ));
    }

    let replay = consistent_sample(&record.cards, &round.targets, previous);
    if replay.prns != round.prns {
        sample(format!(
            "targets select {} cards, record has {}",
            replay.prns.len(),
            round.prns.len()
        ));
    }
    for contest in round.contests.iter().filter(|c| round.targets.contains_key(&c.contest)) {
        let expected = replay.cutoffs.get(&contest.contest).copied();
        if contest.cutoff != expected {
            found.push(Discrepancy {
                round: Some(round.round),
                contest: Some(contest.contest.clone()),
                kind: DiscrepancyKind::Sample,
                message: format!("cutoff {:?}, targets give {expected:?}", contest.cutoff),
            });
        }
    }
}

fn check_mvrs(record: &AuditRecord, round: &AuditRound, found: &mut Vec<Discrepancy>) {
    let missing: Vec<u64> = round
        .new_prns
        .iter()
        .filter(|prn| !record.mvrs.contains_key(prn))
        .copied()
        .collect();
    if let Some(first) = missing.first() {
        found.push(Discrepancy {
            round: Some(round.round),
            contest: None,
            kind: DiscrepancyKind::MissingMvr,
            message: format!("{} sampled card(s) never reviewed, first prn {first}", missing.len()),
        });
    }
}

fn outcome_discrepancy(round: u32, contest: Option<&str>, message: String) -> Discrepancy {
    Discrepancy {
        round: Some(round),
        contest: contest.map(str::to_string),
        kind: DiscrepancyKind::Outcome,
        message,
    }
}

/// What planning must have decided for a contest before any test ran.
enum Planned {
    /// Complete before the round; carried over unchanged.
    Carried(ContestRound),
    /// Settled without sampling.
    Settled(ContestStatus),
    /// Estimated, then sampled unless the ceiling was exceeded.
    Estimated,
}

fn check_outcomes(
    record: &AuditRecord,
    round: &AuditRound,
    prior: Option<&AuditRound>,
    found: &mut Vec<Discrepancy>,
) {
    let last_round = round.round >= record.config.rounds.max_rounds;
    for cua in &record.election().contests {
        if round.contest(cua.id()).is_none() {
            found.push(outcome_discrepancy(
                round.round,
                Some(cua.id()),
                "contest is missing from the round".into(),
            ));
        }
    }

    for stored in &round.contests {
        let id = stored.contest.as_str();
        let Some(cua) = record.election().contest(id) else {
            found.push(outcome_discrepancy(
                round.round,
                Some(id),
                "contest is not part of the election".into(),
            ));
            continue;
        };
        let listed: Vec<usize> = stored.assertions.iter().map(|a| a.index).collect();
        let expected: Vec<usize> = cua.assertions.iter().map(|a| a.index).collect();
        if listed != expected {
            found.push(outcome_discrepancy(
                round.round,
                Some(id),
                format!("round lists assertions {listed:?}, contest has {expected:?}"),
            ));
            continue;
        }

        let previous = prior.and_then(|r| r.contest(id));
        let target = round.targets.get(id).copied();
        match planned(record, round, cua, stored, previous) {
            Planned::Carried(prev) => {
                if target.is_some() {
                    found.push(outcome_discrepancy(
                        round.round,
                        Some(id),
                        "complete contest was sampled again".into(),
                    ));
                }
                compare_outcome(round.round, stored, &prev, found);
            }
            Planned::Settled(status) => {
                if target.is_some() {
                    found.push(outcome_discrepancy(
                        round.round,
                        Some(id),
                        format!("{status} contest was sampled"),
                    ));
                }
                if stored.status != status {
                    found.push(outcome_discrepancy(
                        round.round,
                        Some(id),
                        format!("status {}, planning gives {status}", stored.status),
                    ));
                }
            }
            Planned::Estimated => match target {
                Some(target) => {
                    if target != stored.target {
                        found.push(outcome_discrepancy(
                            round.round,
                            Some(id),
                            format!("sampled to {target}, contest records target {}", stored.target),
                        ));
                    }
                    let plan = replay_plan(record, round, cua, stored, previous);
                    let mut replay =
                        evaluate_contest(cua, &plan, &record.cards, &record.mvrs, &record.config, round.round);
                    if last_round && replay.status == ContestStatus::InProgress {
                        for a in replay.assertions.iter_mut() {
                            if a.status == AssertionStatus::InProgress {
                                a.status = AssertionStatus::LimitReached;
                            }
                        }
                        replay.settle();
                    }
                    compare_outcome(round.round, stored, &replay, found);
                }
                None => check_unsampled(record, round.round, cua, stored, previous, found),
            },
        }
    }

    let complete = last_round || round.all_complete();
    if round.complete != complete {
        found.push(outcome_discrepancy(
            round.round,
            None,
            format!("round marked complete={}, contests give {complete}", round.complete),
        ));
    }
}

/// Rebuild the planning decision for one contest of a round.
fn planned(
    record: &AuditRecord,
    round: &AuditRound,
    cua: &ContestUnderAudit,
    stored: &ContestRound,
    previous: Option<&ContestRound>,
) -> Planned {
    if let Some(prev) = previous.filter(|p| p.status.is_complete()) {
        return Planned::Carried(prev.clone());
    }
    let contest_removed = record
        .removals
        .iter()
        .any(|r| r.at <= round.started_at && r.contest == cua.id() && r.assertion.is_none());
    if contest_removed {
        return Planned::Settled(ContestStatus::AuditorRemoved);
    }
    let mut plan = replay_plan(record, round, cua, stored, previous);
    plan.settle();
    if plan.status.is_complete() {
        return Planned::Settled(plan.status);
    }
    if let Some(reason) = screen(cua, &record.config) {
        return Planned::Settled(ContestStatus::Unauditable { reason });
    }
    Planned::Estimated
}

/// An estimated contest left out of the sample must have hit the ceiling
/// or failed estimation.
fn check_unsampled(
    record: &AuditRecord,
    round: u32,
    cua: &ContestUnderAudit,
    stored: &ContestRound,
    previous: Option<&ContestRound>,
    found: &mut Vec<Discrepancy>,
) {
    let id = Some(cua.id());
    match stored.status {
        ContestStatus::Unauditable {
            reason: UnauditableReason::CeilingExceeded,
        } => {
            let nc = cua.contest.nc.max(0) as usize;
            let used = previous.map_or(0, |p| p.samples_used);
            let estimated = stored
                .assertions
                .iter()
                .filter_map(|a| a.estimate.as_ref().map(|e| e.samples))
                .max()
                .unwrap_or(0);
            let target = (used + estimated).max(used + 1).min(nc);
            let ceiling = sample_ceiling(&record.config, nc);
            if stored.samples_used != used || stored.estimated != estimated || stored.target != target {
                found.push(outcome_discrepancy(
                    round,
                    id,
                    format!(
                        "target {} from {} estimated, estimates give {target} from {estimated}",
                        stored.target, stored.estimated
                    ),
                ));
            } else if target <= ceiling {
                found.push(outcome_discrepancy(
                    round,
                    id,
                    format!("target {target} is within the ceiling {ceiling}"),
                ));
            }
        }
        // estimation failures keep their message and are not replayed
        ContestStatus::Unauditable {
            reason: UnauditableReason::DataError,
        } if stored.error.is_some() => {}
        status => found.push(outcome_discrepancy(
            round,
            id,
            format!("{status} without being sampled"),
        )),
    }
}

/// Rebuild the plan an outcome was evaluated from.
fn replay_plan(
    record: &AuditRecord,
    round: &AuditRound,
    cua: &ContestUnderAudit,
    outcome: &ContestRound,
    previous: Option<&ContestRound>,
) -> ContestRound {
    let mut plan = outcome.clone();
    plan.status = ContestStatus::InProgress;
    plan.error = None;
    for a in plan.assertions.iter_mut() {
        let before = previous.and_then(|p| p.assertion(a.index)).map(|p| p.status);
        let removed = record
            .removals
            .iter()
            .any(|r| r.at <= round.started_at && r.covers(cua.id(), a.index));
        a.status = match before {
            Some(s) if s.is_final() => s,
            _ if removed => AssertionStatus::AuditorRemoved,
            _ => AssertionStatus::InProgress,
        };
        if a.status == AssertionStatus::InProgress {
            a.result = None;
        }
    }
    plan
}

fn compare_outcome(
    round: u32,
    stored: &ContestRound,
    replay: &ContestRound,
    found: &mut Vec<Discrepancy>,
) {
    let mut outcome = |message: String| {
        found.push(Discrepancy {
            round: Some(round),
            contest: Some(stored.contest.clone()),
            kind: DiscrepancyKind::Outcome,
            message,
        })
    };

    if stored.status != replay.status {
        outcome(format!("status {} replays as {}", stored.status, replay.status));
    }
    if stored.samples_used != replay.samples_used {
        outcome(format!(
            "{} samples used, replay uses {}",
            stored.samples_used, replay.samples_used
        ));
    }
    for (s, r) in stored.assertions.iter().zip(&replay.assertions) {
        if s.status != r.status {
            outcome(format!("{} is {}, replays as {}", s.name, s.status, r.status));
        }
        match (&s.result, &r.result) {
            (Some(s_res), Some(r_res)) => {
                if s_res.sample_count != r_res.sample_count
                    || (s_res.p_value_last - r_res.p_value_last).abs() > TOLERANCE
                {
                    outcome(format!(
                        "{} p={} after {} draws, replay p={} after {}",
                        s.name, s_res.p_value_last, s_res.sample_count, r_res.p_value_last, r_res.sample_count
                    ));
                }
            }
            (None, None) => {}
            _ => outcome(format!("{} test result present on only one side", s.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_config::{AuditToml, AuditType};
    use crate::election::contest::tests::plurality;
    use crate::election::{Card, ElectionDef, prepare};
    use crate::selection::PrnGenerator;
    use crate::workflow::AuditWorkflow;

    fn mayor_def(alice: usize, bob: usize) -> ElectionDef {
        let mut cards = Vec::new();
        for (vote, n) in [("alice", alice), ("bob", bob)] {
            for _ in 0..n {
                cards.push(Card {
                    index: 0,
                    location: format!("b{}", cards.len()),
                    prn: 0,
                    phantom: false,
                    pool: None,
                    votes: BTreeMap::from([("mayor".to_string(), vec![vote.to_string()])]),
                });
            }
        }
        let total = (alice + bob) as i64;
        ElectionDef {
            contests: vec![plurality(
                "mayor",
                &[("alice", alice as i64), ("bob", bob as i64)],
                total,
                0,
            )],
            cards,
            pools: Vec::new(),
        }
    }

    fn first_round(def: ElectionDef, config: AuditToml) -> AuditRecord {
        let prng = PrnGenerator::new(config.audit.seed);
        let (election, cards) = prepare(def, &prng).unwrap();

        let mut wf = AuditWorkflow::new(AuditRecord::new(config, election, cards, prng));
        wf.start_round().unwrap();
        let by_prn = wf.record().card_by_prn();
        let reviews: Vec<Card> = wf
            .requested_prns()
            .iter()
            .map(|p| (*by_prn[p]).clone())
            .collect();
        wf.evaluate_round(reviews).unwrap();
        wf.into_record()
    }

    fn audited_record() -> AuditRecord {
        let mut config = AuditToml::default();
        config.audit.audit_type = AuditType::Clca;
        config.estimation.nsim = 10;
        first_round(mayor_def(600, 400), config)
    }

    /// Claim `status` for mayor in round 1 as if it had never been sampled.
    fn forge_unsampled(status: ContestStatus, assertion: AssertionStatus) -> AuditRecord {
        let mut record = audited_record();
        let round = &mut record.rounds[0];
        round.targets.clear();
        round.prns.clear();
        round.new_prns.clear();
        round.complete = true;
        let mayor = round.contest_mut("mayor").unwrap();
        mayor.status = status;
        mayor.cutoff = None;
        mayor.samples_used = 0;
        for a in mayor.assertions.iter_mut() {
            a.status = assertion;
            a.result = None;
        }
        record.mvrs.clear();
        record
    }

    #[test]
    fn test_clean_record_verifies() {
        let record = audited_record();
        assert_eq!(record.rounds.len(), 1);
        assert!(verify(&record).is_empty());
    }

    #[test]
    fn test_tampered_prn_is_flagged() {
        let mut record = audited_record();
        record.cards[3].prn ^= 1;
        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::Manifest));
    }

    #[test]
    fn test_altered_review_changes_outcome() {
        let mut record = audited_record();
        let prn = record.rounds[0].new_prns[0];
        let mvr = record.mvrs.get_mut(&prn).unwrap();
        let flipped = if mvr.votes_in("mayor") == Some(&["alice".to_string()][..]) {
            "bob"
        } else {
            "alice"
        };
        mvr.votes.insert("mayor".into(), vec![flipped.to_string()]);

        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::Outcome));
    }

    #[test]
    fn test_dropped_review_is_flagged() {
        let mut record = audited_record();
        let prn = record.rounds[0].new_prns[0];
        record.mvrs.remove(&prn);
        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::MissingMvr));
    }

    #[test]
    fn test_edited_reported_mean_is_flagged() {
        let mut record = audited_record();
        record.header.election.contests[0].assertions[0].reported_mean += 0.01;
        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::Assertion));
    }

    #[test]
    fn test_unsampled_contest_cannot_claim_a_final_status() {
        let forgeries = [
            (ContestStatus::Proved, AssertionStatus::Proved),
            (ContestStatus::AuditorRemoved, AssertionStatus::AuditorRemoved),
            (
                ContestStatus::Unauditable {
                    reason: UnauditableReason::MinMargin,
                },
                AssertionStatus::InProgress,
            ),
        ];
        for (status, assertion) in forgeries {
            let found = verify(&forge_unsampled(status, assertion));
            assert!(
                found
                    .iter()
                    .any(|d| d.kind == DiscrepancyKind::Outcome && d.contest.as_deref() == Some("mayor")),
                "{status} was accepted: {found:?}"
            );
        }
    }

    #[test]
    fn test_ceiling_escalation_verifies_against_the_ceiling() {
        let mut config = AuditToml::default();
        config.estimation.nsim = 10;
        config.rounds.max_sample_fraction = 0.1;
        let mut record = first_round(mayor_def(505, 495), config);
        assert_eq!(
            record.rounds[0].contest("mayor").unwrap().status,
            ContestStatus::Unauditable {
                reason: UnauditableReason::CeilingExceeded
            }
        );
        assert!(verify(&record).is_empty());

        // the same estimate fits under a full-population ceiling
        record.config.rounds.max_sample_fraction = 1.0;
        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::Outcome));
    }

    #[test]
    fn test_round_completion_flag_is_checked() {
        let mut record = audited_record();
        record.rounds[0].complete = false;
        let found = verify(&record);
        assert!(found.iter().any(|d| d.kind == DiscrepancyKind::Outcome && d.contest.is_none()));
    }
}
