//! Round orchestration: estimate, select, await review, evaluate, persist.

use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit_config::AuditToml;
use crate::election::{Card, ContestUnderAudit};
use crate::errors::{AuditError, ConfigError, DataError, RecordError};
use crate::estimate::{Estimator, PriorRound};
use crate::record::{AuditRecord, RecordStore, Removal};
use crate::risk::{Martingale, RiskParams};
use crate::sampler::{CardPairSampler, Sampler};
use crate::selection::{consistent_sample, contest_sample};
use crate::ui;
use crate::workflow::{
    AssertionRound, AssertionStatus, AuditRound, ContestRound, ContestStatus, MvrSource,
    RoundPhase, UnauditableReason,
};

/// Drives an audit record through its rounds.
///
/// The workflow is the record's only writer. With a store attached, every
/// sample plan, review set and outcome is persisted before the call that
/// produced it returns.
pub struct AuditWorkflow {
    record: AuditRecord,
    store: Option<RecordStore>,
    show_progress: bool,
}

impl AuditWorkflow {
    pub fn new(record: AuditRecord) -> Self {
        Self {
            record,
            store: None,
            show_progress: false,
        }
    }

    pub fn with_store(mut self, store: RecordStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Show a progress bar while estimating.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn record(&self) -> &AuditRecord {
        &self.record
    }

    pub fn into_record(self) -> AuditRecord {
        self.record
    }

    fn config(&self) -> &AuditToml {
        &self.record.config
    }

    /// Plan every contest for the next round without selecting cards.
    pub fn estimate(&self) -> Vec<ContestRound> {
        self.record
            .election()
            .contests
            .iter()
            .map(|cua| {
                let previous = self.record.last_round().and_then(|r| r.contest(cua.id()));
                self.plan_contest(cua, previous, self.config())
            })
            .collect()
    }

    /// Estimate, select and persist the sample plan for the next round.
    pub fn start_round(&mut self) -> Result<AuditRound, AuditError> {
        if let Some(pending) = &self.record.pending {
            return Err(RecordError::RoundInFlight {
                round: pending.round,
            }
            .into());
        }
        if self.record.is_complete() {
            return Err(RecordError::AuditComplete.into());
        }
        self.config().validate()?;

        let round_no = self.record.next_round();
        let started_at = Utc::now();
        info!(round = round_no, "Starting round");

        let mut contests = self.estimate();
        let targets: BTreeMap<String, usize> = contests
            .iter()
            .filter(|c| c.status == ContestStatus::InProgress)
            .map(|c| (c.contest.clone(), c.target))
            .collect();

        let selection = consistent_sample(&self.record.cards, &targets, &self.record.sampled_prns());
        for contest in contests.iter_mut() {
            if let Some(cutoff) = selection.cutoffs.get(&contest.contest) {
                contest.cutoff = Some(*cutoff);
            }
        }

        let round = AuditRound {
            round: round_no,
            started_at,
            ended_at: None,
            phase: RoundPhase::SamplesRequested,
            targets,
            contests,
            prns: selection.prns,
            new_prns: selection.new_prns,
            complete: false,
        };
        if let Some(store) = &self.store {
            store.save_plan(&round)?;
        }
        info!(
            round = round_no,
            sampled = round.prns.len(),
            new = round.new_prns.len(),
            "Sample plan ready"
        );
        self.record.pending = Some(round.clone());
        Ok(round)
    }

    /// Prns of the pending round that still need a manual review.
    ///
    /// Phantom cards are never reviewed.
    pub fn requested_prns(&self) -> Vec<u64> {
        let Some(round) = &self.record.pending else {
            return Vec::new();
        };
        let by_prn = self.record.card_by_prn();
        round
            .new_prns
            .iter()
            .filter(|prn| !self.record.mvrs.contains_key(prn))
            .filter(|prn| by_prn.get(prn).is_some_and(|c| !c.phantom))
            .copied()
            .collect()
    }

    /// Run one round: plan it (unless a plan is pending), wait for reviews
    /// from `source`, then evaluate.
    pub async fn run_round(&mut self, source: &dyn MvrSource) -> Result<AuditRound, AuditError> {
        if self.record.pending.is_none() {
            self.start_round()?;
        }
        let requested = self.requested_prns();
        let round_no = match self.record.pending.as_mut() {
            Some(round) => {
                round.phase = RoundPhase::AwaitingReview;
                if let Some(store) = &self.store {
                    store.save_plan(round)?;
                }
                round.round
            }
            None => return Err(anyhow!("No round to review").into()),
        };

        info!(round = round_no, cards = requested.len(), "Awaiting manual review");
        let mvrs = source.fetch(round_no, &requested).await?;
        self.evaluate_round(mvrs)
    }

    /// Evaluate the pending round against reviewed cards and persist the
    /// outcome.
    ///
    /// Every requested card must be reviewed. Data errors confined to one
    /// contest are recorded on that contest and do not stop the others.
    pub fn evaluate_round(&mut self, mvrs: Vec<Card>) -> Result<AuditRound, AuditError> {
        let mut round = self
            .record
            .pending
            .clone()
            .ok_or_else(|| anyhow!("No round awaiting review. Run `riskaudit round` to start one."))?;
        self.config().validate()?;
        let round_no = round.round;
        let by_prn = self.record.card_by_prn();

        let mut reviewed: BTreeMap<u64, Card> = BTreeMap::new();
        for mvr in mvrs {
            let card = by_prn
                .get(&mvr.prn)
                .ok_or(DataError::CardNotInManifest { prn: mvr.prn })?;
            card.check_matches(&mvr)?;
            reviewed.insert(mvr.prn, mvr);
        }
        // phantoms are worst case by definition
        for prn in &round.new_prns {
            if let Some(card) = by_prn.get(prn).filter(|c| c.phantom) {
                reviewed.entry(*prn).or_insert_with(|| (*card).clone());
            }
        }

        let missing: Vec<u64> = round
            .new_prns
            .iter()
            .filter(|p| !reviewed.contains_key(p) && !self.record.mvrs.contains_key(p))
            .copied()
            .collect();
        if let Some(first) = missing.first() {
            return Err(DataError::MissingMvrs {
                round: round_no,
                missing: missing.len(),
                first: *first,
            }
            .into());
        }

        let round_mvrs: Vec<Card> = round
            .new_prns
            .iter()
            .filter_map(|p| reviewed.remove(p))
            .collect();
        if !reviewed.is_empty() {
            warn!(
                round = round_no,
                extra = reviewed.len(),
                "Ignoring reviews for cards that were not requested"
            );
        }
        let mut all_mvrs = self.record.mvrs.clone();
        all_mvrs.extend(round_mvrs.iter().map(|c| (c.prn, c.clone())));

        let last_round = round_no >= self.config().rounds.max_rounds;
        for contest in round.contests.iter_mut() {
            if contest.status != ContestStatus::InProgress {
                continue;
            }
            let Some(cua) = self.record.election().contest(&contest.contest) else {
                continue;
            };
            let mut outcome =
                evaluate_contest(cua, contest, &self.record.cards, &all_mvrs, self.config(), round_no);
            if last_round && outcome.status == ContestStatus::InProgress {
                for a in outcome.assertions.iter_mut() {
                    if a.status == AssertionStatus::InProgress {
                        a.status = AssertionStatus::LimitReached;
                    }
                }
                outcome.settle();
            }
            if let Some(error) = &outcome.error {
                warn!(contest = %outcome.contest, error = %error, "Contest could not be evaluated");
            }
            debug!(contest = %outcome.contest, status = %outcome.status, samples = outcome.samples_used, "Evaluated contest");
            *contest = outcome;
        }

        round.complete = last_round || round.all_complete();
        round.phase = RoundPhase::Evaluated;
        round.ended_at = Some(Utc::now());

        if let Some(store) = &self.store {
            store.save_mvrs(round_no, &round_mvrs)?;
            store.save_outcome(&round)?;
        }
        info!(round = round_no, complete = round.complete, "Round evaluated");

        self.record.mvrs = all_mvrs;
        self.record.rounds.push(round.clone());
        self.record.pending = None;
        Ok(round)
    }

    /// Stop auditing a whole contest from the next round on.
    pub fn remove_contest(&mut self, contest: &str) -> Result<(), AuditError> {
        self.add_removal(contest, None)
    }

    /// Stop auditing one assertion from the next round on.
    pub fn remove_assertion(&mut self, contest: &str, index: usize) -> Result<(), AuditError> {
        self.add_removal(contest, Some(index))
    }

    fn add_removal(&mut self, contest: &str, assertion: Option<usize>) -> Result<(), AuditError> {
        if let Some(pending) = &self.record.pending {
            return Err(RecordError::RoundInFlight {
                round: pending.round,
            }
            .into());
        }
        let cua = self
            .record
            .election()
            .contest(contest)
            .ok_or_else(|| ConfigError::InvalidParameter {
                name: "contest".into(),
                message: format!("unknown contest {contest}"),
            })?;
        if let Some(index) = assertion {
            if !cua.assertions.iter().any(|a| a.index == index) {
                return Err(ConfigError::InvalidParameter {
                    name: "assertion".into(),
                    message: format!("contest {contest} has no assertion {index}"),
                }
                .into());
            }
        }

        self.record.removals.push(Removal {
            contest: contest.to_string(),
            assertion,
            at: Utc::now(),
        });
        if let Some(store) = &self.store {
            store.save_removals(&self.record.removals)?;
        }
        info!(contest, assertion = ?assertion, "Recorded auditor removal");
        Ok(())
    }

    /// Plan one contest for the next round.
    fn plan_contest(
        &self,
        cua: &ContestUnderAudit,
        previous: Option<&ContestRound>,
        config: &AuditToml,
    ) -> ContestRound {
        if let Some(prev) = previous.filter(|p| p.status.is_complete()) {
            return ContestRound {
                estimated: 0,
                ..prev.clone()
            };
        }

        let id = cua.id();
        let nc = cua.contest.nc.max(0) as usize;
        let samples_used = previous.map_or(0, |p| p.samples_used);
        let contest_removed = self
            .record
            .removals
            .iter()
            .any(|r| r.contest == id && r.assertion.is_none());

        let mut plan = ContestRound {
            contest: id.to_string(),
            estimated: 0,
            target: samples_used,
            samples_used,
            cutoff: previous.and_then(|p| p.cutoff),
            status: ContestStatus::InProgress,
            error: None,
            assertions: cua
                .assertions
                .iter()
                .map(|a| {
                    let prev = previous.and_then(|p| p.assertion(a.index));
                    let status = match prev.map(|p| p.status) {
                        Some(s) if s.is_final() => s,
                        _ if self.record.is_removed(id, a.index) => AssertionStatus::AuditorRemoved,
                        _ => AssertionStatus::InProgress,
                    };
                    AssertionRound {
                        index: a.index,
                        name: a.name(),
                        estimate: None,
                        status,
                        result: prev.and_then(|p| p.result.clone()),
                    }
                })
                .collect(),
        };
        if contest_removed {
            plan.status = ContestStatus::AuditorRemoved;
            return plan;
        }
        plan.settle();
        if plan.status.is_complete() {
            return plan;
        }
        if let Some(reason) = screen(cua, config) {
            info!(contest = id, reason = ?reason, "Contest cannot be audited by sampling");
            plan.status = ContestStatus::Unauditable { reason };
            return plan;
        }

        let pools = &self.record.election().pools;
        let mut estimated = 0;
        let mut failure = None;
        for pending in plan.assertions.iter_mut() {
            if pending.status != AssertionStatus::InProgress {
                continue;
            }
            let Some(assertion) = cua.assertions.iter().find(|a| a.index == pending.index) else {
                continue;
            };
            let prior = pending.p_value().map(|p_value| PriorRound {
                samples_used,
                p_value,
            });
            let bar = ui::estimation_bar(&pending.name, config.estimation.nsim, self.show_progress);
            let result = Estimator::new(config)
                .with_progress(bar.clone())
                .estimate_sample_size(&cua.contest, assertion, pools, prior);
            bar.finish_and_clear();
            match result {
                Ok(estimate) => {
                    estimated = estimated.max(estimate.samples);
                    pending.estimate = Some(estimate);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            warn!(contest = id, error = %e, "Estimation failed");
            plan.error = Some(e.to_string());
            plan.status = ContestStatus::Unauditable {
                reason: UnauditableReason::DataError,
            };
            return plan;
        }

        plan.estimated = estimated;
        plan.target = (samples_used + estimated).max(samples_used + 1).min(nc);
        let ceiling = sample_ceiling(config, nc);
        if plan.target > ceiling {
            info!(contest = id, target = plan.target, ceiling, "Sample ceiling exceeded");
            plan.status = ContestStatus::Unauditable {
                reason: UnauditableReason::CeilingExceeded,
            };
        }
        plan
    }
}

/// Largest sample a contest of `nc` cards may reach before escalation.
pub(crate) fn sample_ceiling(config: &AuditToml, nc: usize) -> usize {
    (config.rounds.max_sample_fraction * nc as f64).floor() as usize
}

/// Checks that escalate a contest before any sampling.
pub(crate) fn screen(cua: &ContestUnderAudit, config: &AuditToml) -> Option<UnauditableReason> {
    let margin = cua.min_margin().unwrap_or(0.0);
    if margin <= config.rounds.min_margin {
        return Some(UnauditableReason::MinMargin);
    }
    let nc = cua.contest.nc;
    if config.rounds.check_phantoms && nc > 0 && cua.contest.phantoms() as f64 / nc as f64 >= margin {
        return Some(UnauditableReason::TooManyPhantoms);
    }
    None
}

/// Test every in-progress assertion of a contest over its whole sample.
///
/// Pure; verification replays it against the persisted record.
pub fn evaluate_contest(
    cua: &ContestUnderAudit,
    plan: &ContestRound,
    cards: &[Card],
    mvrs: &BTreeMap<u64, Card>,
    config: &AuditToml,
    round: u32,
) -> ContestRound {
    let mut outcome = plan.clone();
    outcome.error = None;
    let Some(cutoff) = plan.cutoff else {
        return outcome;
    };
    let sample = contest_sample(cards, cua.id(), cutoff);
    outcome.samples_used = sample.len();

    match test_assertions(cua, &mut outcome, &sample, mvrs, config, round) {
        Ok(()) => outcome.settle(),
        Err(e) => {
            outcome.error = Some(e.to_string());
            outcome.status = ContestStatus::Unauditable {
                reason: UnauditableReason::DataError,
            };
        }
    }
    outcome
}

fn test_assertions(
    cua: &ContestUnderAudit,
    outcome: &mut ContestRound,
    sample: &[&Card],
    mvrs: &BTreeMap<u64, Card>,
    config: &AuditToml,
    round: u32,
) -> Result<(), AuditError> {
    let missing: Vec<u64> = sample
        .iter()
        .map(|c| c.prn)
        .filter(|prn| !mvrs.contains_key(prn))
        .collect();
    if let Some(first) = missing.first() {
        return Err(DataError::MissingMvrs {
            round,
            missing: missing.len(),
            first: *first,
        }
        .into());
    }
    let pairs: Vec<(&Card, &Card)> = sample
        .iter()
        .filter_map(|cvr| mvrs.get(&cvr.prn).map(|mvr| (mvr, *cvr)))
        .collect();

    let audit_type = config.audit.audit_type;
    let strategy = config.strategy();
    let population = cua.contest.nc.max(0) as usize;

    for round in outcome.assertions.iter_mut() {
        if round.status != AssertionStatus::InProgress {
            continue;
        }
        let Some(assertion) = cua.assertions.iter().find(|a| a.index == round.index) else {
            continue;
        };
        let kind = assertion.assort_kind(audit_type);
        let params = RiskParams::new(Some(population), kind.upper_bound(), config.audit.risk_limit)?;
        let (bet, tracker) = strategy.build(assertion, audit_type);
        let mut sampler = CardPairSampler::new(&kind, pairs.clone());
        let mut test = Martingale::with_tracker(params, bet, tracker);
        let result = test.test_h0(sampler.max_samples(), true, || sampler.sample())?;

        round.status = AssertionStatus::from_test(result.status);
        round.result = Some(result);
    }
    Ok(())
}
