//! Sample size estimation by simulation.
//!
//! Each trial permutes a synthetic population that reproduces the reported
//! tallies (with injected errors), runs the sequential test on it with
//! early termination, and records how many draws it took. The estimate is
//! the draw count at the configured quantile over all trials.

use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;
use indicatif::ProgressBar;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::assort::{Assertion, AssortKind};
use crate::audit_config::{AuditToml, AuditType};
use crate::election::{CardPool, Contest};
use crate::errors::{AuditError, ConfigError, DataError};
use crate::risk::{ClcaErrorRates, Martingale, RiskParams};
use crate::sampler::simulate::{SimulatedPopulation, rate_values};
use crate::sampler::{Sampler, ValueSampler};

/// Errors injected into simulated reviews.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorModel {
    /// Every review matches its record.
    #[default]
    None,
    /// A fraction of reviewed cards have their vote changed.
    Fuzz { pct: f64 },
    /// Comparison errors at fixed rates. Polling audits ignore this model.
    Rates(ClcaErrorRates),
}

impl ErrorModel {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ErrorModel::None => Ok(()),
            ErrorModel::Fuzz { pct } if !(0.0..=1.0).contains(pct) => {
                Err(ConfigError::InvalidParameter {
                    name: "estimation.error_model.pct".into(),
                    message: format!("must lie in [0, 1], got {pct}"),
                })
            }
            ErrorModel::Fuzz { .. } => Ok(()),
            ErrorModel::Rates(rates) => {
                if rates.as_array().iter().any(|p| *p < 0.0) || rates.total() >= 1.0 {
                    return Err(ConfigError::InvalidParameter {
                        name: "estimation.error_model".into(),
                        message: "rates must be nonnegative and sum below 1".into(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Evidence carried over from earlier rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorRound {
    pub samples_used: usize,
    /// Last p-value of the test over those samples.
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub contest: String,
    pub assertion: usize,
    /// Additional samples needed at the configured quantile.
    pub samples: usize,
    /// Additional samples at the 10%, 20%, ..., 100% quantiles.
    pub deciles: Vec<usize>,
    /// Percentage of trials that did not confirm the outcome.
    pub fail_pct: f64,
    pub trials: usize,
}

/// Runs estimation trials on a bounded thread pool.
pub struct Estimator<'a> {
    config: &'a AuditToml,
    progress: Option<ProgressBar>,
}

impl<'a> Estimator<'a> {
    pub fn new(config: &'a AuditToml) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Advance `bar` once per finished trial.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Estimate the additional samples `assertion` needs.
    ///
    /// Trials that never confirm the outcome count as the full population.
    pub fn estimate_sample_size(
        &self,
        contest: &Contest,
        assertion: &Assertion,
        pools: &[CardPool],
        prior: Option<PriorRound>,
    ) -> Result<EstimationResult, AuditError> {
        let audit_type = self.config.audit.audit_type;
        let nsim = self.config.estimation.nsim;
        let seed = self.config.audit.seed;
        let population = contest.nc.max(0) as usize;
        let strategy = self.config.strategy();
        let kind = assertion.assort_kind(audit_type);

        let samples_used = prior.map_or(0, |p| p.samples_used);
        let max_samples = population.saturating_sub(samples_used);
        let starting_statistic = prior
            .map(|p| 1.0 / p.p_value)
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(1.0);
        let params = RiskParams::new(
            (!self.config.audit.with_replacement).then_some(population),
            kind.upper_bound(),
            self.config.audit.risk_limit,
        )?
        .with_starting_statistic(starting_statistic)
        .without_trace();

        let model = &self.config.estimation.error_model;
        let source = TrialSource::new(contest, assertion, audit_type, pools, model);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.estimation.nthreads)
            .build()
            .map_err(|e| anyhow!("Failed to build estimation thread pool: {e}"))?;

        let results: Mutex<Vec<Result<Option<usize>, DataError>>> = Mutex::new(Vec::with_capacity(nsim));
        pool.install(|| {
            (0..nsim).into_par_iter().for_each(|trial| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(trial_seed(
                    seed,
                    &contest.id,
                    assertion.index,
                    trial,
                ));
                let outcome = source
                    .values(&kind, self.config.audit.with_replacement, &mut rng)
                    .and_then(|values| {
                        let (strategy, tracker) = strategy.build(assertion, audit_type);
                        let mut sampler = ValueSampler::new(values);
                        let mut test = Martingale::with_tracker(params, strategy, tracker);
                        test.test_h0(max_samples, true, || sampler.sample())
                    })
                    .map(|result| result.status.rejects_null().then_some(result.sample_count));
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(outcome);
                if let Some(bar) = &self.progress {
                    bar.inc(1);
                }
            });
        });

        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut counts = Vec::with_capacity(results.len());
        let mut failures = 0;
        for outcome in results {
            match outcome? {
                Some(n) => counts.push(n),
                None => {
                    failures += 1;
                    counts.push(population);
                }
            }
        }
        counts.sort_unstable();

        let quantile = self.config.estimation.quantile;
        let result = EstimationResult {
            contest: contest.id.clone(),
            assertion: assertion.index,
            samples: quantile_of(&counts, quantile),
            deciles: (1..=10).map(|k| quantile_of(&counts, k as f64 / 10.0)).collect(),
            fail_pct: 100.0 * failures as f64 / counts.len().max(1) as f64,
            trials: counts.len(),
        };
        debug!(
            contest = %contest.id,
            assertion = assertion.index,
            samples = result.samples,
            fail_pct = result.fail_pct,
            "Estimated sample size"
        );
        Ok(result)
    }
}

/// What each trial permutes.
enum TrialSource {
    Cards { population: SimulatedPopulation, fuzz_pct: f64 },
    Values(Vec<f64>),
}

impl TrialSource {
    fn new(
        contest: &Contest,
        assertion: &Assertion,
        audit_type: AuditType,
        pools: &[CardPool],
        model: &ErrorModel,
    ) -> Self {
        match model {
            ErrorModel::Rates(rates) if audit_type.is_comparison() => TrialSource::Values(rate_values(
                assertion.noerror(),
                assertion.upper_bound(),
                rates,
                contest.ncast.max(0) as usize,
                contest.phantoms().max(0) as usize,
            )),
            _ => {
                let pools: &[CardPool] = if audit_type == AuditType::OneAudit { pools } else { &[] };
                let fuzz_pct = match model {
                    ErrorModel::Fuzz { pct } => *pct,
                    _ => 0.0,
                };
                TrialSource::Cards {
                    population: SimulatedPopulation::new(contest, pools),
                    fuzz_pct,
                }
            }
        }
    }

    fn values<R: Rng>(
        &self,
        kind: &AssortKind,
        with_replacement: bool,
        rng: &mut R,
    ) -> Result<Vec<f64>, DataError> {
        let mut values = match self {
            TrialSource::Cards {
                population,
                fuzz_pct,
            } => population.trial_values(kind, *fuzz_pct, rng)?,
            TrialSource::Values(values) => {
                let mut values = values.clone();
                values.shuffle(rng);
                values
            }
        };
        if with_replacement && !values.is_empty() {
            let n = values.len();
            values = (0..n).map(|_| values[rng.random_range(0..n)]).collect();
        }
        Ok(values)
    }
}

/// Seed for one trial, a function of the audit seed, contest, assertion
/// and trial index only.
fn trial_seed(seed: u64, contest: &str, assertion: usize, trial: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(contest.as_bytes());
    hasher.update((assertion as u64).to_le_bytes());
    hasher.update((trial as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Smallest value with at least `q` of `sorted` at or below it.
fn quantile_of(sorted: &[usize], q: f64) -> usize {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
