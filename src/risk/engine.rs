//! The sequential test loop.

use tracing::trace;

use crate::errors::{ConfigError, DataError};
use crate::risk::{
    MartingaleStrategy, SampleTracker, Step, TestH0Result, TestH0Status, TraceStep, is_close,
    population_mean_if_h0,
};

/// Parameters shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskParams {
    /// Population size for sampling without replacement; `None` samples
    /// with replacement.
    pub population: Option<usize>,
    /// Upper bound `u` on assort values.
    pub upper: f64,
    /// Null mean `t`.
    pub t: f64,
    pub risk_limit: f64,
    /// `T_0`, used to continue a test from an earlier round.
    pub starting_statistic: f64,
    pub record_trace: bool,
}

impl RiskParams {
    pub fn new(population: Option<usize>, upper: f64, risk_limit: f64) -> Result<Self, ConfigError> {
        if !(risk_limit > 0.0 && risk_limit < 1.0) {
            return Err(ConfigError::InvalidRiskLimit { value: risk_limit });
        }
        if !(upper > 0.0 && upper.is_finite()) {
            return Err(ConfigError::InvalidParameter {
                name: "upper".into(),
                message: format!("upper bound must be positive, got {upper}"),
            });
        }
        Ok(RiskParams {
            population,
            upper,
            t: 0.5,
            risk_limit,
            starting_statistic: 1.0,
            record_trace: true,
        })
    }

    pub fn with_t(mut self, t: f64) -> Self {
        self.t = t;
        self
    }

    pub fn with_starting_statistic(mut self, statistic: f64) -> Self {
        self.starting_statistic = statistic;
        self
    }

    pub fn without_trace(mut self) -> Self {
        self.record_trace = false;
        self
    }
}

/// A nonnegative supermartingale test driven by a strategy.
pub struct Martingale<S> {
    params: RiskParams,
    strategy: S,
    tracker: SampleTracker,
}

impl<S: MartingaleStrategy> Martingale<S> {
    pub fn new(params: RiskParams, strategy: S) -> Self {
        Self::with_tracker(params, strategy, SampleTracker::new())
    }

    /// Use a tracker that also counts comparison errors.
    pub fn with_tracker(params: RiskParams, strategy: S, tracker: SampleTracker) -> Self {
        Martingale {
            params,
            strategy,
            tracker,
        }
    }

    pub fn tracker(&self) -> &SampleTracker {
        &self.tracker
    }

    /// Draw up to `max_samples` values and test the null.
    ///
    /// The strategy's choice for draw `j` is fixed before `next_sample` is
    /// called. With `terminate_early` the test stops at the first rejection.
    pub fn test_h0<F>(
        &mut self,
        max_samples: usize,
        terminate_early: bool,
        mut next_sample: F,
    ) -> Result<TestH0Result, DataError>
    where
        F: FnMut() -> Result<f64, DataError>,
    {
        let RiskParams {
            population,
            upper,
            t,
            risk_limit,
            starting_statistic,
            record_trace,
        } = self.params;
        let max_samples = population.map_or(max_samples, |n| max_samples.min(n));

        let mut statistic = starting_statistic;
        let mut p_value_last = p_value(statistic);
        let mut p_value_min = p_value_last;
        let mut trace_steps = Vec::new();
        let mut bound_status = None;
        let mut drawn = 0;

        while drawn < max_samples {
            let mj = population_mean_if_h0(population, t, &self.tracker);
            if mj < 0.0 {
                bound_status = Some(TestH0Status::SampleSumRejectNull);
                break;
            }
            if mj > upper {
                bound_status = Some(TestH0Status::AcceptNull);
                break;
            }

            let step = self.strategy.next_step(&self.tracker, mj).bounded(mj, upper);
            let x = next_sample()?;
            if !(0.0..=upper + 1e-12).contains(&x) {
                return Err(DataError::AssortOutOfRange { value: x, upper });
            }
            drawn += 1;

            let term = if is_close(mj, 0.0) || is_close(mj, upper) {
                1.0
            } else {
                match step {
                    Step::Eta(eta) => (x * eta / mj + (upper - x) * (upper - eta) / (upper - mj)) / upper,
                    Step::Lambda(lambda) => 1.0 + lambda * (x - mj),
                }
            };
            if !(term > 0.0) {
                return Err(DataError::NonPositiveTerm { j: drawn, term });
            }
            if term < 1e-12 {
                trace!(j = drawn, x, mj, step = step.value(), "Test statistic stalled");
            }

            statistic *= term;
            self.tracker.add(x);
            p_value_last = p_value(statistic);
            p_value_min = p_value_min.min(p_value_last);

            if record_trace {
                trace_steps.push(TraceStep {
                    j: drawn,
                    x,
                    m: mj,
                    step,
                    term,
                    t: statistic,
                });
            }

            if terminate_early && p_value_last <= risk_limit {
                break;
            }
        }

        let status = if let Some(status) = bound_status {
            status
        } else if population == Some(self.tracker.count()) {
            if self.tracker.mean() > t {
                TestH0Status::SampleSumRejectNull
            } else {
                TestH0Status::AcceptNull
            }
        } else if p_value_last <= risk_limit {
            TestH0Status::StatRejectNull
        } else {
            TestH0Status::LimitReached
        };

        Ok(TestH0Result {
            status,
            sample_count: drawn,
            p_value_last,
            p_value_min,
            sample_mean: self.tracker.mean(),
            trace: trace_steps,
        })
    }
}

/// `1/T`, capped at 1. A statistic that is not positive carries no
/// evidence against the null.
fn p_value(statistic: f64) -> f64 {
    if statistic > 0.0 {
        (1.0 / statistic).min(1.0)
    } else {
        1.0
    }
}

impl MartingaleStrategy for Box<dyn MartingaleStrategy> {
    fn next_step(&mut self, prev: &SampleTracker, mj: f64) -> Step {
        (**self).next_step(prev, mj)
    }
}
