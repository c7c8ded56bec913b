//! Sequential risk-testing engine.
//!
//! A test consumes bounded assort values one at a time and maintains a
//! nonnegative supermartingale `T_j` under the null hypothesis that the
//! population mean is at most `t`. By Ville's inequality the audit may stop
//! and confirm the outcome as soon as `1/T_j <= α`.
//!
//! | Module | Role |
//! |--------|------|
//! | `tracker` | running sums and error counts of previous draws |
//! | `alpha` | shrink-trunc (ALPHA) and fixed-η (SPRT) estimators |
//! | `betting` | fixed, AGRAPA and adaptive comparison bets |
//! | `engine` | the `test_h0` loop |
//! | `strategy` | configured strategy selection |

pub mod alpha;
pub mod betting;
pub mod engine;
pub mod strategy;
pub mod tracker;

use serde::{Deserialize, Serialize};

pub use alpha::{FixedEta, ShrinkTrunc};
pub use betting::{
    AdaptiveComparison, Agrapa, ClcaErrorRates, FixedBet, bounded_bet, max_bet, optimal_lambda,
};
pub use engine::{Martingale, RiskParams};
pub use strategy::StrategyConfig;
pub use tracker::SampleTracker;

/// Machine epsilon, used as the numeric tolerance around `0` and `u`.
pub const EPS: f64 = f64::EPSILON;

/// Outcome of a sequential test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestH0Status {
    /// `1/T_j <= α`: the reported outcome is confirmed.
    StatRejectNull,
    /// The sample sum alone exceeds `N·t`, or the full population was
    /// sampled and its mean exceeds `t`.
    SampleSumRejectNull,
    /// The remaining population cannot have mean above `t`.
    AcceptNull,
    /// The sample budget ran out without a decision.
    LimitReached,
}

impl TestH0Status {
    pub fn rejects_null(self) -> bool {
        matches!(
            self,
            TestH0Status::StatRejectNull | TestH0Status::SampleSumRejectNull
        )
    }
}

/// What the strategy chose before a draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Alternative mean `η_j` (ALPHA family).
    Eta(f64),
    /// Bet `λ_j` (betting family).
    Lambda(f64),
}

impl Step {
    pub fn value(self) -> f64 {
        match self {
            Step::Eta(v) | Step::Lambda(v) => v,
        }
    }

    /// Clamp the choice so every term is positive for `x ∈ [0, u]`.
    ///
    /// Bets are held in `[0, (1 − ε)/m_j]`; alternatives in `(0, u)`.
    pub fn bounded(self, mj: f64, upper: f64) -> Step {
        match self {
            Step::Lambda(lambda) => Step::Lambda(bounded_bet(lambda, mj)),
            Step::Eta(eta) if eta.is_nan() => Step::Eta(mj),
            Step::Eta(eta) => Step::Eta(eta.clamp(upper * EPS, upper * (1.0 - EPS))),
        }
    }
}

/// One row of the test statistic trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub j: usize,
    pub x: f64,
    pub m: f64,
    pub step: Step,
    pub term: f64,
    pub t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestH0Result {
    pub status: TestH0Status,
    /// Draws consumed by the test.
    pub sample_count: usize,
    pub p_value_last: f64,
    pub p_value_min: f64,
    pub sample_mean: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceStep>,
}

/// Strategy choosing `η_j` or `λ_j` from draws `1..j−1` only.
pub trait MartingaleStrategy: Send {
    /// `mj` is the working mean under the null for the coming draw.
    fn next_step(&mut self, prev: &SampleTracker, mj: f64) -> Step;
}

/// Mean of the not-yet-drawn population if the null holds with equality.
///
/// `m_j = (N·t − S_{j−1}) / (N − j + 1)` for sampling without replacement
/// from a finite population, otherwise `t`.
pub fn population_mean_if_h0(population: Option<usize>, t: f64, prev: &SampleTracker) -> f64 {
    match population {
        Some(n) => {
            let remaining = n as f64 - prev.count() as f64;
            if remaining <= 0.0 {
                return t;
            }
            (n as f64 * t - prev.sum()) / remaining
        }
        None => t,
    }
}

pub(crate) fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_population_mean_recursion() {
        let x = [1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let expected = [0.5, 0.416_666_67, 0.5, 0.375, 0.166_666_67, 0.25, 0.5];
        let mut tracker = SampleTracker::new();
        for (xi, want) in x.iter().zip(expected) {
            let m = population_mean_if_h0(Some(7), 0.5, &tracker);
            assert!((m - want).abs() < 1e-6, "got {m}, want {want}");
            tracker.add(*xi);
        }
    }

    #[test]
    fn test_with_replacement_mean_is_constant() {
        let mut tracker = SampleTracker::new();
        tracker.add(1.0);
        tracker.add(1.0);
        assert_eq!(population_mean_if_h0(None, 0.5, &tracker), 0.5);
    }

    #[test]
    fn test_bounded_step_keeps_terms_positive() {
        let mj = 0.8;
        let Step::Lambda(lambda) = Step::Lambda(1.9).bounded(mj, 1.0) else {
            panic!("bet stays a bet");
        };
        assert!(1.0 + lambda * (0.0 - mj) > 0.0);
        assert_eq!(Step::Lambda(-0.3).bounded(mj, 1.0), Step::Lambda(0.0));

        let Step::Eta(eta) = Step::Eta(1.0).bounded(0.5, 1.0) else {
            panic!("eta stays an eta");
        };
        assert!(eta > 0.0 && eta < 1.0);
        assert!(Step::Eta(0.0).bounded(0.5, 1.0).value() > 0.0);
    }

    #[test]
    fn test_status_rejects_null() {
        assert!(TestH0Status::StatRejectNull.rejects_null());
        assert!(TestH0Status::SampleSumRejectNull.rejects_null());
        assert!(!TestH0Status::LimitReached.rejects_null());
        assert!(!TestH0Status::AcceptNull.rejects_null());
    }
}
