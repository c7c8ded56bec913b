//! Betting strategies: `term_j = 1 + λ_j (x_j − m_j)`.

use serde::{Deserialize, Serialize};

use crate::risk::{MartingaleStrategy, SampleTracker, Step};

/// Slack kept below `1/m_j` so `1 − λ·m_j` stays positive.
const BET_MARGIN: f64 = 1e-9;

/// Largest bet with `1 + λ(x − m_j) > 0` for every `x ≥ 0`.
pub fn max_bet(mj: f64) -> f64 {
    if mj > 0.0 {
        (1.0 - BET_MARGIN) / mj
    } else {
        f64::MAX
    }
}

/// `λ` clamped to `[0, max_bet(m_j)]`; NaN bets nothing.
pub fn bounded_bet(lambda: f64, mj: f64) -> f64 {
    if lambda.is_nan() {
        return 0.0;
    }
    lambda.clamp(0.0, max_bet(mj))
}

/// Constant bet, reduced where the working mean makes it unsafe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBet {
    pub lambda: f64,
}

impl MartingaleStrategy for FixedBet {
    fn next_step(&mut self, _prev: &SampleTracker, mj: f64) -> Step {
        Step::Lambda(bounded_bet(self.lambda, mj))
    }
}

/// Approximate GRAPA bet.
///
/// `λ_j = max(0, min((μ̂ − m_j) / (σ̂² + (μ̂ − m_j)²), c_j / m_j))` where
/// `c_j` grows from `c0` towards `c_max` as draws accumulate. `c_max < 1`
/// keeps every term positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Agrapa {
    pub lambda_init: f64,
    pub c0: f64,
    pub c_max: f64,
    pub c_grow: f64,
}

impl Agrapa {
    pub fn bet(&self, prev: &SampleTracker, mj: f64) -> f64 {
        let n = prev.count();
        if n == 0 {
            return bounded_bet(self.lambda_init, mj);
        }
        let diff = prev.mean() - mj;
        let denom = prev.variance() + diff * diff;
        let lam = if denom > 0.0 { diff / denom } else { 0.0 };
        let c = self.c0 + (self.c_max - self.c0) * (1.0 - 1.0 / (1.0 + self.c_grow * (n as f64).sqrt()));
        bounded_bet(lam.min(c / mj), mj)
    }
}

impl MartingaleStrategy for Agrapa {
    fn next_step(&mut self, prev: &SampleTracker, mj: f64) -> Step {
        Step::Lambda(self.bet(prev, mj))
    }
}

/// Rates of the four comparison error categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClcaErrorRates {
    #[serde(default)]
    pub p2o: f64,
    #[serde(default)]
    pub p1o: f64,
    #[serde(default)]
    pub p1u: f64,
    #[serde(default)]
    pub p2u: f64,
}

impl ClcaErrorRates {
    pub fn total(&self) -> f64 {
        self.p2o + self.p1o + self.p1u + self.p2u
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.p2o, self.p1o, self.p1u, self.p2u]
    }
}

/// Comparison assort values, as multiples of `noerror`, for each error
/// category and primitive upper bound `u`.
pub fn error_taus(assort_upper: f64) -> [f64; 4] {
    let half = 0.5 / assort_upper;
    [0.0, 1.0 - half, 1.0 + half, 2.0]
}

/// Bet maximising `E[ln(1 + λ(X − m))]` when `X` takes `noerror·τ_k` with
/// probability `p_k` and `noerror` otherwise.
///
/// Searched on `[0, min(2, 1/m))` by golden section; the objective is
/// concave in `λ`.
pub fn optimal_lambda(noerror: f64, assort_upper: f64, rates: &ClcaErrorRates, mj: f64) -> f64 {
    let taus = error_taus(assort_upper);
    let ps = rates.as_array();
    let p0 = (1.0 - rates.total()).max(0.0);
    let objective = |lam: f64| {
        let mut value = p0 * (1.0 + lam * (noerror - mj)).ln();
        for (p, tau) in ps.iter().zip(taus) {
            if *p > 0.0 {
                value += p * (1.0 + lam * (noerror * tau - mj)).ln();
            }
        }
        value
    };
    let hi = if mj > 0.0 { (1.0 / mj).min(2.0) } else { 2.0 };
    golden_section_max(objective, 0.0, hi * (1.0 - 1e-9), 1e-7)
}

fn golden_section_max(f: impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, tol: f64) -> f64 {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let mut a = hi - ratio * (hi - lo);
    let mut b = lo + ratio * (hi - lo);
    let mut fa = f(a);
    let mut fb = f(b);
    while hi - lo > tol {
        if fa < fb {
            lo = a;
            a = b;
            fa = fb;
            b = lo + ratio * (hi - lo);
            fb = f(b);
        } else {
            hi = b;
            b = a;
            fb = fa;
            a = hi - ratio * (hi - lo);
            fa = f(a);
        }
    }
    (lo + hi) / 2.0
}

/// Kelly-optimal comparison bet with error rates learned from the draws.
///
/// Each rate is a shrink-trunc estimate anchored at its a priori value:
/// `p̃ = max((d·p + n·p̂) / (d + n − 1), ε)` after `n` draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveComparison {
    pub noerror: f64,
    pub assort_upper: f64,
    pub apriori: ClcaErrorRates,
    pub d: f64,
    pub eps: f64,
}

impl AdaptiveComparison {
    pub fn estimated_rates(&self, prev: &SampleTracker) -> ClcaErrorRates {
        let n = prev.count();
        if n == 0 {
            return self.apriori;
        }
        let counts = prev.errors();
        let nf = n as f64;
        let estimate = |apriori: f64, count: usize| {
            let rate = count as f64 / nf;
            ((self.d * apriori + nf * rate) / (self.d + nf - 1.0))
                .max(self.eps)
                .min(1.0)
        };
        ClcaErrorRates {
            p2o: estimate(self.apriori.p2o, counts.p2o),
            p1o: estimate(self.apriori.p1o, counts.p1o),
            p1u: estimate(self.apriori.p1u, counts.p1u),
            p2u: estimate(self.apriori.p2u, counts.p2u),
        }
    }
}

impl MartingaleStrategy for AdaptiveComparison {
    fn next_step(&mut self, prev: &SampleTracker, mj: f64) -> Step {
        let rates = self.estimated_rates(prev);
        Step::Lambda(optimal_lambda(self.noerror, self.assort_upper, &rates, mj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agrapa_uses_initial_bet_before_samples() {
        let a = Agrapa {
            lambda_init: 0.7,
            c0: 0.6,
            c_max: 0.9,
            c_grow: 2.0,
        };
        assert_eq!(a.bet(&SampleTracker::new(), 0.5), 0.7);
    }

    #[test]
    fn test_agrapa_is_capped_and_nonnegative() {
        let a = Agrapa {
            lambda_init: 0.5,
            c0: 0.6,
            c_max: 0.9,
            c_grow: 2.0,
        };
        let mut prev = SampleTracker::new();
        prev.add(1.0);
        prev.add(1.0);
        // zero variance: the raw bet is 1/(mean − m), capped at c_j/m
        let c = 0.6 + 0.3 * (1.0 - 1.0 / (1.0 + 2.0 * 2f64.sqrt()));
        assert!((a.bet(&prev, 0.5) - c / 0.5).abs() < 1e-12);

        let mut low = SampleTracker::new();
        low.add(0.0);
        low.add(0.1);
        assert_eq!(a.bet(&low, 0.5), 0.0);
    }

    #[test]
    fn test_agrapa_terms_stay_positive() {
        let a = Agrapa {
            lambda_init: 0.5,
            c0: 0.6,
            c_max: 0.99,
            c_grow: 10.0,
        };
        let mut prev = SampleTracker::new();
        for _ in 0..500 {
            prev.add(1.0);
        }
        let mj = 0.4;
        let lam = a.bet(&prev, mj);
        assert!(1.0 + lam * (0.0 - mj) > 0.0);
    }

    #[test]
    fn test_initial_bet_is_capped_by_working_mean() {
        let a = Agrapa {
            lambda_init: 3.0,
            c0: 0.6,
            c_max: 0.9,
            c_grow: 2.0,
        };
        let mj = 0.5;
        let lam = a.bet(&SampleTracker::new(), mj);
        assert!(lam < 1.0 / mj);
        assert!(1.0 + lam * (0.0 - mj) > 0.0);
    }

    #[test]
    fn test_fixed_bet_shrinks_when_working_mean_rises() {
        let mut bet = FixedBet { lambda: 1.9 };
        let tracker = SampleTracker::new();
        assert_eq!(bet.next_step(&tracker, 0.5), Step::Lambda(1.9));
        for mj in [0.6, 0.8, 0.95] {
            let lam = bet.next_step(&tracker, mj).value();
            assert!(1.0 - lam * mj > 0.0, "mj {mj} gives bet {lam}");
        }
        assert_eq!(bounded_bet(f64::NAN, 0.5), 0.0);
    }

    #[test]
    fn test_optimal_lambda_without_errors_approaches_max() {
        let noerror = 1.0 / 1.9;
        let lam = optimal_lambda(noerror, 1.0, &ClcaErrorRates::default(), 0.5);
        assert!(lam > 1.99, "got {lam}");
    }

    #[test]
    fn test_optimal_lambda_decreases_with_overstatements() {
        let noerror = 1.0 / 1.9;
        let few = ClcaErrorRates {
            p1o: 0.001,
            ..Default::default()
        };
        let many = ClcaErrorRates {
            p1o: 0.01,
            p2o: 0.001,
            ..Default::default()
        };
        let a = optimal_lambda(noerror, 1.0, &few, 0.5);
        let b = optimal_lambda(noerror, 1.0, &many, 0.5);
        assert!(b < a, "{b} should be below {a}");
        assert!(b > 0.0);
    }

    #[test]
    fn test_golden_section_finds_quadratic_peak() {
        let x = golden_section_max(|x| -(x - 0.3) * (x - 0.3), 0.0, 2.0, 1e-9);
        assert!((x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rate_estimates_shrink_towards_prior() {
        let noerror = 0.52;
        let strategy = AdaptiveComparison {
            noerror,
            assort_upper: 1.0,
            apriori: ClcaErrorRates {
                p1o: 0.01,
                ..Default::default()
            },
            d: 100.0,
            eps: 1e-5,
        };
        let mut prev = SampleTracker::with_error_counts(noerror, 1.0);
        for _ in 0..10 {
            prev.add(noerror);
        }
        let rates = strategy.estimated_rates(&prev);
        assert!((rates.p1o - 100.0 * 0.01 / 109.0).abs() < 1e-12);
        assert_eq!(rates.p2o, 1e-5);
    }
}
