//! ALPHA estimators of the alternative mean `η_j`.

use crate::risk::{EPS, MartingaleStrategy, SampleTracker, Step};

/// Truncated shrinkage estimator.
///
/// The sample mean is shrunk towards `eta0` with weight `d`, optionally
/// towards `u` with weight `f / sd`, then truncated to
/// `[m_j + c/sqrt(d + j − 1), u·(1 − ε)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShrinkTrunc {
    pub eta0: f64,
    pub upper: f64,
    pub c: f64,
    /// Prior weight. `f64::INFINITY` pins the estimate at `eta0`.
    pub d: f64,
    pub f: f64,
    pub minsd: f64,
}

impl ShrinkTrunc {
    /// Defaults: `c = (η0 − t)/2`, `d = 100`, no shrinkage towards `u`.
    pub fn new(eta0: f64, t: f64, upper: f64) -> Self {
        ShrinkTrunc {
            eta0,
            upper,
            c: ((eta0 - t) / 2.0).max(EPS),
            d: 100.0,
            f: 0.0,
            minsd: 1e-6,
        }
    }

    pub fn with_d(mut self, d: f64) -> Self {
        self.d = d;
        self
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c.max(EPS);
        self
    }

    pub fn with_f(mut self, f: f64) -> Self {
        self.f = f;
        self
    }

    pub fn eta(&self, prev: &SampleTracker, mj: f64) -> f64 {
        let cap_above = self.upper * (1.0 - EPS);
        if self.d.is_infinite() {
            return self.eta0.max(mj).min(cap_above);
        }

        let dj1 = self.d + prev.count() as f64;
        let shrunk = (self.d * self.eta0 + prev.sum()) / dj1;
        let est = if self.f > 0.0 {
            let sd = if prev.count() < 2 {
                1.0
            } else {
                prev.variance().sqrt().max(self.minsd)
            };
            (shrunk + self.upper * self.f / sd) / (1.0 + self.f / sd)
        } else {
            shrunk
        };
        let cap_below = mj + self.c / dj1.sqrt();
        est.max(cap_below).min(cap_above)
    }
}

impl MartingaleStrategy for ShrinkTrunc {
    fn next_step(&mut self, prev: &SampleTracker, mj: f64) -> Step {
        Step::Eta(self.eta(prev, mj))
    }
}

/// Fixed alternative `η0`: the sequential probability ratio test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedEta {
    pub eta0: f64,
}

impl MartingaleStrategy for FixedEta {
    fn next_step(&mut self, _prev: &SampleTracker, _mj: f64) -> Step {
        Step::Eta(self.eta0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_estimate_is_truncated_prior() {
        let st = ShrinkTrunc::new(0.6, 0.5, 1.0);
        let eta = st.eta(&SampleTracker::new(), 0.5);
        // est = eta0, cap_below = 0.5 + 0.05/10
        assert!((eta - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_shrinks_towards_sample_mean() {
        let st = ShrinkTrunc::new(0.6, 0.5, 1.0).with_d(10.0);
        let mut prev = SampleTracker::new();
        for _ in 0..10 {
            prev.add(1.0);
        }
        let eta = st.eta(&prev, 0.45);
        assert!((eta - (10.0 * 0.6 + 10.0) / 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_never_below_null_mean() {
        let st = ShrinkTrunc::new(0.55, 0.5, 1.0).with_d(1.0);
        let mut prev = SampleTracker::new();
        for _ in 0..20 {
            prev.add(0.0);
        }
        let mj = 0.6;
        let eta = st.eta(&prev, mj);
        assert!(eta > mj);
    }

    #[test]
    fn test_estimate_capped_below_upper_bound() {
        let st = ShrinkTrunc::new(0.999_999_999_999, 0.5, 1.0).with_d(1.0);
        let mut prev = SampleTracker::new();
        prev.add(1.0);
        assert!(st.eta(&prev, 0.5) < 1.0);
    }

    #[test]
    fn test_infinite_prior_weight_pins_estimate() {
        let st = ShrinkTrunc::new(0.7, 0.5, 1.0).with_d(f64::INFINITY);
        let mut prev = SampleTracker::new();
        prev.add(0.0);
        prev.add(0.0);
        assert_eq!(st.eta(&prev, 0.5), 0.7);
    }
}
