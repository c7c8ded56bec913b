//! Running statistics of the draws seen so far.

use serde::{Deserialize, Serialize};

/// Counts of comparison draws by overstatement category.
///
/// A draw `x` is classified by `τ = x / noerror` against the values a
/// comparison assorter can take for primitive upper bound `u`:
/// `0` (2-vote overstatement), `1 − ½/u` (1-vote overstatement),
/// `1 + ½/u` (1-vote understatement) and `2` (2-vote understatement).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub p2o: usize,
    pub p1o: usize,
    pub p1u: usize,
    pub p2u: usize,
}

impl ErrorCounts {
    pub fn total(&self) -> usize {
        self.p2o + self.p1o + self.p1u + self.p2u
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Classifier {
    noerror: f64,
    assort_upper: f64,
}

impl Classifier {
    fn classify(&self, x: f64, counts: &mut ErrorCounts) {
        let tau = x / self.noerror;
        let half = 0.5 / self.assort_upper;
        let near = |v: f64| (tau - v).abs() < 1e-9;
        if near(0.0) {
            counts.p2o += 1;
        } else if near(1.0 - half) {
            counts.p1o += 1;
        } else if near(1.0 + half) {
            counts.p1u += 1;
        } else if near(2.0) {
            counts.p2u += 1;
        }
    }
}

/// Welford mean/variance plus optional comparison error counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTracker {
    count: usize,
    sum: f64,
    mean: f64,
    m2: f64,
    last: Option<f64>,
    classifier: Option<Classifier>,
    errors: ErrorCounts,
}

impl SampleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that also counts comparison errors.
    pub fn with_error_counts(noerror: f64, assort_upper: f64) -> Self {
        SampleTracker {
            classifier: Some(Classifier {
                noerror,
                assort_upper,
            }),
            ..Self::default()
        }
    }

    pub fn add(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.last = Some(x);
        if let Some(classifier) = self.classifier {
            classifier.classify(x, &mut self.errors);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance of the draws (`M2 / n`).
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn errors(&self) -> ErrorCounts {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_direct_computation() {
        let xs = [0.2, 0.9, 0.4, 0.4, 1.0, 0.0];
        let mut t = SampleTracker::new();
        xs.iter().for_each(|x| t.add(*x));

        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert_eq!(t.count(), 6);
        assert!((t.mean() - mean).abs() < 1e-12);
        assert!((t.variance() - var).abs() < 1e-12);
        assert_eq!(t.last(), Some(0.0));
    }

    #[test]
    fn test_error_counts_for_plurality() {
        let noerror = 0.52;
        let mut t = SampleTracker::with_error_counts(noerror, 1.0);
        for tau in [1.0, 0.0, 0.5, 0.5, 1.5, 2.0, 1.0] {
            t.add(tau * noerror);
        }
        let e = t.errors();
        assert_eq!((e.p2o, e.p1o, e.p1u, e.p2u), (1, 2, 1, 1));
        assert_eq!(e.total(), 5);
    }

    #[test]
    fn test_error_counts_for_threshold_upper_bound() {
        let u = 1.0 / 1.2;
        let noerror = 0.6;
        let mut t = SampleTracker::with_error_counts(noerror, u);
        t.add((1.0 - 0.5 / u) * noerror);
        t.add((1.0 + 0.5 / u) * noerror);
        assert_eq!(t.errors().p1o, 1);
        assert_eq!(t.errors().p1u, 1);
    }
}
