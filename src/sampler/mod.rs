//! Samplers supply assort values to the test engine in draw order.

pub mod simulate;

use crate::assort::{AssortKind, SampleContext};
use crate::election::Card;
use crate::errors::DataError;

pub use simulate::{SimulatedPopulation, fuzz_card};

/// Ordered source of assort values for one assertion.
pub trait Sampler {
    fn sample(&mut self) -> Result<f64, DataError>;

    /// Values available before the sampler is exhausted.
    fn max_samples(&self) -> usize;

    /// Draws consumed so far.
    fn drawn(&self) -> usize;
}

/// Precomputed values, drawn in order.
#[derive(Debug, Clone)]
pub struct ValueSampler {
    values: Vec<f64>,
    idx: usize,
}

impl ValueSampler {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, idx: 0 }
    }
}

impl Sampler for ValueSampler {
    fn sample(&mut self) -> Result<f64, DataError> {
        let value = self
            .values
            .get(self.idx)
            .copied()
            .ok_or(DataError::SampleExhausted { drawn: self.idx })?;
        self.idx += 1;
        Ok(value)
    }

    fn max_samples(&self) -> usize {
        self.values.len()
    }

    fn drawn(&self) -> usize {
        self.idx
    }
}

/// Reviewed cards paired with their manifest entries, in draw order.
pub struct CardPairSampler<'a> {
    kind: &'a AssortKind,
    pairs: Vec<(&'a Card, &'a Card)>,
    idx: usize,
}

impl<'a> CardPairSampler<'a> {
    /// `pairs` are `(mvr, cvr)` in prn order.
    pub fn new(kind: &'a AssortKind, pairs: Vec<(&'a Card, &'a Card)>) -> Self {
        Self { kind, pairs, idx: 0 }
    }
}

impl Sampler for CardPairSampler<'_> {
    fn sample(&mut self) -> Result<f64, DataError> {
        let (mvr, cvr) = *self
            .pairs
            .get(self.idx)
            .ok_or(DataError::SampleExhausted { drawn: self.idx })?;
        self.idx += 1;
        self.kind.evaluate(&SampleContext { mvr, cvr })
    }

    fn max_samples(&self) -> usize {
        self.pairs.len()
    }

    fn drawn(&self) -> usize {
        self.idx
    }
}
