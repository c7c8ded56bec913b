//! Comparison assorter for hybrid audits where some cards are only known
//! through their pool's tallies.
//!
//! A pooled card has no individual record, so its `A(cvr)` is the pool's
//! average assort value, fixed when the audit started.

use std::collections::BTreeMap;

use crate::assort::{Assertion, ClcaAssorter};
use crate::election::Card;
use crate::errors::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct PooledAssorter {
    pub clca: ClcaAssorter,
    pub pool_averages: BTreeMap<String, f64>,
}

impl PooledAssorter {
    pub fn new(assertion: &Assertion) -> Self {
        PooledAssorter {
            clca: ClcaAssorter::new(assertion),
            pool_averages: assertion.pool_averages.clone(),
        }
    }

    pub fn upper_bound(&self) -> f64 {
        self.clca.upper_bound()
    }

    pub fn bassort(&self, mvr: &Card, cvr: &Card) -> Result<f64, DataError> {
        let Some(pool) = &cvr.pool else {
            return self.clca.bassort(mvr, cvr);
        };
        let average = self
            .pool_averages
            .get(pool)
            .copied()
            .ok_or_else(|| DataError::PoolInconsistent {
                pool: pool.clone(),
                message: format!(
                    "no frozen average for {} (card {})",
                    self.clca.assorter, cvr.prn
                ),
            })?;
        let overstatement = average - self.clca.mvr_assort(mvr);
        Ok(self.clca.scale(overstatement))
    }
}
