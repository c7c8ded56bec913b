//! Card-level comparison (overstatement) assorter.
//!
//! For a primitive assorter `A` with upper bound `u` and reported diluted
//! margin `v`, the overstatement of card `i` is `ω = A(cvr) − A(mvr)` and
//!
//! ```text
//! B(mvr, cvr) = (1 − ω/u) / (2 − v/u) = (1 − ω/u) · noerror
//! ```
//!
//! which lies in `[0, 2·noerror]` and has mean above 1/2 exactly when the
//! assertion holds for the reviewed cards.

use crate::assort::{Assertion, Assorter, PrimitiveAssorter};
use crate::election::Card;
use crate::errors::DataError;

#[derive(Debug, Clone, PartialEq)]
pub struct ClcaAssorter {
    pub assorter: PrimitiveAssorter,
    pub reported_margin: f64,
    pub noerror: f64,
}

impl ClcaAssorter {
    pub fn new(assertion: &Assertion) -> Self {
        ClcaAssorter {
            assorter: assertion.assorter.clone(),
            reported_margin: assertion.reported_margin(),
            noerror: assertion.noerror(),
        }
    }

    pub fn upper_bound(&self) -> f64 {
        2.0 * self.noerror
    }

    fn contest(&self) -> &str {
        self.assorter.contest()
    }

    /// Assort value of the reviewed card. A phantom, or a card the
    /// manifest says contains the contest but the review does not, counts
    /// as a vote for the loser.
    pub(crate) fn mvr_assort(&self, mvr: &Card) -> f64 {
        if mvr.phantom || !mvr.has_contest(self.contest()) {
            0.0
        } else {
            self.assorter.assort(mvr, false)
        }
    }

    /// `ω = A(cvr) − A(mvr)`. A phantom record assorts to 1/2.
    pub fn overstatement_error(&self, mvr: &Card, cvr: &Card) -> Result<f64, DataError> {
        if !cvr.has_contest(self.contest()) {
            return Err(DataError::MissingCvr {
                prn: cvr.prn,
                contest: self.contest().to_string(),
            });
        }
        let cvr_assort = if cvr.phantom {
            0.5
        } else {
            self.assorter.assort(cvr, false)
        };
        Ok(cvr_assort - self.mvr_assort(mvr))
    }

    pub fn bassort(&self, mvr: &Card, cvr: &Card) -> Result<f64, DataError> {
        let overstatement = self.overstatement_error(mvr, cvr)?;
        Ok(self.scale(overstatement))
    }

    pub(crate) fn scale(&self, overstatement: f64) -> f64 {
        (1.0 - overstatement / self.assorter.upper_bound()) * self.noerror
    }
}
