//! Ballot cards, their cast vote records, and tally pools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DataError;

fn is_false(b: &bool) -> bool {
    !*b
}

/// One physical ballot card in the manifest, or its manual review.
///
/// A contest key in `votes` means the card contains that contest. The
/// candidate list is the cast vote record (or, for a reviewed card, what the
/// auditors read). Pooled cards carry contest keys with empty lists because
/// their votes are only known in aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub index: usize,
    pub location: String,
    #[serde(default)]
    pub prn: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub phantom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(default)]
    pub votes: BTreeMap<String, Vec<String>>,
}

impl Card {
    pub fn phantom(index: usize, contest: &str, seq: i64) -> Self {
        Card {
            index,
            location: format!("phantom-{contest}-{seq}"),
            prn: 0,
            phantom: true,
            pool: None,
            votes: BTreeMap::from([(contest.to_string(), Vec::new())]),
        }
    }

    pub fn has_contest(&self, contest: &str) -> bool {
        self.votes.contains_key(contest)
    }

    /// The candidates voted for in `contest`, if the card contains it.
    pub fn votes_in(&self, contest: &str) -> Option<&[String]> {
        self.votes.get(contest).map(Vec::as_slice)
    }

    /// Check that a reviewed card describes the same physical card.
    pub fn check_matches(&self, mvr: &Card) -> Result<(), DataError> {
        if self.prn != mvr.prn || self.location != mvr.location || self.phantom != mvr.phantom {
            return Err(DataError::MvrMismatch {
                prn: self.prn,
                message: format!(
                    "manifest has {} (phantom={}), review has {} (phantom={})",
                    self.location, self.phantom, mvr.location, mvr.phantom
                ),
            });
        }
        Ok(())
    }
}

/// Aggregate tallies for cards that have no individual cast vote record.
///
/// Frozen when the audit starts; the manifest must list exactly `ncards`
/// cards per contest for the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPool {
    pub id: String,
    /// Cards in the pool containing each contest.
    pub ncards: BTreeMap<String, i64>,
    /// Votes per candidate per contest.
    #[serde(default)]
    pub votes: BTreeMap<String, BTreeMap<String, i64>>,
}

impl CardPool {
    pub fn ncards_for(&self, contest: &str) -> i64 {
        self.ncards.get(contest).copied().unwrap_or(0)
    }

    pub fn votes_for(&self, contest: &str) -> BTreeMap<String, i64> {
        self.votes.get(contest).cloned().unwrap_or_default()
    }

    /// Check the pool's tallies against the manifest.
    pub fn check_consistent(&self, cards: &[Card]) -> Result<(), DataError> {
        for (contest, &ncards) in &self.ncards {
            let votes: i64 = self.votes.get(contest).map(|v| v.values().sum()).unwrap_or(0);
            if votes > ncards {
                return Err(DataError::PoolInconsistent {
                    pool: self.id.clone(),
                    message: format!("{votes} votes for {contest} but only {ncards} cards"),
                });
            }
            let listed = cards
                .iter()
                .filter(|c| c.pool.as_deref() == Some(self.id.as_str()) && c.has_contest(contest))
                .count() as i64;
            if listed != ncards {
                return Err(DataError::PoolInconsistent {
                    pool: self.id.clone(),
                    message: format!("manifest lists {listed} cards for {contest}, pool reports {ncards}"),
                });
            }
        }
        Ok(())
    }
}
