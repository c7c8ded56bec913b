//! Election definition: contests, the card manifest, and tally pools.
//!
//! The operator supplies an `ElectionDef` (usually `election.json`). At init
//! it is validated, phantom cards are added for every contest whose `Nc`
//! exceeds the cards in the manifest, each card receives its prn, and the
//! assertions for every contest are derived from the reported tallies.
//!
//! ```json
//! {
//!   "contests": [
//!     { "id": "mayor", "choice_function": { "kind": "plurality" },
//!       "candidates": ["alice", "bob"], "votes": { "alice": 60, "bob": 35 },
//!       "nc": 100 }
//!   ],
//!   "cards": [ { "location": "box1-0001", "votes": { "mayor": ["alice"] } } ],
//!   "pools": []
//! }
//! ```

pub mod card;
pub mod contest;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use card::{Card, CardPool};
pub use contest::{ChoiceFunction, Contest};

use crate::assort::{Assertion, make_assertions};
use crate::errors::{ConfigError, DataError};
use crate::selection::PrnGenerator;

/// Election as supplied by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectionDef {
    pub contests: Vec<Contest>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub pools: Vec<CardPool>,
}

impl ElectionDef {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read election file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse election file {}", path.display()))
    }
}

/// A contest together with the assertions that must all be proved for its
/// reported outcome to be confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestUnderAudit {
    pub contest: Contest,
    pub assertions: Vec<Assertion>,
}

impl ContestUnderAudit {
    pub fn id(&self) -> &str {
        &self.contest.id
    }

    /// The assertion with the smallest reported margin.
    pub fn min_margin(&self) -> Option<f64> {
        self.assertions
            .iter()
            .map(Assertion::reported_margin)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// The frozen election an audit runs against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    pub contests: Vec<ContestUnderAudit>,
    #[serde(default)]
    pub pools: Vec<CardPool>,
}

impl Election {
    pub fn contest(&self, id: &str) -> Option<&ContestUnderAudit> {
        self.contests.iter().find(|c| c.id() == id)
    }

    pub fn pool(&self, id: &str) -> Option<&CardPool> {
        self.pools.iter().find(|p| p.id == id)
    }
}

/// Validate the definition, add phantoms, assign prns, and derive assertions.
///
/// Returns the election and the full card manifest (phantoms included),
/// indexed in manifest order.
pub fn prepare(def: ElectionDef, prng: &PrnGenerator) -> Result<(Election, Vec<Card>)> {
    let ElectionDef {
        mut contests,
        mut cards,
        pools,
    } = def;

    let mut seen = BTreeSet::new();
    for contest in &contests {
        if !seen.insert(contest.id.clone()) {
            return Err(ConfigError::DuplicateContest {
                contest: contest.id.clone(),
            }
            .into());
        }
    }

    for contest in &mut contests {
        contest.ncast = cards
            .iter()
            .filter(|c| !c.phantom && c.has_contest(&contest.id))
            .count() as i64;
        contest.validate()?;
    }

    for pool in &pools {
        pool.check_consistent(&cards)?;
    }
    for card in &cards {
        if let Some(pool) = &card.pool {
            if !pools.iter().any(|p| &p.id == pool) {
                return Err(DataError::PoolInconsistent {
                    pool: pool.clone(),
                    message: format!("card {} references an undefined pool", card.location),
                }
                .into());
            }
        }
    }

    for contest in &contests {
        for seq in 0..contest.phantoms() {
            cards.push(Card::phantom(0, &contest.id, seq));
        }
        if contest.phantoms() > 0 {
            debug!(contest = %contest.id, phantoms = contest.phantoms(), "Added phantom cards");
        }
    }

    for (index, card) in cards.iter_mut().enumerate() {
        card.index = index;
        card.prn = prng.prn(index as u64);
    }

    let pool_map: BTreeMap<&str, &CardPool> = pools.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut audited = Vec::with_capacity(contests.len());
    for contest in contests {
        let assertions = make_assertions(&contest, &pool_map)?;
        if assertions.is_empty() {
            return Err(ConfigError::NoAssertions {
                contest: contest.id.clone(),
            }
            .into());
        }
        audited.push(ContestUnderAudit {
            contest,
            assertions,
        });
    }

    info!(
        contests = audited.len(),
        cards = cards.len(),
        pools = pools.len(),
        "Prepared election"
    );
    Ok((
        Election {
            contests: audited,
            pools,
        },
        cards,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::contest::tests::plurality;

    fn card(location: &str, contest: &str, vote: &str) -> Card {
        Card {
            index: 0,
            location: location.into(),
            prn: 0,
            phantom: false,
            pool: None,
            votes: BTreeMap::from([(contest.to_string(), vec![vote.to_string()])]),
        }
    }

    fn small_def() -> ElectionDef {
        ElectionDef {
            contests: vec![plurality("mayor", &[("alice", 3), ("bob", 1)], 6, 0)],
            cards: vec![
                card("a", "mayor", "alice"),
                card("b", "mayor", "alice"),
                card("c", "mayor", "alice"),
                card("d", "mayor", "bob"),
            ],
            pools: Vec::new(),
        }
    }

    #[test]
    fn test_prepare_adds_phantoms_and_prns() {
        let (election, cards) = prepare(small_def(), &PrnGenerator::new(12345)).unwrap();
        assert_eq!(cards.len(), 6);
        assert_eq!(cards.iter().filter(|c| c.phantom).count(), 2);
        for (i, c) in cards.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_ne!(c.prn, 0);
        }
        let mayor = election.contest("mayor").unwrap();
        assert_eq!(mayor.contest.ncast, 4);
        assert_eq!(mayor.contest.phantoms(), 2);
        assert_eq!(mayor.assertions.len(), 1);
    }

    #[test]
    fn test_prepare_rejects_duplicate_contest() {
        let mut def = small_def();
        def.contests.push(def.contests[0].clone());
        let err = prepare(def, &PrnGenerator::new(1)).unwrap_err();
        assert!(err.to_string().contains("Duplicate contest"));
    }

    #[test]
    fn test_prepare_rejects_manifest_larger_than_nc() {
        let mut def = small_def();
        def.contests[0].nc = 3;
        assert!(prepare(def, &PrnGenerator::new(1)).is_err());
    }

    #[test]
    fn test_prepare_rejects_contest_without_loser() {
        let mut def = small_def();
        def.contests[0] = plurality("mayor", &[("alice", 4)], 6, 0);
        def.cards.pop();
        def.cards.push(card("d", "mayor", "alice"));
        let err = prepare(def, &PrnGenerator::new(1)).unwrap_err();
        assert!(err.to_string().contains("no assertions"));
    }

    #[test]
    fn test_prepare_rejects_unknown_pool() {
        let mut def = small_def();
        def.cards[0].pool = Some("ghost".into());
        let err = prepare(def, &PrnGenerator::new(1)).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
