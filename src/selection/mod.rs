//! Card prns and consistent sampling.
//!
//! Every card gets one pseudo-random number from the audit seed and its
//! manifest index. Cards are sampled in prn order, so the sample for a
//! contest is always a prefix of that contest's cards sorted by prn, and a
//! later round only ever extends it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::election::Card;

/// Seeded prn source scoped to one audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrnGenerator {
    seed: u64,
}

impl PrnGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// First eight bytes (little endian) of `SHA-256(seed ‖ index)`.
    pub fn prn(&self, index: u64) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(index.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// Result of one consistent sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Every sampled prn (previous rounds included), ascending.
    pub prns: Vec<u64>,
    /// Prns not sampled in any previous round, ascending.
    pub new_prns: Vec<u64>,
    /// Largest prn in each targeted contest's sample.
    pub cutoffs: BTreeMap<String, u64>,
    /// Cards in each targeted contest's sample.
    pub counts: BTreeMap<String, usize>,
}

/// Walk the manifest in prn order, taking a card if it was sampled before or
/// if it contains a contest still short of its target.
///
/// `targets` holds the total sample size wanted per contest, previous
/// rounds included.
pub fn consistent_sample(
    cards: &[Card],
    targets: &BTreeMap<String, usize>,
    previous: &BTreeSet<u64>,
) -> Selection {
    let mut order: Vec<&Card> = cards.iter().collect();
    order.sort_by_key(|c| c.prn);

    let mut counts: BTreeMap<String, usize> = targets.keys().map(|c| (c.clone(), 0)).collect();
    let mut cutoffs = BTreeMap::new();
    let mut selection = Selection::default();
    let mut previous_left = previous.len();

    for card in order {
        let short = |contest: &String| {
            card.has_contest(contest) && counts[contest] < targets[contest]
        };
        let was_sampled = previous.contains(&card.prn);
        let needed = targets.keys().any(short);
        if !was_sampled && !needed {
            continue;
        }

        for (contest, count) in counts.iter_mut() {
            if card.has_contest(contest) && *count < targets[contest] {
                *count += 1;
                cutoffs.insert(contest.clone(), card.prn);
            }
        }
        selection.prns.push(card.prn);
        if was_sampled {
            previous_left -= 1;
        } else {
            selection.new_prns.push(card.prn);
        }

        let all_met = counts.iter().all(|(c, n)| *n >= targets[c]);
        if all_met && previous_left == 0 {
            break;
        }
    }

    selection.cutoffs = cutoffs;
    selection.counts = counts;
    selection
}

/// The draw sequence for a contest: cards containing it with prn at or
/// below the cutoff, in prn order.
pub fn contest_sample<'a>(cards: &'a [Card], contest: &str, cutoff: u64) -> Vec<&'a Card> {
    let mut sample: Vec<&Card> = cards
        .iter()
        .filter(|c| c.prn <= cutoff && c.has_contest(contest))
        .collect();
    sample.sort_by_key(|c| c.prn);
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(n: usize, contests: &[&str], every: usize) -> Vec<Card> {
        let prng = PrnGenerator::new(2024);
        (0..n)
            .map(|i| {
                let mut votes = BTreeMap::new();
                votes.insert(contests[0].to_string(), Vec::new());
                for c in &contests[1..] {
                    if i % every == 0 {
                        votes.insert(c.to_string(), Vec::new());
                    }
                }
                Card {
                    index: i,
                    location: format!("card-{i}"),
                    prn: prng.prn(i as u64),
                    phantom: false,
                    pool: None,
                    votes,
                }
            })
            .collect()
    }

    #[test]
    fn test_prn_is_deterministic_and_seed_dependent() {
        let a = PrnGenerator::new(1);
        let b = PrnGenerator::new(2);
        assert_eq!(a.prn(10), a.prn(10));
        assert_ne!(a.prn(10), a.prn(11));
        assert_ne!(a.prn(10), b.prn(10));
    }

    #[test]
    fn test_contest_sample_meets_target() {
        let cards = manifest(500, &["mayor", "council"], 5);
        let targets = BTreeMap::from([("mayor".to_string(), 20), ("council".to_string(), 10)]);
        let s = consistent_sample(&cards, &targets, &BTreeSet::new());

        assert_eq!(s.counts["mayor"], 20);
        assert_eq!(s.counts["council"], 10);
        assert_eq!(contest_sample(&cards, "council", s.cutoffs["council"]).len(), 10);
        // the council sample forces extra mayor cards into the union
        assert!(s.prns.len() >= 20);
        assert_eq!(s.prns, s.new_prns);
    }

    #[test]
    fn test_contest_sample_is_prn_prefix() {
        let cards = manifest(300, &["mayor", "council"], 3);
        let targets = BTreeMap::from([("council".to_string(), 15)]);
        let s = consistent_sample(&cards, &targets, &BTreeSet::new());

        let mut council: Vec<u64> = cards
            .iter()
            .filter(|c| c.has_contest("council"))
            .map(|c| c.prn)
            .collect();
        council.sort();
        let sample: Vec<u64> = contest_sample(&cards, "council", s.cutoffs["council"])
            .iter()
            .map(|c| c.prn)
            .collect();
        assert_eq!(sample, council[..15].to_vec());
    }

    #[test]
    fn test_samples_grow_monotonically() {
        let cards = manifest(400, &["mayor", "council"], 4);
        let first = consistent_sample(
            &cards,
            &BTreeMap::from([("mayor".to_string(), 10), ("council".to_string(), 5)]),
            &BTreeSet::new(),
        );
        let previous: BTreeSet<u64> = first.prns.iter().copied().collect();
        let second = consistent_sample(
            &cards,
            &BTreeMap::from([("mayor".to_string(), 30), ("council".to_string(), 12)]),
            &previous,
        );

        let later: BTreeSet<u64> = second.prns.iter().copied().collect();
        assert!(later.is_superset(&previous));
        assert!(later.len() > previous.len());
        assert_eq!(second.new_prns.len(), later.len() - previous.len());
        assert!(second.cutoffs["mayor"] >= first.cutoffs["mayor"]);
    }

    #[test]
    fn test_previous_cards_kept_when_targets_shrink() {
        let cards = manifest(100, &["mayor"], 1);
        let first = consistent_sample(
            &cards,
            &BTreeMap::from([("mayor".to_string(), 10)]),
            &BTreeSet::new(),
        );
        let previous: BTreeSet<u64> = first.prns.iter().copied().collect();
        let second = consistent_sample(&cards, &BTreeMap::new(), &previous);
        assert_eq!(second.prns, first.prns);
        assert!(second.new_prns.is_empty());
    }

    #[test]
    fn test_target_beyond_population_takes_everything() {
        let cards = manifest(12, &["mayor"], 1);
        let s = consistent_sample(
            &cards,
            &BTreeMap::from([("mayor".to_string(), 50)]),
            &BTreeSet::new(),
        );
        assert_eq!(s.counts["mayor"], 12);
        assert_eq!(s.prns.len(), 12);
    }
}
