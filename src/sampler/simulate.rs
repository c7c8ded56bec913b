//! Synthetic card populations for sample size estimation.
//!
//! A population reproduces one contest's reported tallies card by card:
//! one card per reported vote, undervoted cards for the rest of `Ncast`,
//! and a phantom for every card counted in `Nc` but missing from the
//! manifest. Pooled cards carry their pool id and no individual record.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::assort::{AssortKind, SampleContext};
use crate::election::{Card, CardPool, Contest};
use crate::errors::DataError;
use crate::risk::ClcaErrorRates;
use crate::risk::betting::error_taus;

#[derive(Debug, Clone)]
pub struct SimulatedPopulation {
    contest: String,
    candidates: Vec<String>,
    /// `(mvr, cvr)` per card, phantoms last.
    pairs: Vec<(Card, Card)>,
}

impl SimulatedPopulation {
    /// Build the population for `contest`. Pass the election's pools only
    /// for pooled audits; otherwise every card has its own record.
    pub fn new(contest: &Contest, pools: &[CardPool]) -> Self {
        let id = contest.id.as_str();
        let mut pairs = Vec::with_capacity(contest.nc.max(0) as usize);
        let mut remaining_votes = contest.votes.clone();
        let mut remaining_cards = contest.ncast;

        for pool in pools.iter().filter(|p| p.ncards_for(id) > 0) {
            let ncards = pool.ncards_for(id);
            let votes = pool.votes_for(id);
            push_cards(&mut pairs, id, &votes, ncards, Some(&pool.id));
            for (candidate, n) in &votes {
                *remaining_votes.entry(candidate.clone()).or_default() -= n;
            }
            remaining_cards -= ncards;
        }
        for n in remaining_votes.values_mut() {
            *n = (*n).max(0);
        }
        push_cards(&mut pairs, id, &remaining_votes, remaining_cards.max(0), None);

        for seq in 0..contest.phantoms().max(0) {
            let phantom = Card::phantom(pairs.len(), id, seq);
            pairs.push((phantom.clone(), phantom));
        }

        SimulatedPopulation {
            contest: contest.id.clone(),
            candidates: contest.candidates.clone(),
            pairs,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Assort values for one trial, in a fresh random order.
    ///
    /// Each non-phantom reviewed card is fuzzed with probability
    /// `fuzz_pct` before it is evaluated.
    pub fn trial_values<R: Rng>(
        &self,
        kind: &AssortKind,
        fuzz_pct: f64,
        rng: &mut R,
    ) -> Result<Vec<f64>, DataError> {
        let mut values = Vec::with_capacity(self.pairs.len());
        for (mvr, cvr) in &self.pairs {
            let value = if fuzz_pct > 0.0 && !mvr.phantom && rng.random_bool(fuzz_pct) {
                let fuzzed = fuzz_card(mvr, &self.contest, &self.candidates, rng);
                kind.evaluate(&SampleContext { mvr: &fuzzed, cvr })?
            } else {
                kind.evaluate(&SampleContext { mvr, cvr })?
            };
            values.push(value);
        }
        values.shuffle(rng);
        Ok(values)
    }
}

fn push_cards(
    pairs: &mut Vec<(Card, Card)>,
    contest: &str,
    votes: &BTreeMap<String, i64>,
    ncards: i64,
    pool: Option<&String>,
) {
    let voted: i64 = votes.values().sum();
    let choices = votes
        .iter()
        .flat_map(|(candidate, n)| (0..*n).map(move |_| vec![candidate.clone()]))
        .chain((0..(ncards - voted).max(0)).map(|_| Vec::new()));

    for choice in choices {
        let index = pairs.len();
        let mvr = Card {
            index,
            location: format!("sim-{index}"),
            prn: 0,
            phantom: false,
            pool: pool.cloned(),
            votes: BTreeMap::from([(contest.to_string(), choice)]),
        };
        let cvr = if pool.is_some() {
            Card {
                votes: BTreeMap::from([(contest.to_string(), Vec::new())]),
                ..mvr.clone()
            }
        } else {
            mvr.clone()
        };
        pairs.push((mvr, cvr));
    }
}

/// Copy of `mvr` with its vote in `contest` moved to a different choice,
/// picked uniformly from the other candidates and "no vote".
pub fn fuzz_card<R: Rng>(mvr: &Card, contest: &str, candidates: &[String], rng: &mut R) -> Card {
    let current = mvr.votes_in(contest).and_then(|v| v.first());
    let choices: Vec<Option<&String>> = candidates
        .iter()
        .map(Some)
        .chain(std::iter::once(None))
        .filter(|c| *c != current)
        .collect();

    let mut fuzzed = mvr.clone();
    if choices.is_empty() {
        return fuzzed;
    }
    let pick = choices[rng.random_range(0..choices.len())];
    fuzzed
        .votes
        .insert(contest.to_string(), pick.into_iter().cloned().collect());
    fuzzed
}

/// Comparison assort values with error categories at exactly the given
/// rates, unshuffled.
///
/// Phantoms assort like a one-vote overstatement. Every other card is a
/// match unless assigned an error.
pub fn rate_values(
    noerror: f64,
    assort_upper: f64,
    rates: &ClcaErrorRates,
    ncards: usize,
    nphantoms: usize,
) -> Vec<f64> {
    let taus = error_taus(assort_upper);
    let mut values = Vec::with_capacity(ncards + nphantoms);
    values.extend(std::iter::repeat_n(noerror * taus[1], nphantoms));
    for (p, tau) in rates.as_array().iter().zip(taus) {
        let count = (p * ncards as f64).round() as usize;
        values.extend(std::iter::repeat_n(noerror * tau, count));
    }
    let matched = (ncards + nphantoms).saturating_sub(values.len());
    values.extend(std::iter::repeat_n(noerror, matched));
    values
}
