//! Assorters: bounded per-card scores whose population mean exceeds 1/2
//! exactly when an assertion about a contest holds.
//!
//! | Kind | Input | Range |
//! |------|-------|-------|
//! | `Polling` | reviewed card | `[0, u]` |
//! | `Comparison` | reviewed card vs cast vote record | `[0, 2·noerror]` |
//! | `Pooled` | reviewed card vs pool average | `[0, 2·noerror]` |

pub mod comparison;
pub mod pooled;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audit_config::AuditType;
use crate::election::{Card, CardPool, ChoiceFunction, Contest};
use crate::errors::{ConfigError, DataError};

pub use comparison::ClcaAssorter;
pub use pooled::PooledAssorter;

/// Maps a single card to `[0, upper_bound]`.
pub trait Assorter {
    fn upper_bound(&self) -> f64;

    /// Assort value for one card. With `use_phantoms` a phantom card is
    /// worst case (0); otherwise it is treated like any other card.
    fn assort(&self, card: &Card, use_phantoms: bool) -> f64;
}

/// Assorter derived from a contest's social choice function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimitiveAssorter {
    /// `winner` received more votes than `loser`.
    Plurality {
        contest: String,
        winner: String,
        loser: String,
    },
    /// `winner` received more than `min_fraction` of the valid votes.
    AboveThreshold {
        contest: String,
        winner: String,
        min_fraction: f64,
    },
}

impl PrimitiveAssorter {
    pub fn contest(&self) -> &str {
        match self {
            PrimitiveAssorter::Plurality { contest, .. }
            | PrimitiveAssorter::AboveThreshold { contest, .. } => contest,
        }
    }

    /// Assort value of a card carrying `votes` in this contest.
    pub fn assort_votes(&self, votes: &[String]) -> f64 {
        match self {
            PrimitiveAssorter::Plurality { winner, loser, .. } => {
                let w = votes.iter().any(|v| v == winner) as i32 as f64;
                let l = votes.iter().any(|v| v == loser) as i32 as f64;
                (w - l + 1.0) * 0.5
            }
            PrimitiveAssorter::AboveThreshold { winner, .. } => match votes {
                [only] if only == winner => self.upper_bound(),
                [_] => 0.0,
                _ => 0.5,
            },
        }
    }

    /// Mean assort value over `ncards` cards with the given single-vote tallies.
    pub fn mean_from_tallies(&self, votes: &BTreeMap<String, i64>, ncards: i64) -> f64 {
        if ncards <= 0 {
            return 0.5;
        }
        let n = ncards as f64;
        let count = |c: &str| votes.get(c).copied().unwrap_or(0) as f64;
        match self {
            PrimitiveAssorter::Plurality { winner, loser, .. } => {
                (count(winner) - count(loser)) / (2.0 * n) + 0.5
            }
            PrimitiveAssorter::AboveThreshold { winner, .. } => {
                let valid: i64 = votes.values().sum();
                let other = (ncards - valid).max(0) as f64;
                (count(winner) * self.upper_bound() + other * 0.5) / n
            }
        }
    }

    pub fn short_name(&self) -> String {
        match self {
            PrimitiveAssorter::Plurality { winner, loser, .. } => format!("{winner}>{loser}"),
            PrimitiveAssorter::AboveThreshold {
                winner,
                min_fraction,
                ..
            } => format!("{winner}>{min_fraction}"),
        }
    }
}

impl Assorter for PrimitiveAssorter {
    fn upper_bound(&self) -> f64 {
        match self {
            PrimitiveAssorter::Plurality { .. } => 1.0,
            PrimitiveAssorter::AboveThreshold { min_fraction, .. } => 1.0 / (2.0 * min_fraction),
        }
    }

    fn assort(&self, card: &Card, use_phantoms: bool) -> f64 {
        let Some(votes) = card.votes_in(self.contest()) else {
            return 0.5;
        };
        if use_phantoms && card.phantom {
            return 0.0;
        }
        self.assort_votes(votes)
    }
}

impl fmt::Display for PrimitiveAssorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.contest(), self.short_name())
    }
}

/// One falsifiable claim about a contest's reported outcome.
///
/// The reported mean is computed from the reported tallies over all `Nc`
/// cards, never from samples. Pool averages are frozen at audit start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub contest: String,
    pub index: usize,
    pub assorter: PrimitiveAssorter,
    pub reported_mean: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pool_averages: BTreeMap<String, f64>,
}

impl Assertion {
    pub fn upper_bound(&self) -> f64 {
        self.assorter.upper_bound()
    }

    /// Diluted margin `v = 2·mean − 1`.
    pub fn reported_margin(&self) -> f64 {
        2.0 * self.reported_mean - 1.0
    }

    /// Comparison assort value when the review matches the record.
    pub fn noerror(&self) -> f64 {
        1.0 / (2.0 - self.reported_margin() / self.upper_bound())
    }

    pub fn name(&self) -> String {
        format!("{}#{} {}", self.contest, self.index, self.assorter.short_name())
    }

    /// The assort value source for this assertion under `audit_type`.
    pub fn assort_kind(&self, audit_type: AuditType) -> AssortKind {
        match audit_type {
            AuditType::Polling => AssortKind::Polling(self.assorter.clone()),
            AuditType::Clca => AssortKind::Comparison(ClcaAssorter::new(self)),
            AuditType::OneAudit => AssortKind::Pooled(PooledAssorter::new(self)),
        }
    }

    /// Pool averages recomputed from the pools' tallies.
    pub fn recompute_pool_averages(&self, pools: &[CardPool]) -> BTreeMap<String, f64> {
        pool_averages(&self.assorter, pools.iter())
    }
}

fn pool_averages<'a>(
    assorter: &PrimitiveAssorter,
    pools: impl Iterator<Item = &'a CardPool>,
) -> BTreeMap<String, f64> {
    let contest = assorter.contest();
    pools
        .filter(|p| p.ncards_for(contest) > 0)
        .map(|p| {
            let mean = assorter.mean_from_tallies(&p.votes_for(contest), p.ncards_for(contest));
            (p.id.clone(), mean)
        })
        .collect()
}

/// Derive the assertions for a contest from its reported tallies.
///
/// Plurality: every reported winner beats every reported loser. Threshold:
/// every reported winner is above the threshold.
pub fn make_assertions(
    contest: &Contest,
    pools: &BTreeMap<&str, &CardPool>,
) -> Result<Vec<Assertion>, ConfigError> {
    let winners = contest.reported_winners();
    let primitives: Vec<PrimitiveAssorter> = match contest.choice_function {
        ChoiceFunction::Plurality => winners
            .iter()
            .flat_map(|w| {
                contest
                    .reported_losers()
                    .into_iter()
                    .map(move |l| PrimitiveAssorter::Plurality {
                        contest: contest.id.clone(),
                        winner: w.clone(),
                        loser: l,
                    })
            })
            .collect(),
        ChoiceFunction::Threshold { min_fraction } => winners
            .iter()
            .map(|w| PrimitiveAssorter::AboveThreshold {
                contest: contest.id.clone(),
                winner: w.clone(),
                min_fraction,
            })
            .collect(),
    };

    primitives
        .into_iter()
        .enumerate()
        .map(|(index, assorter)| {
            let reported_mean = assorter.mean_from_tallies(&contest.votes, contest.nc);
            if reported_mean <= 0.5 {
                return Err(ConfigError::InvalidParameter {
                    name: format!("{} {}", contest.id, assorter.short_name()),
                    message: format!("reported assort mean {reported_mean:.5} must exceed 0.5"),
                });
            }
            let pool_averages = pool_averages(&assorter, pools.values().copied());
            Ok(Assertion {
                contest: contest.id.clone(),
                index,
                assorter,
                reported_mean,
                pool_averages,
            })
        })
        .collect()
}

/// What a single draw is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'a> {
    /// The manually reviewed card.
    pub mvr: &'a Card,
    /// The manifest entry (cast vote record) for the same card.
    pub cvr: &'a Card,
}

/// Assort value source for one assertion, chosen by audit type.
#[derive(Debug, Clone)]
pub enum AssortKind {
    Polling(PrimitiveAssorter),
    Comparison(ClcaAssorter),
    Pooled(PooledAssorter),
}

impl AssortKind {
    pub fn upper_bound(&self) -> f64 {
        match self {
            AssortKind::Polling(a) => a.upper_bound(),
            AssortKind::Comparison(a) => a.upper_bound(),
            AssortKind::Pooled(a) => a.upper_bound(),
        }
    }

    /// Evaluate one draw. Values outside `[0, u]` are a data error, never
    /// clamped.
    pub fn evaluate(&self, ctx: &SampleContext<'_>) -> Result<f64, DataError> {
        let value = match self {
            AssortKind::Polling(a) => a.assort(ctx.mvr, true),
            AssortKind::Comparison(a) => a.bassort(ctx.mvr, ctx.cvr)?,
            AssortKind::Pooled(a) => a.bassort(ctx.mvr, ctx.cvr)?,
        };
        let upper = self.upper_bound();
        if !(0.0..=upper + 1e-12).contains(&value) || value.is_nan() {
            return Err(DataError::AssortOutOfRange { value, upper });
        }
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::election::contest::tests::plurality;

    pub(crate) fn card_with(contest: &str, votes: &[&str]) -> Card {
        Card {
            index: 0,
            location: "c".into(),
            prn: 1,
            phantom: false,
            pool: None,
            votes: BTreeMap::from([(
                contest.to_string(),
                votes.iter().map(|v| v.to_string()).collect(),
            )]),
        }
    }

    fn plurality_assorter() -> PrimitiveAssorter {
        PrimitiveAssorter::Plurality {
            contest: "mayor".into(),
            winner: "alice".into(),
            loser: "bob".into(),
        }
    }

    #[test]
    fn test_plurality_assort_values() {
        let a = plurality_assorter();
        assert_eq!(a.assort(&card_with("mayor", &["alice"]), true), 1.0);
        assert_eq!(a.assort(&card_with("mayor", &["bob"]), true), 0.0);
        assert_eq!(a.assort(&card_with("mayor", &["carol"]), true), 0.5);
        assert_eq!(a.assort(&card_with("mayor", &[]), true), 0.5);
        assert_eq!(a.assort(&card_with("council", &["alice"]), true), 0.5);
    }

    #[test]
    fn test_polling_phantom_is_worst_case() {
        let a = plurality_assorter();
        let mut card = card_with("mayor", &["alice"]);
        card.phantom = true;
        assert_eq!(a.assort(&card, true), 0.0);
        assert_eq!(a.assort(&card, false), 1.0);
    }

    #[test]
    fn test_threshold_assort_values() {
        let a = PrimitiveAssorter::AboveThreshold {
            contest: "measure".into(),
            winner: "yes".into(),
            min_fraction: 0.6,
        };
        let u = 1.0 / 1.2;
        assert!((a.upper_bound() - u).abs() < 1e-12);
        assert!((a.assort(&card_with("measure", &["yes"]), true) - u).abs() < 1e-12);
        assert_eq!(a.assort(&card_with("measure", &["no"]), true), 0.0);
        assert_eq!(a.assort(&card_with("measure", &[]), true), 0.5);
        assert_eq!(a.assort(&card_with("measure", &["yes", "no"]), true), 0.5);
    }

    #[test]
    fn test_reported_mean_is_diluted_over_nc() {
        let contest = plurality("mayor", &[("alice", 520), ("bob", 480)], 2000, 1000);
        let assertions = make_assertions(&contest, &BTreeMap::new()).unwrap();
        assert_eq!(assertions.len(), 1);
        let a = &assertions[0];
        assert!((a.reported_margin() - 0.02).abs() < 1e-12);
        assert!((a.noerror() - 1.0 / 1.98).abs() < 1e-12);
    }

    #[test]
    fn test_make_assertions_pairs_every_winner_with_every_loser() {
        let mut contest = plurality(
            "council",
            &[("a", 40), ("b", 35), ("c", 20), ("d", 5)],
            100,
            100,
        );
        contest.winners = 2;
        let assertions = make_assertions(&contest, &BTreeMap::new()).unwrap();
        let names: Vec<String> = assertions.iter().map(|a| a.assorter.short_name()).collect();
        assert_eq!(names, vec!["a>c", "a>d", "b>c", "b>d"]);
    }

    #[test]
    fn test_threshold_mean_matches_card_average() {
        let mut contest = plurality("measure", &[("yes", 70), ("no", 20)], 100, 100);
        contest.choice_function = ChoiceFunction::Threshold { min_fraction: 0.6 };
        let assertions = make_assertions(&contest, &BTreeMap::new()).unwrap();
        let a = &assertions[0];
        let u = a.upper_bound();
        let expected = (70.0 * u + 10.0 * 0.5) / 100.0;
        assert!((a.reported_mean - expected).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_polling_ignores_cvr() {
        let kind = AssortKind::Polling(plurality_assorter());
        let mvr = card_with("mayor", &["alice"]);
        let cvr = card_with("mayor", &["bob"]);
        let ctx = SampleContext {
            mvr: &mvr,
            cvr: &cvr,
        };
        assert_eq!(kind.evaluate(&ctx).unwrap(), 1.0);
    }

    #[test]
    fn test_tied_contest_has_no_valid_assertion() {
        let contest = plurality("mayor", &[("alice", 50), ("bob", 50)], 100, 100);
        assert!(matches!(
            make_assertions(&contest, &BTreeMap::new()),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }
}
