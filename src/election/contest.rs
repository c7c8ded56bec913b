//! Contests with reported tallies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Social choice function a contest is decided by.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChoiceFunction {
    /// The `winners` candidates with the most votes win.
    Plurality,
    /// A candidate wins when their share of valid votes exceeds `min_fraction`.
    Threshold { min_fraction: f64 },
}

impl fmt::Display for ChoiceFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceFunction::Plurality => write!(f, "plurality"),
            ChoiceFunction::Threshold { min_fraction } => write!(f, "threshold({min_fraction})"),
        }
    }
}

fn default_winners() -> usize {
    1
}

/// A single-vote contest as reported by the election.
///
/// Immutable once the audit starts: changing any tally invalidates all
/// evidence collected against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub choice_function: ChoiceFunction,
    pub candidates: Vec<String>,
    /// Reported votes per candidate.
    pub votes: BTreeMap<String, i64>,
    /// Trusted upper bound on the number of cards containing this contest.
    pub nc: i64,
    /// Cards in the manifest containing this contest. Filled in at init.
    #[serde(default)]
    pub ncast: i64,
    #[serde(default = "default_winners")]
    pub winners: usize,
}

impl Contest {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn total_votes(&self) -> i64 {
        self.votes.values().sum()
    }

    /// Cards counted in `Nc` that are missing from the manifest.
    pub fn phantoms(&self) -> i64 {
        self.nc - self.ncast
    }

    pub fn undervotes(&self) -> i64 {
        self.ncast - self.total_votes()
    }

    pub fn votes_for(&self, candidate: &str) -> i64 {
        self.votes.get(candidate).copied().unwrap_or(0)
    }

    /// Reported winners, derived from the tallies.
    pub fn reported_winners(&self) -> Vec<String> {
        match self.choice_function {
            ChoiceFunction::Plurality => {
                let mut ranked: Vec<&String> = self.candidates.iter().collect();
                ranked.sort_by(|a, b| self.votes_for(b).cmp(&self.votes_for(a)).then(a.cmp(b)));
                ranked
                    .into_iter()
                    .take(self.winners)
                    .filter(|c| self.votes_for(c) > 0)
                    .cloned()
                    .collect()
            }
            ChoiceFunction::Threshold { min_fraction } => {
                let total = self.total_votes();
                if total == 0 {
                    return Vec::new();
                }
                self.candidates
                    .iter()
                    .filter(|c| self.votes_for(c) as f64 / total as f64 > min_fraction)
                    .cloned()
                    .collect()
            }
        }
    }

    pub fn reported_losers(&self) -> Vec<String> {
        let winners = self.reported_winners();
        self.candidates
            .iter()
            .filter(|c| !winners.contains(c))
            .cloned()
            .collect()
    }

    /// Check the tallies against the card counts.
    ///
    /// Requires `Nc >= Ncast >= sum(votes)` and that every tallied candidate
    /// is declared.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let votes = self.total_votes();
        if self.nc < 0 || self.ncast < 0 || self.nc < self.ncast || self.ncast < votes {
            return Err(ConfigError::InconsistentCardCount {
                contest: self.id.clone(),
                nc: self.nc,
                ncast: self.ncast,
                votes,
            });
        }
        if let Some((candidate, _)) = self.votes.iter().find(|(c, _)| !self.candidates.contains(c)) {
            return Err(ConfigError::UnknownCandidate {
                contest: self.id.clone(),
                candidate: candidate.clone(),
            });
        }
        if let Some((candidate, _)) = self.votes.iter().find(|(_, v)| **v < 0) {
            return Err(ConfigError::InvalidParameter {
                name: format!("{}.votes.{candidate}", self.id),
                message: "vote counts cannot be negative".into(),
            });
        }
        if let ChoiceFunction::Threshold { min_fraction } = self.choice_function {
            if !(min_fraction > 0.0 && min_fraction < 1.0) {
                return Err(ConfigError::InvalidParameter {
                    name: format!("{}.min_fraction", self.id),
                    message: format!("must lie in (0, 1), got {min_fraction}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn plurality(id: &str, votes: &[(&str, i64)], nc: i64, ncast: i64) -> Contest {
        Contest {
            id: id.into(),
            name: String::new(),
            choice_function: ChoiceFunction::Plurality,
            candidates: votes.iter().map(|(c, _)| c.to_string()).collect(),
            votes: votes.iter().map(|(c, v)| (c.to_string(), *v)).collect(),
            nc,
            ncast,
            winners: 1,
        }
    }

    #[test]
    fn test_reported_winner_is_top_vote_getter() {
        let c = plurality("mayor", &[("alice", 60), ("bob", 30), ("carol", 5)], 100, 100);
        assert_eq!(c.reported_winners(), vec!["alice".to_string()]);
        assert_eq!(c.reported_losers(), vec!["bob".to_string(), "carol".to_string()]);
        assert_eq!(c.undervotes(), 5);
        assert_eq!(c.phantoms(), 0);
    }

    #[test]
    fn test_threshold_winners_exceed_fraction() {
        let mut c = plurality("measure", &[("yes", 70), ("no", 30)], 100, 100);
        c.choice_function = ChoiceFunction::Threshold { min_fraction: 0.6 };
        assert_eq!(c.reported_winners(), vec!["yes".to_string()]);

        c.choice_function = ChoiceFunction::Threshold { min_fraction: 0.75 };
        assert!(c.reported_winners().is_empty());
    }

    #[test]
    fn test_validate_rejects_more_votes_than_cards() {
        let c = plurality("mayor", &[("alice", 60), ("bob", 50)], 100, 100);
        let err = c.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentCardCount { votes: 110, .. }));
    }

    #[test]
    fn test_validate_rejects_ncast_above_nc() {
        let c = plurality("mayor", &[("alice", 60), ("bob", 30)], 100, 120);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_undeclared_candidate() {
        let mut c = plurality("mayor", &[("alice", 60), ("bob", 30)], 100, 100);
        c.candidates.pop();
        assert!(matches!(
            c.validate(),
            Err(ConfigError::UnknownCandidate { .. })
        ));
    }

    #[test]
    fn test_choice_function_parses_from_json() {
        let json = r#"{"kind":"threshold","min_fraction":0.6}"#;
        let cf: ChoiceFunction = serde_json::from_str(json).unwrap();
        assert_eq!(cf, ChoiceFunction::Threshold { min_fraction: 0.6 });
        assert_eq!(cf.to_string(), "threshold(0.6)");
    }
}
