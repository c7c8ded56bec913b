//! Per-round audit state.
//!
//! Statuses live on the round, not on the contest or assertion, so every
//! committed round keeps the statuses it was evaluated with.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::estimate::EstimationResult;
use crate::risk::{TestH0Result, TestH0Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    InProgress,
    Proved,
    Disproved,
    /// Rounds ran out before a decision.
    LimitReached,
    AuditorRemoved,
}

impl AssertionStatus {
    pub fn is_final(self) -> bool {
        self != AssertionStatus::InProgress
    }

    /// Status after testing all samples gathered so far.
    pub fn from_test(status: TestH0Status) -> Self {
        match status {
            TestH0Status::StatRejectNull | TestH0Status::SampleSumRejectNull => {
                AssertionStatus::Proved
            }
            TestH0Status::AcceptNull => AssertionStatus::Disproved,
            TestH0Status::LimitReached => AssertionStatus::InProgress,
        }
    }
}

impl fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssertionStatus::InProgress => "in progress",
            AssertionStatus::Proved => "proved",
            AssertionStatus::Disproved => "disproved",
            AssertionStatus::LimitReached => "limit reached",
            AssertionStatus::AuditorRemoved => "removed",
        };
        f.write_str(s)
    }
}

/// Why a contest was escalated to a full hand count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauditableReason {
    /// Smallest reported margin at or below `rounds.min_margin`.
    MinMargin,
    /// Phantom cards alone could overturn the reported margin.
    TooManyPhantoms,
    /// Estimated sample exceeds `rounds.max_sample_fraction · Nc`.
    CeilingExceeded,
    /// Sampled data for the contest could not be used.
    DataError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContestStatus {
    InProgress,
    Proved,
    /// At least one assertion was disproved; escalate to a hand count.
    Disproved,
    Unauditable { reason: UnauditableReason },
    AuditorRemoved,
    LimitReached,
}

impl ContestStatus {
    pub fn is_complete(self) -> bool {
        self != ContestStatus::InProgress
    }
}

impl fmt::Display for ContestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContestStatus::InProgress => f.write_str("in progress"),
            ContestStatus::Proved => f.write_str("proved"),
            ContestStatus::Disproved => f.write_str("disproved"),
            ContestStatus::Unauditable { reason } => write!(f, "unauditable ({reason:?})"),
            ContestStatus::AuditorRemoved => f.write_str("removed"),
            ContestStatus::LimitReached => f.write_str("limit reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Estimating,
    SamplesRequested,
    AwaitingReview,
    Evaluated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionRound {
    pub index: usize,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimationResult>,
    pub status: AssertionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TestH0Result>,
}

impl AssertionRound {
    pub fn p_value(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.p_value_last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestRound {
    pub contest: String,
    /// Additional samples estimated this round.
    pub estimated: usize,
    /// Total sample size wanted, earlier rounds included.
    pub target: usize,
    /// Samples in the contest's sample after evaluation.
    pub samples_used: usize,
    /// Largest prn in the contest's sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<u64>,
    pub status: ContestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub assertions: Vec<AssertionRound>,
}

impl ContestRound {
    pub fn assertion(&self, index: usize) -> Option<&AssertionRound> {
        self.assertions.iter().find(|a| a.index == index)
    }

    /// Derive the contest status from its assertions.
    pub fn settle(&mut self) {
        if self.status.is_complete() {
            return;
        }
        let live: Vec<AssertionStatus> = self
            .assertions
            .iter()
            .map(|a| a.status)
            .filter(|s| *s != AssertionStatus::AuditorRemoved)
            .collect();
        self.status = if live.is_empty() {
            ContestStatus::AuditorRemoved
        } else if live.contains(&AssertionStatus::Disproved) {
            ContestStatus::Disproved
        } else if live.iter().all(|s| *s == AssertionStatus::Proved) {
            ContestStatus::Proved
        } else if live.contains(&AssertionStatus::LimitReached) {
            ContestStatus::LimitReached
        } else {
            ContestStatus::InProgress
        };
    }
}

/// One audit round: the sample plan and, once evaluated, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRound {
    /// 1-based, strictly increasing.
    pub round: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub phase: RoundPhase,
    /// Sample size per contest handed to the selector.
    pub targets: BTreeMap<String, usize>,
    pub contests: Vec<ContestRound>,
    /// Every sampled prn so far, ascending.
    pub prns: Vec<u64>,
    /// Prns first sampled this round, ascending.
    pub new_prns: Vec<u64>,
    pub complete: bool,
}

impl AuditRound {
    pub fn contest(&self, id: &str) -> Option<&ContestRound> {
        self.contests.iter().find(|c| c.contest == id)
    }

    pub fn contest_mut(&mut self, id: &str) -> Option<&mut ContestRound> {
        self.contests.iter_mut().find(|c| c.contest == id)
    }

    pub fn all_complete(&self) -> bool {
        self.contests.iter().all(|c| c.status.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(index: usize, status: AssertionStatus) -> AssertionRound {
        AssertionRound {
            index,
            name: format!("a{index}"),
            estimate: None,
            status,
            result: None,
        }
    }

    fn contest(statuses: &[AssertionStatus]) -> ContestRound {
        ContestRound {
            contest: "mayor".into(),
            estimated: 0,
            target: 0,
            samples_used: 0,
            cutoff: None,
            status: ContestStatus::InProgress,
            error: None,
            assertions: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| assertion(i, *s))
                .collect(),
        }
    }

    #[test]
    fn test_contest_proved_only_when_every_assertion_proved() {
        use AssertionStatus::*;
        let mut c = contest(&[Proved, InProgress]);
        c.settle();
        assert_eq!(c.status, ContestStatus::InProgress);

        let mut c = contest(&[Proved, Proved]);
        c.settle();
        assert_eq!(c.status, ContestStatus::Proved);
    }

    #[test]
    fn test_removed_assertions_are_ignored_until_none_remain() {
        use AssertionStatus::*;
        let mut c = contest(&[Proved, AuditorRemoved]);
        c.settle();
        assert_eq!(c.status, ContestStatus::Proved);

        let mut c = contest(&[AuditorRemoved, AuditorRemoved]);
        c.settle();
        assert_eq!(c.status, ContestStatus::AuditorRemoved);
    }

    #[test]
    fn test_disproved_assertion_escalates_contest() {
        use AssertionStatus::*;
        let mut c = contest(&[Proved, Disproved, InProgress]);
        c.settle();
        assert_eq!(c.status, ContestStatus::Disproved);
    }

    #[test]
    fn test_status_from_test_result() {
        assert_eq!(
            AssertionStatus::from_test(TestH0Status::SampleSumRejectNull),
            AssertionStatus::Proved
        );
        assert_eq!(
            AssertionStatus::from_test(TestH0Status::LimitReached),
            AssertionStatus::InProgress
        );
    }

    #[test]
    fn test_contest_status_serializes_with_reason() {
        let c = ContestStatus::Unauditable {
            reason: UnauditableReason::CeilingExceeded,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"status":"unauditable","reason":"ceiling_exceeded"}"#);
    }
}
