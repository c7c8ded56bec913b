//! The audit record: everything needed to resume or re-verify an audit.

pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit_config::{AuditToml, AuditType};
use crate::election::{Card, Election};
use crate::risk::StrategyConfig;
use crate::selection::PrnGenerator;
use crate::workflow::AuditRound;

pub use store::RecordStore;

/// Contents of `election.json`, frozen at init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Card prns are derived from this generator, not from the current
    /// config, so a changed seed cannot reshuffle an audit in progress.
    pub prng: PrnGenerator,
    pub rules: EvidenceRules,
    pub election: Election,
}

/// Settings that decide what counts as evidence, frozen at init.
///
/// Later edits to `audit.toml` or the environment cannot change them for
/// an audit already under way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRules {
    pub audit_type: AuditType,
    pub risk_limit: f64,
    pub strategy: StrategyConfig,
}

impl EvidenceRules {
    pub fn from_config(config: &AuditToml) -> Self {
        Self {
            audit_type: config.audit.audit_type,
            risk_limit: config.audit.risk_limit,
            strategy: config.strategy(),
        }
    }

    /// Put the frozen settings back into `config`. Returns the names of the
    /// settings that had drifted.
    pub fn apply(&self, config: &mut AuditToml) -> Vec<&'static str> {
        let mut drifted = Vec::new();
        if config.audit.audit_type != self.audit_type {
            drifted.push("audit.audit_type");
        }
        if config.audit.risk_limit != self.risk_limit {
            drifted.push("audit.risk_limit");
        }
        if config.strategy() != self.strategy {
            drifted.push("strategy");
        }
        config.audit.audit_type = self.audit_type;
        config.audit.risk_limit = self.risk_limit;
        config.strategy = Some(self.strategy.clone());
        drifted
    }
}

/// An auditor's decision to stop auditing an assertion or a contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Removal {
    pub contest: String,
    /// `None` removes the whole contest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<usize>,
    pub at: DateTime<Utc>,
}

impl Removal {
    pub fn covers(&self, contest: &str, assertion: usize) -> bool {
        self.contest == contest && self.assertion.is_none_or(|a| a == assertion)
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub header: RecordHeader,
    pub config: AuditToml,
    /// Manifest in index order, phantoms included.
    pub cards: Vec<Card>,
    /// Evaluated rounds, in order.
    pub rounds: Vec<AuditRound>,
    /// A round whose sample plan is persisted but whose outcome is not.
    pub pending: Option<AuditRound>,
    /// Reviewed cards from evaluated rounds, by prn.
    pub mvrs: BTreeMap<u64, Card>,
    pub removals: Vec<Removal>,
}

impl AuditRecord {
    pub fn new(config: AuditToml, election: Election, cards: Vec<Card>, prng: PrnGenerator) -> Self {
        Self {
            header: RecordHeader {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                prng,
                rules: EvidenceRules::from_config(&config),
                election,
            },
            config,
            cards,
            rounds: Vec::new(),
            pending: None,
            mvrs: BTreeMap::new(),
            removals: Vec::new(),
        }
    }

    pub fn election(&self) -> &Election {
        &self.header.election
    }

    pub fn last_round(&self) -> Option<&AuditRound> {
        self.rounds.last()
    }

    /// Index of the next round to plan.
    pub fn next_round(&self) -> u32 {
        self.rounds.len() as u32 + 1
    }

    pub fn is_complete(&self) -> bool {
        self.last_round().is_some_and(|r| r.complete)
    }

    /// Prns sampled in evaluated rounds.
    pub fn sampled_prns(&self) -> BTreeSet<u64> {
        self.last_round()
            .map(|r| r.prns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn card_by_prn(&self) -> BTreeMap<u64, &Card> {
        self.cards.iter().map(|c| (c.prn, c)).collect()
    }

    pub fn is_removed(&self, contest: &str, assertion: usize) -> bool {
        self.removals.iter().any(|r| r.covers(contest, assertion))
    }
}
