//! Typed error hierarchy for risk-limiting audits.
//!
//! Three top-level enums follow the failure taxonomy of an audit:
//! - `ConfigError` — rejected before any round starts
//! - `DataError` — fatal to the current round (or the contest it concerns)
//! - `RecordError` — persisted state is missing or corrupt; the run halts
//!
//! Statistical non-convergence is not an error. It surfaces as
//! `TestH0Status::LimitReached` on the test result.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed audit parameters or election definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Risk limit must lie in (0, 1), got {value}")]
    InvalidRiskLimit { value: f64 },

    #[error("Quantile must lie in (0, 1], got {value}")]
    InvalidQuantile { value: f64 },

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Contest {contest} has inconsistent card counts: Nc={nc}, Ncast={ncast}, votes={votes}")]
    InconsistentCardCount {
        contest: String,
        nc: i64,
        ncast: i64,
        votes: i64,
    },

    #[error("Contest {contest} has no assertions")]
    NoAssertions { contest: String },

    #[error("Duplicate contest id {contest}")]
    DuplicateContest { contest: String },

    #[error("Contest {contest} references unknown candidate {candidate}")]
    UnknownCandidate { contest: String, candidate: String },

    #[error("Failed to parse config at {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },
}

/// Sampled data that cannot be used as evidence.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Assort value {value} outside [0, {upper}]")]
    AssortOutOfRange { value: f64, upper: f64 },

    #[error("Card with prn {prn} is not in the card manifest")]
    CardNotInManifest { prn: u64 },

    #[error("Round {round} is missing {missing} manual review(s), first missing prn {first}")]
    MissingMvrs {
        round: u32,
        missing: usize,
        first: u64,
    },

    #[error("Reviewed card {prn} does not match manifest: {message}")]
    MvrMismatch { prn: u64, message: String },

    #[error("Pool {pool} is inconsistent: {message}")]
    PoolInconsistent { pool: String, message: String },

    #[error("Card {prn} has no cast vote record for contest {contest}")]
    MissingCvr { prn: u64, contest: String },

    #[error("Sample exhausted after {drawn} draws")]
    SampleExhausted { drawn: usize },

    #[error("Test term {term} at draw {j} is not positive")]
    NonPositiveTerm { j: usize, term: f64 },
}

/// Persisted audit record errors.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("No audit record at {path}. Run `riskaudit init` first.")]
    NotInitialized { path: PathBuf },

    #[error("Round {round} has no {file} but round {later} exists; refusing to resume")]
    CorruptRound {
        round: u32,
        file: &'static str,
        later: u32,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {path}: {source}")]
    EncodeFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    DecodeFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Round {round} is still awaiting manual review")]
    RoundInFlight { round: u32 },

    #[error("Audit is already complete")]
    AuditComplete,
}

/// Umbrella error for the audit workflow.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = AuditError> = std::result::Result<T, E>;
