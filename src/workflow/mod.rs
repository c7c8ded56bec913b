//! Multi-round audit workflow.
//!
//! A round moves through estimating, sample selection, manual review and
//! evaluation. The sample plan is persisted before any card is requested and
//! the outcome only after every requested card has been reviewed, so an
//! interrupted round resumes from its plan.

pub mod mvr;
pub mod orchestrator;
pub mod round;

pub use mvr::{DirectoryMvrSource, ManifestMvrSource, MvrSource};
pub use orchestrator::{AuditWorkflow, evaluate_contest};
pub use round::{
    AssertionRound, AssertionStatus, AuditRound, ContestRound, ContestStatus, RoundPhase,
    UnauditableReason,
};
