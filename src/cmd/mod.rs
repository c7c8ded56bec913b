//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled        |
//! |----------|-------------------------|
//! | `init`   | `Init`                  |
//! | `round`  | `Round`, `Estimate`     |
//! | `status` | `Status`, `Verify`      |
//! | `remove` | `Remove`                |
//! | `config` | `Config`                |

pub mod config;
pub mod init;
pub mod remove;
pub mod round;
pub mod status;

pub use config::cmd_config;
pub use init::cmd_init;
pub use remove::cmd_remove;
pub use round::{cmd_estimate, cmd_round};
pub use status::{cmd_status, cmd_verify};

use anyhow::{Context, Result};
use riskaudit::audit_config::AuditConfig;
use riskaudit::config::RecordPaths;
use riskaudit::record::RecordStore;
use riskaudit::workflow::AuditWorkflow;

/// Open the project's record for a command that needs one.
pub(crate) fn load_workflow(config: &AuditConfig) -> Result<AuditWorkflow> {
    let store = RecordStore::new(RecordPaths::new(config.audit_dir.clone()));
    let record = store
        .load(config.toml.clone())
        .context("Failed to load audit record")?;
    record.config.validate().context("Configuration is invalid")?;
    let show_progress = console::Term::stderr().is_term() && !config.verbose;
    Ok(AuditWorkflow::new(record)
        .with_store(store)
        .with_progress(show_progress))
}
