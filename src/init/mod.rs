//! `riskaudit init`: freeze an election into a new audit record.
//!
//! ```text
//! .riskaudit/
//! ├── audit.toml       # written if absent
//! ├── election.json    # contests, assertions, pools, seed
//! ├── cards.json       # manifest with prns
//! └── rounds/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::audit_config::AuditToml;
use crate::config::{AUDIT_DIR, RecordPaths};
use crate::election::{ElectionDef, prepare};
use crate::record::{AuditRecord, RecordStore};
use crate::selection::PrnGenerator;

#[derive(Debug)]
pub struct InitResult {
    pub audit_dir: PathBuf,
    pub contests: usize,
    pub cards: usize,
    /// Whether `audit.toml` was written by this call.
    pub wrote_config: bool,
}

/// Build an audit record from an election definition.
///
/// Assertions, phantoms and prns are all fixed here; later config changes
/// cannot alter them.
pub fn create_record(config: AuditToml, def: ElectionDef) -> Result<AuditRecord> {
    config.validate()?;
    let prng = PrnGenerator::new(config.audit.seed);
    let (election, cards) = prepare(def, &prng)?;
    Ok(AuditRecord::new(config, election, cards, prng))
}

/// Initialize `<project_dir>/.riskaudit` from `election_file`.
///
/// `config` is the already layered configuration; it is written to
/// `audit.toml` when no file exists yet. Refuses to overwrite an existing
/// record.
pub fn init_project(project_dir: &Path, election_file: &Path, config: AuditToml) -> Result<InitResult> {
    let paths = RecordPaths::for_project(project_dir);
    if paths.is_initialized() {
        bail!(
            "An audit record already exists at {}. Remove it to start over.",
            paths.root.display()
        );
    }
    paths.ensure_directories()?;

    let wrote_config = !paths.config_file.exists();
    if wrote_config {
        config.save(&paths.config_file)?;
    }

    let def = ElectionDef::load(election_file)?;
    let record = create_record(config, def)
        .with_context(|| format!("Invalid election {}", election_file.display()))?;
    RecordStore::new(paths.clone()).create(&record)?;

    info!(dir = %paths.root.display(), "Initialized audit record");
    Ok(InitResult {
        audit_dir: paths.root,
        contests: record.election().contests.len(),
        cards: record.cards.len(),
        wrote_config,
    })
}

/// Whether a project has an audit record.
pub fn is_initialized(project_dir: &Path) -> bool {
    RecordPaths::for_project(project_dir).is_initialized()
}

pub fn get_audit_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(AUDIT_DIR)
}
