use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the audit record directory inside a project.
pub const AUDIT_DIR: &str = ".riskaudit";

/// File layout of an audit record.
///
/// ```text
/// .riskaudit/
/// ├── audit.toml
/// ├── election.json
/// ├── cards.json
/// ├── removals.json
/// └── rounds/
///     └── round-001/
///         ├── sample.json
///         ├── mvrs.json
///         └── outcome.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub election_file: PathBuf,
    pub cards_file: PathBuf,
    pub removals_file: PathBuf,
    pub rounds_dir: PathBuf,
}

impl RecordPaths {
    /// Layout rooted at `<project_dir>/.riskaudit`.
    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(project_dir.join(AUDIT_DIR))
    }

    pub fn new(root: PathBuf) -> Self {
        Self {
            config_file: root.join("audit.toml"),
            election_file: root.join("election.json"),
            cards_file: root.join("cards.json"),
            removals_file: root.join("removals.json"),
            rounds_dir: root.join("rounds"),
            root,
        }
    }

    pub fn round_dir(&self, round: u32) -> PathBuf {
        self.rounds_dir.join(format!("round-{round:03}"))
    }

    pub fn sample_file(&self, round: u32) -> PathBuf {
        self.round_dir(round).join("sample.json")
    }

    pub fn mvrs_file(&self, round: u32) -> PathBuf {
        self.round_dir(round).join("mvrs.json")
    }

    pub fn outcome_file(&self, round: u32) -> PathBuf {
        self.round_dir(round).join("outcome.json")
    }

    /// Parse `round-NNN` back into a round index.
    pub fn parse_round_dir(name: &str) -> Option<u32> {
        name.strip_prefix("round-")?.parse().ok()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).context("Failed to create audit directory")?;
        std::fs::create_dir_all(&self.rounds_dir).context("Failed to create rounds directory")?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.election_file.exists() && self.cards_file.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_paths_are_zero_padded() {
        let paths = RecordPaths::for_project(Path::new("/tmp/project"));
        assert_eq!(
            paths.outcome_file(7),
            PathBuf::from("/tmp/project/.riskaudit/rounds/round-007/outcome.json")
        );
        assert_eq!(RecordPaths::parse_round_dir("round-012"), Some(12));
        assert_eq!(RecordPaths::parse_round_dir("notes"), None);
    }

    #[test]
    fn test_ensure_directories_creates_rounds_dir() {
        let dir = TempDir::new().unwrap();
        let paths = RecordPaths::for_project(dir.path());
        paths.ensure_directories().unwrap();
        assert!(paths.rounds_dir.is_dir());
        assert!(!paths.is_initialized());
    }
}
