//! On-disk audit record under `.riskaudit/`.
//!
//! Every file is written to a temporary sibling and renamed into place, so
//! a reader sees either the old or the new contents. A round becomes
//! visible to readers only once its `outcome.json` exists.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::audit_config::AuditToml;
use crate::config::RecordPaths;
use crate::election::Card;
use crate::errors::RecordError;
use crate::record::{AuditRecord, RecordHeader, Removal};
use crate::workflow::AuditRound;

pub struct RecordStore {
    paths: RecordPaths,
}

impl RecordStore {
    pub fn new(paths: RecordPaths) -> Self {
        Self { paths }
    }

    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(RecordPaths::for_project(project_dir))
    }

    pub fn paths(&self) -> &RecordPaths {
        &self.paths
    }

    pub fn is_initialized(&self) -> bool {
        self.paths.is_initialized()
    }

    /// Write the frozen parts of a new record.
    pub fn create(&self, record: &AuditRecord) -> Result<(), RecordError> {
        for dir in [&self.paths.root, &self.paths.rounds_dir] {
            fs::create_dir_all(dir).map_err(|source| RecordError::WriteFailed {
                path: dir.clone(),
                source,
            })?;
        }
        write_json(&self.paths.election_file, &record.header)?;
        write_json(&self.paths.cards_file, &record.cards)?;
        info!(
            id = %record.header.id,
            cards = record.cards.len(),
            "Created audit record"
        );
        Ok(())
    }

    /// Load the record, validating round files.
    ///
    /// The settings frozen in the header replace those in `config`.
    ///
    /// A round without `outcome.json` is resumable only if it is the last
    /// one; otherwise the record is corrupt.
    pub fn load(&self, mut config: AuditToml) -> Result<AuditRecord, RecordError> {
        if !self.is_initialized() {
            return Err(RecordError::NotInitialized {
                path: self.paths.root.clone(),
            });
        }
        let header: RecordHeader = read_json(&self.paths.election_file)?;
        for setting in header.rules.apply(&mut config) {
            warn!(setting, "Ignoring change to a setting frozen at init");
        }
        let cards: Vec<Card> = read_json(&self.paths.cards_file)?;
        let removals: Vec<Removal> = if self.paths.removals_file.exists() {
            read_json(&self.paths.removals_file)?
        } else {
            Vec::new()
        };

        let numbers = self.round_numbers()?;
        let last = numbers.last().copied().unwrap_or(0);
        let mut rounds = Vec::with_capacity(numbers.len());
        let mut pending = None;
        let mut mvrs = BTreeMap::new();

        for (i, &n) in numbers.iter().enumerate() {
            let expected = i as u32 + 1;
            if n != expected {
                return Err(RecordError::CorruptRound {
                    round: expected,
                    file: "sample.json",
                    later: n,
                });
            }
            let outcome_file = self.paths.outcome_file(n);
            if outcome_file.exists() {
                let round: AuditRound = read_json(&outcome_file)?;
                check_round_index(&round, n, "outcome.json")?;
                let mvrs_file = self.paths.mvrs_file(n);
                if !mvrs_file.exists() {
                    return Err(RecordError::CorruptRound {
                        round: n,
                        file: "mvrs.json",
                        later: n,
                    });
                }
                let reviewed: Vec<Card> = read_json(&mvrs_file)?;
                mvrs.extend(reviewed.into_iter().map(|c| (c.prn, c)));
                rounds.push(round);
            } else if n == last {
                let sample_file = self.paths.sample_file(n);
                if !sample_file.exists() {
                    return Err(RecordError::CorruptRound {
                        round: n,
                        file: "sample.json",
                        later: n,
                    });
                }
                let round: AuditRound = read_json(&sample_file)?;
                check_round_index(&round, n, "sample.json")?;
                pending = Some(round);
            } else {
                return Err(RecordError::CorruptRound {
                    round: n,
                    file: "outcome.json",
                    later: last,
                });
            }
        }

        debug!(
            rounds = rounds.len(),
            pending = pending.is_some(),
            mvrs = mvrs.len(),
            "Loaded audit record"
        );
        Ok(AuditRecord {
            header,
            config,
            cards,
            rounds,
            pending,
            mvrs,
            removals,
        })
    }

    pub fn save_plan(&self, round: &AuditRound) -> Result<(), RecordError> {
        write_json(&self.paths.sample_file(round.round), round)
    }

    pub fn save_mvrs(&self, round: u32, mvrs: &[Card]) -> Result<(), RecordError> {
        write_json(&self.paths.mvrs_file(round), &mvrs)
    }

    pub fn save_outcome(&self, round: &AuditRound) -> Result<(), RecordError> {
        write_json(&self.paths.outcome_file(round.round), round)
    }

    pub fn save_removals(&self, removals: &[Removal]) -> Result<(), RecordError> {
        write_json(&self.paths.removals_file, &removals)
    }

    fn round_numbers(&self) -> Result<Vec<u32>, RecordError> {
        let dir = &self.paths.rounds_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| RecordError::ReadFailed {
            path: dir.clone(),
            source,
        })?;
        let mut numbers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RecordError::ReadFailed {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            match RecordPaths::parse_round_dir(&name.to_string_lossy()) {
                Some(n) => numbers.push(n),
                None => warn!(entry = %name.to_string_lossy(), "Ignoring unexpected entry in rounds/"),
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }
}

fn check_round_index(round: &AuditRound, n: u32, file: &'static str) -> Result<(), RecordError> {
    if round.round != n {
        return Err(RecordError::CorruptRound {
            round: n,
            file,
            later: round.round,
        });
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecordError> {
    let content = fs::read_to_string(path).map_err(|source| RecordError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| RecordError::DecodeFailed {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RecordError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| RecordError::EncodeFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let write_failed = |source| RecordError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_failed)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(write_failed)?;
    fs::rename(&tmp, path).map_err(write_failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_config::AuditType;
    use crate::election::Election;
    use crate::selection::PrnGenerator;
    use crate::workflow::RoundPhase;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record() -> AuditRecord {
        AuditRecord::new(
            AuditToml::default(),
            Election {
                contests: Vec::new(),
                pools: Vec::new(),
            },
            Vec::new(),
            PrnGenerator::new(3),
        )
    }

    fn round(n: u32) -> AuditRound {
        AuditRound {
            round: n,
            started_at: Utc::now(),
            ended_at: None,
            phase: RoundPhase::SamplesRequested,
            targets: BTreeMap::new(),
            contests: Vec::new(),
            prns: Vec::new(),
            new_prns: Vec::new(),
            complete: false,
        }
    }

    #[test]
    fn test_load_uninitialized_fails() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        assert!(matches!(
            store.load(AuditToml::default()),
            Err(RecordError::NotInitialized { .. })
        ));
    }

    #[test]
    fn test_create_then_load() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        let created = record();
        store.create(&created).unwrap();

        let loaded = store.load(AuditToml::default()).unwrap();
        assert_eq!(loaded.header, created.header);
        assert!(loaded.rounds.is_empty());
        assert!(loaded.pending.is_none());
    }

    #[test]
    fn test_load_keeps_rules_frozen_at_create() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        store.create(&record()).unwrap();

        let mut edited = AuditToml::default();
        edited.audit.audit_type = AuditType::Clca;
        edited.audit.risk_limit = 1.5;
        edited.estimation.nsim = 7;
        let loaded = store.load(edited).unwrap();
        assert_eq!(loaded.config.audit.audit_type, AuditType::Polling);
        assert_eq!(loaded.config.audit.risk_limit, 0.05);
        assert_eq!(loaded.config.strategy().name(), "shrink_trunc");
        // settings outside the rules still follow the file
        assert_eq!(loaded.config.estimation.nsim, 7);
    }

    #[test]
    fn test_last_round_without_outcome_is_pending() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        store.create(&record()).unwrap();
        store.save_plan(&round(1)).unwrap();
        store.save_mvrs(1, &[]).unwrap();
        store.save_outcome(&round(1)).unwrap();
        store.save_plan(&round(2)).unwrap();

        let loaded = store.load(AuditToml::default()).unwrap();
        assert_eq!(loaded.rounds.len(), 1);
        assert_eq!(loaded.pending.map(|r| r.round), Some(2));
    }

    #[test]
    fn test_missing_outcome_before_later_round_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        store.create(&record()).unwrap();
        store.save_plan(&round(1)).unwrap();
        store.save_plan(&round(2)).unwrap();

        let err = store.load(AuditToml::default()).unwrap_err();
        assert!(matches!(
            err,
            RecordError::CorruptRound {
                round: 1,
                file: "outcome.json",
                later: 2
            }
        ));
    }

    #[test]
    fn test_outcome_without_mvrs_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        store.create(&record()).unwrap();
        store.save_outcome(&round(1)).unwrap();

        assert!(matches!(
            store.load(AuditToml::default()),
            Err(RecordError::CorruptRound {
                file: "mvrs.json",
                ..
            })
        ));
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::for_project(dir.path());
        store.create(&record()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(&store.paths().root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
