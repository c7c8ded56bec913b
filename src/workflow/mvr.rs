//! Sources of manually reviewed cards.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::RecordPaths;
use crate::election::Card;
use crate::errors::{AuditError, DataError, RecordError};

/// Supplies reviewed cards (MVRs) for requested prns.
///
/// Retries and timeouts belong to the implementation. Returning fewer
/// cards than requested fails the round.
#[async_trait]
pub trait MvrSource: Send + Sync {
    async fn fetch(&self, round: u32, prns: &[u64]) -> Result<Vec<Card>, AuditError>;
}

/// Reads `rounds/round-NNN/mvrs.json`, written by the review team.
pub struct DirectoryMvrSource {
    paths: RecordPaths,
}

impl DirectoryMvrSource {
    pub fn new(paths: RecordPaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl MvrSource for DirectoryMvrSource {
    async fn fetch(&self, round: u32, prns: &[u64]) -> Result<Vec<Card>, AuditError> {
        let path = self.paths.mvrs_file(round);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DataError::MissingMvrs {
                round,
                missing: prns.len(),
                first: prns.first().copied().unwrap_or_default(),
            }
            .into());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| RecordError::ReadFailed {
                path: path.clone(),
                source,
            })?;
        let cards: Vec<Card> = serde_json::from_str(&content)
            .map_err(|source| RecordError::DecodeFailed { path, source })?;
        debug!(round, cards = cards.len(), "Read reviewed cards");
        Ok(cards)
    }
}

/// Reviews that agree with the manifest, optionally with some cards
/// replaced. Used for dry runs and tests.
pub struct ManifestMvrSource {
    cards: BTreeMap<u64, Card>,
}

impl ManifestMvrSource {
    pub fn new(cards: &[Card]) -> Self {
        Self {
            cards: cards.iter().map(|c| (c.prn, c.clone())).collect(),
        }
    }

    /// Report `review` instead of the manifest entry with the same prn.
    pub fn with_review(mut self, review: Card) -> Self {
        self.cards.insert(review.prn, review);
        self
    }
}

#[async_trait]
impl MvrSource for ManifestMvrSource {
    async fn fetch(&self, _round: u32, prns: &[u64]) -> Result<Vec<Card>, AuditError> {
        Ok(prns
            .iter()
            .filter_map(|prn| self.cards.get(prn))
            .filter(|c| !c.phantom)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn card(prn: u64, vote: &str) -> Card {
        Card {
            index: prn as usize,
            location: format!("c{prn}"),
            prn,
            phantom: false,
            pool: None,
            votes: BTreeMap::from([("mayor".to_string(), vec![vote.to_string()])]),
        }
    }

    #[tokio::test]
    async fn test_directory_source_reads_round_file() {
        let dir = TempDir::new().unwrap();
        let paths = RecordPaths::for_project(dir.path());
        std::fs::create_dir_all(paths.round_dir(1)).unwrap();
        let cards = vec![card(5, "alice"), card(9, "bob")];
        std::fs::write(paths.mvrs_file(1), serde_json::to_string(&cards).unwrap()).unwrap();

        let source = DirectoryMvrSource::new(paths);
        let fetched = source.fetch(1, &[5, 9]).await.unwrap();
        assert_eq!(fetched, cards);
    }

    #[tokio::test]
    async fn test_directory_source_missing_file_is_missing_mvrs() {
        let dir = TempDir::new().unwrap();
        let source = DirectoryMvrSource::new(RecordPaths::for_project(dir.path()));
        let err = source.fetch(2, &[3, 4]).await.unwrap_err();
        assert!(matches!(
            err,
            AuditError::Data(DataError::MissingMvrs {
                round: 2,
                missing: 2,
                first: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_manifest_source_applies_overrides() {
        let cards = vec![card(1, "alice"), card(2, "alice")];
        let source = ManifestMvrSource::new(&cards).with_review(card(2, "bob"));
        let fetched = source.fetch(1, &[1, 2, 3]).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].votes_in("mayor"), Some(&["bob".to_string()][..]));
    }
}
