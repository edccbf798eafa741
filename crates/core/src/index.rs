use crate::error::PipelineError;
use crate::models::IndexEntry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Insert new entries; entries whose chunk id is already present are
    /// skipped, so re-ingesting unchanged content is a no-op.
    Append,
    /// Remove every existing entry belonging to any incoming entry's parent
    /// document, then insert. Atomic with respect to concurrent searches.
    ReplaceByDocument,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub written: usize,
    pub removed: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    version: u32,
    dimensions: usize,
    provider: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    header: SnapshotHeader,
    entries: Vec<IndexEntry>,
}

/// The one piece of mutable shared state in the pipeline: chunk-id-keyed
/// entries plus an exact nearest-neighbor scan over their embeddings.
/// Reads run in parallel; writes serialize behind the lock, so a
/// replace-by-document is never observed half-applied.
pub struct VectorStore {
    dimensions: usize,
    provider: String,
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl VectorStore {
    pub fn new(dimensions: usize, provider: impl Into<String>) -> Self {
        Self {
            dimensions,
            provider: provider.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, chunk_id: &str) -> bool {
        self.entries.read().await.contains_key(chunk_id)
    }

    pub async fn upsert(
        &self,
        entries: Vec<IndexEntry>,
        mode: UpsertMode,
    ) -> Result<UpsertOutcome, PipelineError> {
        for entry in &entries {
            if entry.embedding.len() != self.dimensions {
                return Err(PipelineError::Configuration(format!(
                    "entry {} has dimension {} but the index holds {}",
                    entry.chunk.chunk_id,
                    entry.embedding.len(),
                    self.dimensions
                )));
            }
        }

        let mut outcome = UpsertOutcome::default();
        let mut state = self.entries.write().await;

        if mode == UpsertMode::ReplaceByDocument {
            let documents: HashSet<&str> = entries
                .iter()
                .map(|entry| entry.chunk.document_id.as_str())
                .collect();
            let before = state.len();
            state.retain(|_, existing| !documents.contains(existing.chunk.document_id.as_str()));
            outcome.removed = before - state.len();
        }

        for entry in entries {
            match mode {
                UpsertMode::Append if state.contains_key(&entry.chunk.chunk_id) => {
                    outcome.skipped_existing += 1;
                }
                _ => {
                    state.insert(entry.chunk.chunk_id.clone(), entry);
                    outcome.written += 1;
                }
            }
        }

        debug!(
            written = outcome.written,
            removed = outcome.removed,
            skipped = outcome.skipped_existing,
            index_size = state.len(),
            "upsert applied"
        );
        Ok(outcome)
    }

    /// Top-`k` entries by descending cosine similarity. Ties break toward
    /// the more recently ingested entry, then by chunk id, so repeated
    /// queries against a static index are deterministic. An empty index
    /// yields an empty result, not an error.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(IndexEntry, f32)>, PipelineError> {
        if query_vector.len() != self.dimensions {
            return Err(PipelineError::Configuration(format!(
                "query vector dimension {} does not match index dimension {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        // Score against borrowed entries; only the surviving top-k get cloned.
        let state = self.entries.read().await;
        let mut scored: Vec<(&IndexEntry, f32)> = state
            .values()
            .filter(|entry| match &filter.document_id {
                Some(document_id) => entry.chunk.document_id == *document_id,
                None => true,
            })
            .map(|entry| (entry, cosine_similarity(query_vector, &entry.embedding)))
            .collect();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| right.0.ingested_at.cmp(&left.0.ingested_at))
                .then_with(|| left.0.chunk.chunk_id.cmp(&right.0.chunk.chunk_id))
        });
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(entry, score)| (entry.clone(), score))
            .collect())
    }

    /// Snapshots the whole index to `path`. Written to a sibling temp file
    /// and renamed, so a crash never leaves a torn snapshot behind.
    pub async fn persist(&self, path: &Path) -> Result<(), PipelineError> {
        let entries: Vec<IndexEntry> = {
            let state = self.entries.read().await;
            state.values().cloned().collect()
        };
        let count = entries.len();

        let snapshot = Snapshot {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                dimensions: self.dimensions,
                provider: self.provider.clone(),
            },
            entries,
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|error| PipelineError::IndexCorrupt(format!("snapshot encode: {error}")))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(path = %path.display(), entries = count, "index snapshot persisted");
        Ok(())
    }

    /// Restores an index from `path`. A missing snapshot yields an empty
    /// index so a fresh deployment starts cold; a snapshot whose provider
    /// identity or dimensionality disagrees with the configured provider is
    /// a fatal configuration error, never a silent degrade.
    pub async fn load(
        path: &Path,
        dimensions: usize,
        provider: &str,
    ) -> Result<Self, PipelineError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot found, starting with an empty index");
                return Ok(Self::new(dimensions, provider));
            }
            Err(error) => return Err(error.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|error| PipelineError::IndexCorrupt(format!("snapshot decode: {error}")))?;

        if snapshot.header.version != SNAPSHOT_VERSION {
            return Err(PipelineError::IndexCorrupt(format!(
                "unsupported snapshot version {}",
                snapshot.header.version
            )));
        }
        if snapshot.header.dimensions != dimensions || snapshot.header.provider != provider {
            return Err(PipelineError::Configuration(format!(
                "snapshot was written by provider {} at dimension {}, configured {} at {}",
                snapshot.header.provider, snapshot.header.dimensions, provider, dimensions
            )));
        }

        let mut entries = HashMap::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries {
            if entry.embedding.len() != dimensions {
                return Err(PipelineError::IndexCorrupt(format!(
                    "entry {} has dimension {} in a dimension-{} snapshot",
                    entry.chunk.chunk_id,
                    entry.embedding.len(),
                    dimensions
                )));
            }
            entries.insert(entry.chunk.chunk_id.clone(), entry);
        }

        info!(path = %path.display(), entries = entries.len(), "index snapshot loaded");
        Ok(Self {
            dimensions,
            provider: provider.to_string(),
            entries: RwLock::new(entries),
        })
    }
}

fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut left_sq = 0f32;
    let mut right_sq = 0f32;
    for (a, b) in left.iter().zip(right.iter()) {
        dot += a * b;
        left_sq += a * a;
        right_sq += b * b;
    }
    let denominator = left_sq.sqrt() * right_sq.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SourceDescriptor};
    use chrono::{Duration, Utc};

    fn entry(chunk_id: &str, document_id: &str, embedding: Vec<f32>) -> IndexEntry {
        let descriptor = SourceDescriptor::parse(&format!("/data/{document_id}.txt")).unwrap();
        IndexEntry {
            chunk: Chunk {
                chunk_id: chunk_id.to_string(),
                document_id: document_id.to_string(),
                sequence: 0,
                text: format!("text of {chunk_id}"),
                page: None,
                descriptor,
            },
            embedding,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn search_orders_by_descending_similarity_and_caps_k() {
        let store = VectorStore::new(2, "char-ngram-v1");
        store
            .upsert(
                vec![
                    entry("a", "doc-1", vec![1.0, 0.0]),
                    entry("b", "doc-1", vec![0.8, 0.6]),
                    entry("c", "doc-2", vec![0.0, 1.0]),
                ],
                UpsertMode::Append,
            )
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 2, &SearchFilter::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.chunk.chunk_id, "a");
        assert_eq!(hits[1].0.chunk.chunk_id, "b");
        assert!(hits[0].1 >= hits[1].1);
    }

    #[tokio::test]
    async fn search_on_empty_index_returns_empty_not_error() {
        let store = VectorStore::new(2, "char-ngram-v1");
        let hits = store
            .search(&[1.0, 0.0], 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_recency() {
        let store = VectorStore::new(2, "char-ngram-v1");
        let mut older = entry("older", "doc-1", vec![1.0, 0.0]);
        older.ingested_at = Utc::now() - Duration::hours(1);
        let newer = entry("newer", "doc-2", vec![1.0, 0.0]);

        store
            .upsert(vec![older, newer], UpsertMode::Append)
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 2, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].0.chunk.chunk_id, "newer");
        assert_eq!(hits[1].0.chunk.chunk_id, "older");
    }

    #[tokio::test]
    async fn append_skips_existing_chunk_ids() {
        let store = VectorStore::new(2, "char-ngram-v1");
        let first = store
            .upsert(vec![entry("a", "doc-1", vec![1.0, 0.0])], UpsertMode::Append)
            .await
            .unwrap();
        let second = store
            .upsert(vec![entry("a", "doc-1", vec![1.0, 0.0])], UpsertMode::Append)
            .await
            .unwrap();

        assert_eq!(first.written, 1);
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped_existing, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn replace_removes_all_prior_entries_of_the_document() {
        let store = VectorStore::new(2, "char-ngram-v1");
        store
            .upsert(
                vec![
                    entry("old-1", "doc-1", vec![1.0, 0.0]),
                    entry("old-2", "doc-1", vec![0.0, 1.0]),
                    entry("other", "doc-2", vec![0.5, 0.5]),
                ],
                UpsertMode::Append,
            )
            .await
            .unwrap();

        let outcome = store
            .upsert(
                vec![entry("new-1", "doc-1", vec![0.3, 0.7])],
                UpsertMode::ReplaceByDocument,
            )
            .await
            .unwrap();

        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.written, 1);
        assert_eq!(store.len().await, 2);
        assert!(store.contains("new-1").await);
        assert!(store.contains("other").await);
        assert!(!store.contains("old-1").await);
        assert!(!store.contains("old-2").await);
    }

    #[tokio::test]
    async fn search_filter_restricts_to_a_document() {
        let store = VectorStore::new(2, "char-ngram-v1");
        store
            .upsert(
                vec![
                    entry("a", "doc-1", vec![1.0, 0.0]),
                    entry("b", "doc-2", vec![1.0, 0.0]),
                ],
                UpsertMode::Append,
            )
            .await
            .unwrap();

        let filter = SearchFilter {
            document_id: Some("doc-2".to_string()),
        };
        let hits = store.search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.chunk.chunk_id, "b");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_configuration_error() {
        let store = VectorStore::new(2, "char-ngram-v1");
        let result = store
            .upsert(vec![entry("a", "doc-1", vec![1.0, 0.0, 0.0])], UpsertMode::Append)
            .await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));

        let result = store.search(&[1.0], 1, &SearchFilter::default()).await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn snapshot_round_trip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let store = VectorStore::new(2, "char-ngram-v1");
        store
            .upsert(
                vec![
                    entry("a", "doc-1", vec![1.0, 0.0]),
                    entry("b", "doc-2", vec![0.0, 1.0]),
                ],
                UpsertMode::Append,
            )
            .await
            .unwrap();
        store.persist(&path).await.unwrap();

        let restored = VectorStore::load(&path, 2, "char-ngram-v1").await.unwrap();
        assert_eq!(restored.len().await, 2);
        assert!(restored.contains("a").await);
        assert!(restored.contains("b").await);

        let original = store.entries.read().await;
        let loaded = restored.entries.read().await;
        for (chunk_id, entry) in original.iter() {
            assert_eq!(loaded.get(chunk_id), Some(entry));
        }
    }

    #[tokio::test]
    async fn missing_snapshot_loads_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let store = VectorStore::load(&path, 4, "char-ngram-v1").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn provider_mismatch_on_load_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let store = VectorStore::new(2, "char-ngram-v1");
        store.persist(&path).await.unwrap();

        let result = VectorStore::load(&path, 2, "text-embedding-3-small").await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));

        let result = VectorStore::load(&path, 8, "char-ngram-v1").await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_reported_as_index_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();

        let result = VectorStore::load(&path, 2, "char-ngram-v1").await;
        assert!(matches!(result, Err(PipelineError::IndexCorrupt(_))));
    }
}
