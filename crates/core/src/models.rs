use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LocalFile,
    ObjectStore,
    Web,
}

/// A named ingestion source: where a document lives and how to fetch it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    LocalFile { path: String },
    ObjectStore { bucket: String, key: String },
    Web { url: String },
}

impl SourceDescriptor {
    /// Parses the string form used on the wire and the command line:
    /// `s3://bucket/key`, `http(s)://...`, anything else is a local path.
    pub fn parse(source: &str) -> Result<Self, String> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err("empty source".to_string());
        }

        if let Some(rest) = trimmed.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| format!("object store source must be s3://bucket/key: {trimmed}"))?;
            if bucket.is_empty() || key.is_empty() {
                return Err(format!(
                    "object store source must be s3://bucket/key: {trimmed}"
                ));
            }
            return Ok(Self::ObjectStore {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            url::Url::parse(trimmed).map_err(|error| format!("invalid url {trimmed}: {error}"))?;
            return Ok(Self::Web {
                url: trimmed.to_string(),
            });
        }

        Ok(Self::LocalFile {
            path: trimmed.to_string(),
        })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::LocalFile { .. } => SourceKind::LocalFile,
            Self::ObjectStore { .. } => SourceKind::ObjectStore,
            Self::Web { .. } => SourceKind::Web,
        }
    }

    /// Canonical locator string; also the basis of the document identifier,
    /// so the same source keeps its identity across content revisions.
    pub fn locator(&self) -> String {
        match self {
            Self::LocalFile { path } => path.clone(),
            Self::ObjectStore { bucket, key } => format!("s3://{bucket}/{key}"),
            Self::Web { url } => url.clone(),
        }
    }

    pub fn document_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.locator().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator())
    }
}

/// Byte offset at which a PDF page begins within the concatenated text,
/// kept so chunk provenance can cite a page number.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageOffset {
    pub page: u32,
    pub offset: usize,
}

/// A loaded source, normalized to plain text. Lives only for the duration
/// of the ingestion transaction.
#[derive(Debug, Clone)]
pub struct Document {
    pub descriptor: SourceDescriptor,
    pub document_id: String,
    /// Hex SHA-256 of the raw fetched bytes, used for deduplication and
    /// change detection.
    pub fingerprint: String,
    pub text: String,
    pub page_offsets: Vec<PageOffset>,
}

impl Document {
    pub fn new(descriptor: SourceDescriptor, raw: &[u8], text: String) -> Self {
        Self::with_pages(descriptor, raw, text, Vec::new())
    }

    pub fn with_pages(
        descriptor: SourceDescriptor,
        raw: &[u8],
        text: String,
        page_offsets: Vec<PageOffset>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw);
        let fingerprint = format!("{:x}", hasher.finalize());
        let document_id = descriptor.document_id();
        Self {
            descriptor,
            document_id,
            fingerprint,
            text,
            page_offsets,
        }
    }

    /// Page containing the given byte offset, if page boundaries are known.
    pub fn page_at(&self, offset: usize) -> Option<u32> {
        self.page_offsets
            .iter()
            .take_while(|marker| marker.offset <= offset)
            .last()
            .map(|marker| marker.page)
    }
}

/// A retrievable text span, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Derived from the document fingerprint plus the sequence index, so
    /// re-ingesting identical content yields identical identities.
    pub chunk_id: String,
    pub document_id: String,
    pub sequence: u64,
    pub text: String,
    pub page: Option<u32>,
    pub descriptor: SourceDescriptor,
}

/// What the vector index stores per chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub ingested_at: DateTime<Utc>,
}

/// Citation attached to an answer; only chunks that made it into the
/// generation prompt are eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitedSource {
    pub chunk_id: String,
    pub locator: String,
    pub source_kind: SourceKind,
    pub page: Option<u32>,
    pub score: f32,
    pub preview: String,
}

/// Per-query result. Ephemeral; never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<CitedSource>,
    pub sufficient_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Ingested { chunks: usize },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    #[serde(flatten)]
    pub status: SourceStatus,
}

/// Outcome of one ingestion request. Individual sources fail independently;
/// the batch as a whole partially succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestReport {
    pub outcomes: Vec<SourceOutcome>,
    pub chunks_written: usize,
}

impl IngestReport {
    pub fn failed_sources(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, SourceStatus::Failed { .. }))
            .count()
    }
}
