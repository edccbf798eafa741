use crate::models::SourceDescriptor;
use thiserror::Error;

/// Error taxonomy for the ingestion and query pipeline.
///
/// `IndexCorrupt` and `Configuration` are fatal to the whole request;
/// provider errors carry a `retryable` flag consumed by the retry combinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {descriptor}: {reason}")]
    SourceUnavailable {
        descriptor: SourceDescriptor,
        reason: String,
    },

    #[error("embedding provider unavailable: {reason}")]
    EmbeddingUnavailable { reason: String, retryable: bool },

    #[error("generation provider unavailable: {reason}")]
    GenerationUnavailable { reason: String, retryable: bool },

    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::EmbeddingUnavailable {
                retryable: true,
                ..
            } | PipelineError::GenerationUnavailable {
                retryable: true,
                ..
            }
        )
    }

    /// Fatal errors abort the whole request instead of being reported
    /// per-source.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::IndexCorrupt(_) | PipelineError::Configuration(_)
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
