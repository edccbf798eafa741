pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod retry;
#[cfg(test)]
mod testsupport;

pub use chunker::{chunk_identifier, normalize_whitespace, split_document, ChunkingConfig};
pub use config::PipelineConfig;
pub use embedder::{CharNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{PipelineError, Result};
pub use generator::{Generator, HttpGenerator};
pub use index::{SearchFilter, UpsertMode, UpsertOutcome, VectorStore};
pub use ingest::{load_and_chunk_sources, LoadedSource};
pub use loader::{expand_sources, DocumentLoader, LoaderOptions};
pub use models::{
    Answer, Chunk, CitedSource, Document, IndexEntry, IngestReport, PageOffset, SourceDescriptor,
    SourceKind, SourceOutcome, SourceStatus,
};
pub use pipeline::Pipeline;
pub use retry::{retry_with_backoff, RetryPolicy};
