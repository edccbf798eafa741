use crate::chunker::{split_document, ChunkingConfig};
use crate::error::PipelineError;
use crate::loader::DocumentLoader;
use crate::models::{Chunk, Document, SourceDescriptor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// One source, loaded and chunked, ready for embedding.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// Loads the given sources concurrently (bounded by `max_concurrent`) and
/// chunks each one as soon as its own load completes. Every source gets an
/// independent outcome; a failing source never aborts its neighbors.
/// Results come back in input order.
pub async fn load_and_chunk_sources(
    loader: Arc<DocumentLoader>,
    descriptors: Vec<SourceDescriptor>,
    chunking: ChunkingConfig,
    max_concurrent: usize,
    load_timeout: Duration,
) -> Vec<(SourceDescriptor, Result<LoadedSource, PipelineError>)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let mut handles = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let loader = Arc::clone(&loader);
        let semaphore = Arc::clone(&semaphore);
        let task_descriptor = descriptor.clone();
        let handle = tokio::spawn(async move {
            load_one(loader, semaphore, task_descriptor, chunking, load_timeout).await
        });
        handles.push((descriptor, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (descriptor, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(error) => Err(PipelineError::SourceUnavailable {
                descriptor: descriptor.clone(),
                reason: format!("load task failed: {error}"),
            }),
        };
        results.push((descriptor, result));
    }
    results
}

async fn load_one(
    loader: Arc<DocumentLoader>,
    semaphore: Arc<Semaphore>,
    descriptor: SourceDescriptor,
    chunking: ChunkingConfig,
    load_timeout: Duration,
) -> Result<LoadedSource, PipelineError> {
    let _permit = semaphore.acquire_owned().await.map_err(|_| {
        PipelineError::Configuration("loader concurrency limiter closed".to_string())
    })?;

    let document = tokio::time::timeout(load_timeout, loader.load(&descriptor))
        .await
        .map_err(|_| PipelineError::SourceUnavailable {
            descriptor: descriptor.clone(),
            reason: format!("load timed out after {load_timeout:?}"),
        })??;

    let chunks = split_document(&document, chunking)?;
    debug!(source = %descriptor, chunks = chunks.len(), "source chunked");
    Ok(LoadedSource { document, chunks })
}
