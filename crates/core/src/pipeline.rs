use crate::config::PipelineConfig;
use crate::embedder::Embedder;
use crate::error::PipelineError;
use crate::generator::Generator;
use crate::index::{SearchFilter, UpsertMode, VectorStore};
use crate::ingest::{load_and_chunk_sources, LoadedSource};
use crate::loader::{expand_sources, DocumentLoader};
use crate::models::{
    Answer, CitedSource, IndexEntry, IngestReport, SourceDescriptor, SourceOutcome, SourceStatus,
};
use crate::retry::retry_with_backoff;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough indexed context to answer that question.";

/// Orchestrates the ingestion path (load, chunk, embed, upsert) and the
/// query path (embed, retrieve, assemble, generate). The vector store is
/// shared, lock-guarded state; the pipeline only reads it via search and
/// writes it via upsert.
pub struct Pipeline<E: Embedder, G: Generator> {
    loader: Arc<DocumentLoader>,
    embedder: E,
    generator: G,
    index: Arc<VectorStore>,
    config: PipelineConfig,
}

impl<E: Embedder, G: Generator> Pipeline<E, G> {
    pub fn new(
        loader: DocumentLoader,
        embedder: E,
        generator: G,
        index: Arc<VectorStore>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if embedder.dimensions() != index.dimensions() {
            return Err(PipelineError::Configuration(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimensions(),
                index.dimensions()
            )));
        }
        if embedder.identity() != index.provider() {
            return Err(PipelineError::Configuration(format!(
                "embedder identity {} does not match index provider {}",
                embedder.identity(),
                index.provider()
            )));
        }
        Ok(Self {
            loader: Arc::new(loader),
            embedder,
            generator,
            index,
            config,
        })
    }

    pub fn index(&self) -> &Arc<VectorStore> {
        &self.index
    }

    /// Ingests a batch of sources. Each source's outcome is independent;
    /// only fatal errors (corrupt index, misconfiguration) abort the whole
    /// request. With `replace_existing`, a document's prior entries are
    /// removed atomically before its new ones land.
    pub async fn ingest(
        &self,
        sources: &[SourceDescriptor],
        replace_existing: bool,
    ) -> Result<IngestReport, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let expanded: Vec<SourceDescriptor> =
            sources.iter().flat_map(|source| expand_sources(source)).collect();

        let loaded = load_and_chunk_sources(
            Arc::clone(&self.loader),
            expanded,
            (&self.config).into(),
            self.config.max_concurrent_loads,
            self.config.external_timeout,
        )
        .await;

        let mut report = IngestReport::default();
        for (descriptor, result) in loaded {
            let outcome = match result {
                Ok(source) => self.index_document(source, replace_existing).await,
                Err(error) => Err(error),
            };
            match outcome {
                Ok(written) => {
                    report.chunks_written += written;
                    report.outcomes.push(SourceOutcome {
                        source: descriptor.locator(),
                        status: SourceStatus::Ingested { chunks: written },
                    });
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(%request_id, source = %descriptor, error = %error, "source ingestion failed");
                    report.outcomes.push(SourceOutcome {
                        source: descriptor.locator(),
                        status: SourceStatus::Failed {
                            reason: error.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            %request_id,
            sources = report.outcomes.len(),
            failed = report.failed_sources(),
            chunks_written = report.chunks_written,
            latency_ms = started.elapsed().as_millis() as u64,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Embeds a document's chunks and upserts them in one batch, so a
    /// cancelled request never leaves a partial write in the index.
    async fn index_document(
        &self,
        source: LoadedSource,
        replace_existing: bool,
    ) -> Result<usize, PipelineError> {
        let texts: Vec<String> = source
            .chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect();
        let embeddings = self.embed_with_retry(&texts).await?;
        if embeddings.len() != source.chunks.len() {
            return Err(PipelineError::EmbeddingUnavailable {
                reason: format!(
                    "provider returned {} vectors for {} chunks",
                    embeddings.len(),
                    source.chunks.len()
                ),
                retryable: false,
            });
        }

        let ingested_at = Utc::now();
        let entries: Vec<IndexEntry> = source
            .chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                chunk,
                embedding,
                ingested_at,
            })
            .collect();

        let mode = if replace_existing {
            UpsertMode::ReplaceByDocument
        } else {
            UpsertMode::Append
        };
        let outcome = self.index.upsert(entries, mode).await?;
        Ok(outcome.written)
    }

    /// Answers a question from the indexed corpus. An empty or irrelevant
    /// index produces a well-formed insufficient-context answer, never an
    /// error; provider failures surface with their kind preserved.
    pub async fn query(
        &self,
        question: &str,
        return_sources: bool,
    ) -> Result<Answer, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::Configuration(
                "question is empty".to_string(),
            ));
        }

        let question_vector = self
            .embed_with_retry(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::EmbeddingUnavailable {
                reason: "provider returned no vector for the question".to_string(),
                retryable: false,
            })?;

        let hits = self
            .index
            .search(&question_vector, self.config.top_k, &SearchFilter::default())
            .await?;

        let top_score = hits.first().map(|(_, score)| *score);
        let relevant = match top_score {
            Some(score) if score >= self.config.relevance_floor => hits,
            _ => Vec::new(),
        };

        let (context, citations) = assemble_context(&relevant, self.config.context_budget);
        if citations.is_empty() {
            info!(
                %request_id,
                latency_ms = started.elapsed().as_millis() as u64,
                "query answered without sufficient context"
            );
            return Ok(Answer {
                text: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                sufficient_context: false,
            });
        }

        let prompt = build_prompt(question, &context);
        let retry = self.config.retry;
        let timeout = self.config.external_timeout;
        let text = retry_with_backoff(retry, "generate", || {
            let prompt = prompt.clone();
            async move {
                tokio::time::timeout(timeout, self.generator.generate(&prompt))
                    .await
                    .map_err(|_| PipelineError::GenerationUnavailable {
                        reason: format!("generation timed out after {timeout:?}"),
                        retryable: true,
                    })?
            }
        })
        .await?;

        info!(
            %request_id,
            cited = citations.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        Ok(Answer {
            text,
            sources: if return_sources { citations } else { Vec::new() },
            sufficient_context: true,
        })
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let retry = self.config.retry;
        let timeout = self.config.external_timeout;
        retry_with_backoff(retry, "embed", || async move {
            tokio::time::timeout(timeout, self.embedder.embed(texts))
                .await
                .map_err(|_| PipelineError::EmbeddingUnavailable {
                    reason: format!("embedding timed out after {timeout:?}"),
                    retryable: true,
                })?
        })
        .await
    }
}

/// Packs retrieved chunks into the prompt context, best hits first, until
/// the character budget runs out. Chunks that do not fit are dropped and
/// are not eligible as citations.
fn assemble_context(
    hits: &[(IndexEntry, f32)],
    context_budget: usize,
) -> (Vec<String>, Vec<CitedSource>) {
    let mut context = Vec::new();
    let mut citations = Vec::new();
    let mut used = 0;

    for (entry, score) in hits {
        let text_len = entry.chunk.text.chars().count();
        if used + text_len > context_budget {
            break;
        }
        used += text_len;

        let label = citations.len() + 1;
        let location = match entry.chunk.page {
            Some(page) => format!("{}, page {page}", entry.chunk.descriptor),
            None => entry.chunk.descriptor.to_string(),
        };
        context.push(format!("[{label}] ({location})\n{}", entry.chunk.text));
        citations.push(CitedSource {
            chunk_id: entry.chunk.chunk_id.clone(),
            locator: entry.chunk.descriptor.locator(),
            source_kind: entry.chunk.descriptor.kind(),
            page: entry.chunk.page,
            score: *score,
            preview: preview(&entry.chunk.text),
        });
    }

    (context, citations)
}

fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 200;
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}

fn build_prompt(question: &str, context: &[String]) -> String {
    format!(
        "You are a helpful assistant that answers questions based on the provided information. \
         Use the following context to answer the question.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Answer in a concise and accurate manner, and only use the provided context to answer. \
         If the answer is not in the context, say \"I don't know\".",
        context.join("\n\n"),
        question
    )
}
