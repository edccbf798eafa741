use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Embedding capability. Output is aligned 1:1 with the input order; any
/// failure fails the whole batch so chunk-to-vector alignment can never
/// silently drift.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    fn dimensions(&self) -> usize;

    /// Provider identity recorded in the index snapshot header. Vectors from
    /// different identities must never be mixed in one index.
    fn identity(&self) -> &str;
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        (**self).embed(texts).await
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn identity(&self) -> &str {
        (**self).identity()
    }
}

/// Deterministic local embedder hashing character trigrams into a
/// fixed-size normalized vector. No network, stable across runs; the
/// offline and test provider.
#[derive(Debug, Clone, Copy)]
pub struct CharNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharNgramEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharNgramEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn identity(&self) -> &str {
        "char-ngram-v1"
    }
}

/// Remote embedding provider speaking the OpenAI-style `/embeddings` wire
/// format. Batches requests internally.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            dimensions,
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": batch,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            PipelineError::EmbeddingUnavailable {
                reason: error.to_string(),
                retryable: error.is_timeout() || error.is_connect(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::EmbeddingUnavailable {
                reason: format!("embedding endpoint returned {status}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let payload: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|error| PipelineError::EmbeddingUnavailable {
                    reason: format!("invalid embedding response: {error}"),
                    retryable: false,
                })?;

        if payload.data.len() != batch.len() {
            return Err(PipelineError::EmbeddingUnavailable {
                reason: format!(
                    "provider returned {} vectors for {} inputs",
                    payload.data.len(),
                    batch.len()
                ),
                retryable: false,
            });
        }

        let mut vectors = Vec::with_capacity(payload.data.len());
        for item in payload.data {
            if item.embedding.len() != self.dimensions {
                return Err(PipelineError::Configuration(format!(
                    "provider returned dimension {} but {} is configured",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch_len = batch.len(), model = %self.model, "embedding batch");
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn identity(&self) -> &str {
        &self.model
    }
}
