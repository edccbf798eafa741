use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Answer-generation capability. Takes the fully assembled prompt and
/// returns the synthesized answer text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Box<T> {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        (**self).generate(prompt).await
    }
}

/// Remote generation provider speaking the OpenAI-style chat-completions
/// wire format.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        debug!(model = %self.model, prompt_len = prompt.len(), "generation request");

        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            PipelineError::GenerationUnavailable {
                reason: error.to_string(),
                retryable: error.is_timeout() || error.is_connect(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::GenerationUnavailable {
                reason: format!("generation endpoint returned {status}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let payload: ChatResponse =
            response
                .json()
                .await
                .map_err(|error| PipelineError::GenerationUnavailable {
                    reason: format!("invalid generation response: {error}"),
                    retryable: false,
                })?;

        payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::GenerationUnavailable {
                reason: "generation response contained no choices".to_string(),
                retryable: false,
            })
    }
}
