use crate::error::PipelineError;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Pipeline knobs, fixed at process start and immutable afterwards.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks; must stay below
    /// `chunk_size`.
    pub chunk_overlap: usize,
    /// How many nearest neighbors retrieval asks the index for.
    pub top_k: usize,
    /// Maximum total characters of retrieved context assembled into the
    /// generation prompt; lowest-ranked chunks are dropped first.
    pub context_budget: usize,
    /// Minimum similarity score of the top hit for retrieval to count as
    /// relevant. Below it the query is answered as insufficient context.
    pub relevance_floor: f32,
    /// Concurrent source loads per ingestion request.
    pub max_concurrent_loads: usize,
    /// Timeout applied to every external call (load, embed, generate).
    pub external_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 4,
            context_budget: 6_000,
            relevance_floor: 0.1,
            max_concurrent_loads: 4,
            external_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Configuration(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::Configuration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(PipelineError::Configuration(
                "top_k must be positive".to_string(),
            ));
        }
        if self.max_concurrent_loads == 0 {
            return Err(PipelineError::Configuration(
                "max_concurrent_loads must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let config = PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }
}
