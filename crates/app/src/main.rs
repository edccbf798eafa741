use chrono::Utc;
use clap::{Parser, Subcommand};
use corpusqa_core::{
    CharNgramEmbedder, DocumentLoader, Embedder, Generator, HttpEmbedder, HttpGenerator,
    LoaderOptions, Pipeline, PipelineConfig, RetryPolicy, SourceDescriptor, SourceStatus,
    VectorStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "corpusqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path of the vector index snapshot.
    #[arg(long, env = "CORPUSQA_INDEX", default_value = "corpusqa-index.json")]
    index_path: PathBuf,

    /// OpenAI-style embeddings endpoint. The local deterministic embedder
    /// is used when unset.
    #[arg(long, env = "CORPUSQA_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding model name (also the provider identity in the snapshot).
    #[arg(long, env = "CORPUSQA_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    #[arg(long, env = "CORPUSQA_EMBEDDING_DIMENSIONS", default_value = "1536")]
    embedding_dimensions: usize,

    /// Chat-completions endpoint used for answer generation.
    #[arg(
        long,
        env = "CORPUSQA_GENERATION_ENDPOINT",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    generation_endpoint: String,

    #[arg(long, env = "CORPUSQA_GENERATION_MODEL", default_value = "gpt-4o-mini")]
    generation_model: String,

    /// Bearer token for the embedding and generation endpoints.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of an S3-compatible gateway for s3://bucket/key sources.
    #[arg(long, env = "CORPUSQA_OBJECT_STORE_ENDPOINT")]
    object_store_endpoint: Option<String>,

    #[arg(long, env = "CORPUSQA_OBJECT_STORE_TOKEN", hide_env_values = true)]
    object_store_token: Option<String>,

    /// Maximum characters per chunk.
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Number of chunks retrieved per question.
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Maximum characters of retrieved context per prompt.
    #[arg(long, default_value = "6000")]
    context_budget: usize,

    /// Minimum top-hit similarity for retrieval to count as relevant.
    #[arg(long, default_value = "0.1")]
    relevance_floor: f32,

    /// Timeout in seconds for each external call.
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest sources (local paths or directories, s3://bucket/key, URLs).
    Ingest {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Replace prior entries of each ingested document instead of
        /// appending.
        #[arg(long, default_value_t = false)]
        replace: bool,
    },
    /// Ask a question against the indexed corpus. Cited source chunks are
    /// printed alongside the answer unless suppressed.
    Query {
        question: String,
        /// Print the answer alone, without the cited source chunks.
        #[arg(long, default_value_t = false)]
        hide_sources: bool,
    },
    /// Show index size and provider identity.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder: Box<dyn Embedder> = match &cli.embedding_endpoint {
        Some(endpoint) => Box::new(HttpEmbedder::new(
            endpoint,
            cli.api_key.clone(),
            cli.embedding_model.clone(),
            cli.embedding_dimensions,
        )),
        None => Box::new(CharNgramEmbedder::default()),
    };
    let dimensions = embedder.dimensions();
    let identity = embedder.identity().to_string();

    let index = Arc::new(VectorStore::load(&cli.index_path, dimensions, &identity).await?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        index_path = %cli.index_path.display(),
        entries = index.len().await,
        provider = %identity,
        "corpusqa boot"
    );

    let generator: Box<dyn Generator> = Box::new(HttpGenerator::new(
        &cli.generation_endpoint,
        cli.api_key.clone(),
        cli.generation_model.clone(),
        0.0,
    ));

    let loader = DocumentLoader::new(LoaderOptions {
        object_store_endpoint: cli.object_store_endpoint.clone(),
        object_store_token: cli.object_store_token.clone(),
        timeout: Some(Duration::from_secs(cli.timeout_secs)),
    })?;

    let config = PipelineConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        top_k: cli.top_k,
        context_budget: cli.context_budget,
        relevance_floor: cli.relevance_floor,
        external_timeout: Duration::from_secs(cli.timeout_secs),
        retry: RetryPolicy::default(),
        ..Default::default()
    };

    let pipeline = Pipeline::new(loader, embedder, generator, Arc::clone(&index), config)?;

    match cli.command {
        Command::Ingest { sources, replace } => {
            let descriptors = sources
                .iter()
                .map(|source| {
                    SourceDescriptor::parse(source)
                        .map_err(|reason| anyhow::anyhow!("invalid source {source}: {reason}"))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let report = pipeline.ingest(&descriptors, replace).await?;

            for outcome in &report.outcomes {
                match &outcome.status {
                    SourceStatus::Ingested { chunks } => {
                        println!("ingested {} ({chunks} chunks)", outcome.source);
                    }
                    SourceStatus::Failed { reason } => {
                        warn!(source = %outcome.source, reason = %reason, "source skipped");
                        println!("failed   {}: {reason}", outcome.source);
                    }
                }
            }

            index.persist(&cli.index_path).await?;
            println!(
                "{} chunks written across {} sources ({} failed); index now holds {} entries",
                report.chunks_written,
                report.outcomes.len(),
                report.failed_sources(),
                index.len().await
            );
        }
        Command::Query {
            question,
            hide_sources,
        } => {
            let show_sources = !hide_sources;
            let answer = pipeline.query(&question, show_sources).await?;

            println!("{}", answer.text);
            if !answer.sufficient_context {
                println!("(no sufficiently relevant context was found in the index)");
            }
            if show_sources {
                for (position, source) in answer.sources.iter().enumerate() {
                    match source.page {
                        Some(page) => println!(
                            "[{}] score={:.4} {} (page {page})",
                            position + 1,
                            source.score,
                            source.locator
                        ),
                        None => println!(
                            "[{}] score={:.4} {}",
                            position + 1,
                            source.score,
                            source.locator
                        ),
                    }
                    println!("    {}", source.preview);
                }
            }
        }
        Command::Status => {
            println!(
                "index: {} entries, dimension {}, provider {}",
                index.len().await,
                index.dimensions(),
                index.provider()
            );
        }
    }

    Ok(())
}
