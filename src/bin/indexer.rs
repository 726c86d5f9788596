use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use garmentsearch::embedder::openai::OpenAiEmbedder;
use garmentsearch::{build_corpus, CorpusStore, HttpObjectStore, IngestConfig};

#[derive(Parser, Debug)]
#[command(
    name = "garmentsearch-indexer",
    about = "Build and publish a garment corpus from raw design artifacts"
)]
struct IndexerCli {
    /// Storage API base URL
    #[arg(
        long,
        env = "GARMENTSEARCH_STORAGE_API",
        default_value = "https://storage.googleapis.com"
    )]
    storage_api: String,

    /// Public base URL for permanently resolvable objects
    #[arg(
        long,
        env = "GARMENTSEARCH_PUBLIC_BASE",
        default_value = "https://storage.googleapis.com"
    )]
    public_base: String,

    /// Bucket holding raw garment folders and the published corpus
    #[arg(long, env = "GARMENTSEARCH_BUCKET")]
    bucket: String,

    /// Bearer token for storage API calls
    #[arg(long, env = "GARMENTSEARCH_STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Prefix of the raw data set to ingest
    #[arg(
        long,
        env = "GARMENTSEARCH_RAW_PREFIX",
        default_value = "GarmentData_v2/garments_5000_0"
    )]
    raw_prefix: String,

    /// Body-type subdirectories scanned under the raw prefix, comma separated
    #[arg(
        long,
        env = "GARMENTSEARCH_BODY_TYPES",
        default_value = "default_body,random_body"
    )]
    body_types: String,

    /// Base prefix the published corpus lives under
    #[arg(long, env = "GARMENTSEARCH_CORPUS_PREFIX", default_value = "corpus")]
    corpus_prefix: String,

    /// Version label for this publish (defaults to epoch milliseconds)
    #[arg(long, env = "GARMENTSEARCH_CORPUS_VERSION")]
    corpus_version: Option<String>,

    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier
    #[arg(
        long,
        env = "GARMENTSEARCH_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Optional embedding dimension override
    #[arg(long, env = "GARMENTSEARCH_OPENAI_DIMENSIONS")]
    openai_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "GARMENTSEARCH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Max descriptions per embedding request
    #[arg(long, env = "GARMENTSEARCH_OPENAI_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Seconds before embedding requests time out
    #[arg(long, env = "GARMENTSEARCH_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Retry attempts for transient embedding errors
    #[arg(long, env = "GARMENTSEARCH_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Seconds before storage requests time out
    #[arg(long, env = "GARMENTSEARCH_STORAGE_TIMEOUT_SECS", default_value_t = 60)]
    storage_timeout_secs: u64,

    /// Retry attempts for transient storage errors
    #[arg(long, env = "GARMENTSEARCH_STORAGE_MAX_RETRIES", default_value_t = 5)]
    storage_max_retries: usize,
}

fn main() -> Result<()> {
    let cli = IndexerCli::parse();
    let store = HttpObjectStore::new(
        cli.storage_api,
        cli.public_base,
        cli.bucket,
        cli.storage_token,
        None,
        Duration::from_secs(cli.storage_timeout_secs.max(1)),
        cli.storage_max_retries.max(1),
    )?;
    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.openai_model,
        cli.openai_dimensions,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
        cli.max_retries.max(1),
        cli.batch_size.max(1),
    )?;
    let config = IngestConfig {
        raw_prefix: cli.raw_prefix,
        body_types: split_list(&cli.body_types),
    };

    let (corpus, report) = build_corpus(&store, &embedder, &config)?;
    eprintln!(
        "ingestion complete: {} document(s) loaded, {} skipped.",
        report.loaded, report.skipped
    );

    let version = match cli.corpus_version {
        Some(version) => version,
        None => epoch_millis_version()?,
    };
    CorpusStore::new(&store, cli.corpus_prefix.as_str()).publish(&corpus, &version)?;
    println!(
        "published corpus version {} ({} documents, dimension {}).",
        version,
        corpus.len(),
        corpus.vectors().dim()
    );
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn epoch_millis_version() -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?;
    Ok(format!("v{}", now.as_millis()))
}
