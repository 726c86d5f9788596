use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use garmentsearch::embedder::openai::OpenAiEmbedder;
use garmentsearch::{
    CorpusStore, Embedder, ExactL2Index, HttpObjectStore, ResultAssembler,
};

#[derive(Parser, Debug)]
#[command(
    name = "garmentsearch-cli",
    about = "Query the published garment corpus from the terminal"
)]
struct SearchCli {
    /// Free-text garment query
    #[arg(long)]
    query: String,

    /// Number of matches to return
    #[arg(long, default_value_t = 3)]
    top_k: usize,

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

    /// Bucket holding the published corpus and image assets
    #[arg(long, env = "GARMENTSEARCH_BUCKET")]
    bucket: String,

    /// Bearer token for storage API calls
    #[arg(long, env = "GARMENTSEARCH_STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Endpoint that issues time-limited pattern download URLs
    #[arg(long, env = "GARMENTSEARCH_SIGNER_ENDPOINT")]
    signer_endpoint: Option<String>,

    /// Base prefix the published corpus lives under
    #[arg(long, env = "GARMENTSEARCH_CORPUS_PREFIX", default_value = "corpus")]
    corpus_prefix: String,

    /// OpenAI API key used for the query embedding
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

    /// Run the row scan on the rayon thread pool
    #[arg(long, default_value_t = false)]
    parallel_scan: bool,
}

fn main() -> Result<()> {
    let cli = SearchCli::parse();
    let store = HttpObjectStore::new(
        cli.storage_api,
        cli.public_base,
        cli.bucket,
        cli.storage_token,
        cli.signer_endpoint,
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
        1,
    )?;

    eprintln!("loading published corpus...");
    let corpus = CorpusStore::new(&store, cli.corpus_prefix.as_str()).load_current()?;
    eprintln!(
        "searching {} document(s) for top {} matches to {:?}...",
        corpus.len(),
        cli.top_k,
        cli.query
    );

    let embedding = embedder.embed(&cli.query)?;
    let hits = ExactL2Index::new(corpus.vectors())
        .with_parallel_scan(cli.parallel_scan)
        .search(&embedding, cli.top_k)?;
    let results = ResultAssembler::new(&store).assemble(&corpus, &hits)?;

    if results.is_empty() {
        println!("no matching garments.");
        return Ok(());
    }
    println!("--- Matching Garments ---");
    for (rank, garment) in results.iter().enumerate() {
        println!(
            "{}. {} (distance {:.4})",
            rank + 1,
            garment.id,
            garment.distance
        );
        for image in &garment.images {
            println!("   {image}");
        }
    }
    Ok(())
}
