use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use garmentsearch::embedder::openai::OpenAiEmbedder;
use garmentsearch::{
    Corpus, CorpusStore, Embedder, ExactL2Index, HttpObjectStore, RankedGarment, ResultAssembler,
};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

#[derive(Parser, Debug)]
#[command(
    name = "garmentsearch-retriever",
    about = "HTTP API that serves exact nearest-neighbor garment retrieval"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "GARMENTSEARCH_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Storage API base URL.
    #[arg(
        long,
        env = "GARMENTSEARCH_STORAGE_API",
        default_value = "https://storage.googleapis.com"
    )]
    storage_api: String,

    /// Public base URL for permanently resolvable objects.
    #[arg(
        long,
        env = "GARMENTSEARCH_PUBLIC_BASE",
        default_value = "https://storage.googleapis.com"
    )]
    public_base: String,

    /// Bucket holding the published corpus and image assets.
    #[arg(long, env = "GARMENTSEARCH_BUCKET")]
    bucket: String,

    /// Bearer token for storage API calls.
    #[arg(long, env = "GARMENTSEARCH_STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Endpoint that issues time-limited pattern download URLs.
    #[arg(long, env = "GARMENTSEARCH_SIGNER_ENDPOINT")]
    signer_endpoint: Option<String>,

    /// Base prefix the published corpus lives under.
    #[arg(long, env = "GARMENTSEARCH_CORPUS_PREFIX", default_value = "corpus")]
    corpus_prefix: String,

    /// Default top-k when the client does not override it.
    #[arg(long, default_value_t = 3)]
    default_top_k: usize,

    /// Maximum top-k allowed per request.
    #[arg(long, default_value_t = 12)]
    max_top_k: usize,

    /// Minutes a pattern download link stays valid.
    #[arg(long, default_value_t = 15)]
    signed_url_minutes: u64,

    /// OpenAI API key used for query embeddings.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "GARMENTSEARCH_OPENAI_MODEL",
        default_value = "text-embedding-3-small"
    )]
    openai_model: String,

    /// Optional embedding dimension override.
    #[arg(long, env = "GARMENTSEARCH_OPENAI_DIMENSIONS")]
    openai_dimensions: Option<usize>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "GARMENTSEARCH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Max inputs per embedding request.
    #[arg(long, env = "GARMENTSEARCH_OPENAI_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "GARMENTSEARCH_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    openai_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, env = "GARMENTSEARCH_OPENAI_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Seconds before storage requests time out.
    #[arg(long, env = "GARMENTSEARCH_STORAGE_TIMEOUT_SECS", default_value_t = 60)]
    storage_timeout_secs: u64,

    /// Retry attempts for transient storage errors.
    #[arg(long, env = "GARMENTSEARCH_STORAGE_MAX_RETRIES", default_value_t = 5)]
    storage_max_retries: usize,

    /// Max cached query embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Max requests per minute allowed (0 disables rate limiting).
    #[arg(long, default_value_t = 120)]
    max_requests_per_minute: u32,

    /// Rate-limit burst size (tokens available instantly).
    #[arg(long, default_value_t = 12)]
    rate_limit_burst: u32,

    /// Run the row scan on the rayon thread pool.
    #[arg(long, default_value_t = false)]
    parallel_scan: bool,
}

#[derive(Clone)]
struct AppState {
    corpus: Arc<RwLock<Arc<Corpus>>>,
    store: Arc<HttpObjectStore>,
    corpus_prefix: Arc<String>,
    embedder: Arc<OpenAiEmbedder>,
    default_top_k: usize,
    max_top_k: usize,
    signed_ttl: Duration,
    embedding_cache: Option<Arc<Mutex<LruCache<String, Vec<f32>>>>>,
    rate_limiter: Option<RateLimiter>,
    parallel_scan: bool,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<ResponseGarment>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseGarment {
    id: String,
    distance: f32,
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_k: usize,
    corpus_size: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ReloadResponse {
    documents: usize,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ApiCli::parse();
    let store = Arc::new(HttpObjectStore::new(
        cli.storage_api,
        cli.public_base,
        cli.bucket,
        cli.storage_token,
        cli.signer_endpoint,
        Duration::from_secs(cli.storage_timeout_secs.max(1)),
        cli.storage_max_retries.max(1),
    )?);
    let embedder = Arc::new(OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.openai_base_url,
        cli.openai_model,
        cli.openai_dimensions,
        Duration::from_secs(cli.openai_timeout_secs.max(1)),
        cli.max_retries.max(1),
        cli.batch_size.max(1),
    )?);

    let corpus_prefix = Arc::new(cli.corpus_prefix);
    let initial = load_corpus(&store, &corpus_prefix).await?;
    eprintln!(
        "loaded corpus: {} document(s), dimension {}.",
        initial.len(),
        initial.vectors().dim()
    );

    let state = AppState {
        corpus: Arc::new(RwLock::new(Arc::new(initial))),
        store,
        corpus_prefix,
        embedder,
        default_top_k: cli.default_top_k.max(1),
        max_top_k: cli.max_top_k.max(1),
        signed_ttl: Duration::from_secs(cli.signed_url_minutes.max(1) * 60),
        embedding_cache: build_cache(cli.embedding_cache_size),
        rate_limiter: RateLimiter::new(cli.max_requests_per_minute, cli.rate_limit_burst),
        parallel_scan: cli.parallel_scan,
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/query", post(query_handler))
        .route("/v1/reload", post(reload_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    println!("garmentsearch-retriever listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<ErrorBody>)> {
    validate_query(&request.query)?;
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err(too_many_requests("rate limit exceeded"));
        }
    }
    let top_k = effective_top_k(request.top_k, state.default_top_k, state.max_top_k);
    let start = Instant::now();

    // A failed embedding fails this query outright; no degraded ranking.
    let embedding = embed_query(&state, request.query.clone())
        .await
        .map_err(internal_error)?;

    // Readers keep whatever corpus snapshot was live when they arrived.
    let snapshot = state.corpus.read().await.clone();
    let corpus_size = snapshot.len();
    let results = rank_and_assemble(&state, snapshot, embedding, top_k)
        .await
        .map_err(internal_error)?;
    let response = QueryResponse {
        results,
        meta: ResponseMeta {
            top_k,
            corpus_size,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    };
    Ok(Json(response))
}

async fn reload_handler(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ErrorBody>)> {
    let fresh = load_corpus(&state.store, &state.corpus_prefix)
        .await
        .map_err(internal_error)?;
    let response = ReloadResponse {
        documents: fresh.len(),
        dimension: fresh.vectors().dim(),
    };
    swap_corpus(&state.corpus, fresh).await;
    eprintln!(
        "reloaded corpus: {} document(s), dimension {}.",
        response.documents, response.dimension
    );
    Ok(Json(response))
}

async fn load_corpus(store: &Arc<HttpObjectStore>, prefix: &Arc<String>) -> Result<Corpus> {
    let store = store.clone();
    let prefix = prefix.clone();
    tokio::task::spawn_blocking(move || {
        CorpusStore::new(store.as_ref(), prefix.as_str()).load_current()
    })
    .await
    .map_err(|err| anyhow!("corpus load task join error: {err}"))?
}

async fn embed_query(state: &AppState, query: String) -> Result<Vec<f32>> {
    if let Some(cache) = &state.embedding_cache {
        if let Some(hit) = {
            let mut guard = cache.lock().await;
            guard.get(&query).cloned()
        } {
            return Ok(hit);
        }
    }

    let embedder = state.embedder.clone();
    let query_clone = query.clone();
    let embedding = tokio::task::spawn_blocking(move || embedder.embed(&query_clone))
        .await
        .map_err(|err| anyhow!("embedding task join error: {err}"))??;

    if let Some(cache) = &state.embedding_cache {
        let mut guard = cache.lock().await;
        guard.put(query, embedding.clone());
    }
    Ok(embedding)
}

async fn rank_and_assemble(
    state: &AppState,
    snapshot: Arc<Corpus>,
    embedding: Vec<f32>,
    top_k: usize,
) -> Result<Vec<ResponseGarment>> {
    let store = state.store.clone();
    let signed_ttl = state.signed_ttl;
    let parallel = state.parallel_scan;
    let ranked: Vec<RankedGarment> = tokio::task::spawn_blocking(move || {
        let hits = ExactL2Index::new(snapshot.vectors())
            .with_parallel_scan(parallel)
            .search(&embedding, top_k)?;
        ResultAssembler::new(store.as_ref())
            .with_signed_ttl(signed_ttl)
            .assemble(&snapshot, &hits)
    })
    .await
    .map_err(|err| anyhow!("search task join error: {err}"))??;

    Ok(ranked
        .into_iter()
        .map(|garment| ResponseGarment {
            id: garment.id,
            distance: garment.distance,
            images: garment.images,
        })
        .collect())
}

fn validate_query(query: &str) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    if query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    Ok(())
}

fn effective_top_k(requested: Option<usize>, default_top_k: usize, max_top_k: usize) -> usize {
    requested.unwrap_or(default_top_k).clamp(1, max_top_k)
}

async fn swap_corpus(slot: &RwLock<Arc<Corpus>>, fresh: Corpus) {
    *slot.write().await = Arc::new(fresh);
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

fn too_many_requests(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn build_cache(size: usize) -> Option<Arc<Mutex<LruCache<String, Vec<f32>>>>> {
    NonZeroUsize::new(size).map(|capacity| Arc::new(Mutex::new(LruCache::new(capacity))))
}

#[derive(Clone)]
struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        let refill_per_sec = max_per_minute as f64 / 60.0;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec,
        })
    }

    async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garmentsearch::{GarmentDocument, VectorArray};
    use pretty_assertions::assert_eq;

    fn corpus_of(ids: &[&str]) -> Corpus {
        let documents = ids
            .iter()
            .map(|id| {
                GarmentDocument::new(
                    *id,
                    format!("This garment includes: Style: {id}."),
                    "garments/default_body/",
                )
            })
            .collect();
        let rows = ids
            .iter()
            .enumerate()
            .map(|(i, _)| vec![i as f32, 1.0])
            .collect();
        let vectors = VectorArray::from_rows(rows).expect("uniform rows");
        Corpus::new(documents, vectors).expect("aligned corpus")
    }

    #[test]
    fn blank_queries_are_rejected_with_bad_request() {
        let err = validate_query("   ").expect_err("whitespace query must fail");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        let err = validate_query("").expect_err("empty query must fail");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(validate_query("red silk dress").is_ok());
    }

    #[test]
    fn requested_top_k_clamps_to_configured_bounds() {
        assert_eq!(effective_top_k(None, 3, 12), 3);
        assert_eq!(effective_top_k(Some(5), 3, 12), 5);
        assert_eq!(effective_top_k(Some(0), 3, 12), 1);
        assert_eq!(effective_top_k(Some(50), 3, 12), 12);
    }

    #[tokio::test]
    async fn rate_limiter_denies_once_burst_is_spent() {
        let limiter = RateLimiter::new(60, 2).expect("limiter enabled");
        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[test]
    fn zeroed_rate_limits_disable_the_limiter() {
        assert!(RateLimiter::new(0, 4).is_none());
        assert!(RateLimiter::new(120, 0).is_none());
    }

    #[tokio::test]
    async fn reload_swaps_corpus_without_disturbing_held_snapshots() {
        let slot = RwLock::new(Arc::new(corpus_of(&["rand_a", "rand_b"])));
        let held = slot.read().await.clone();

        swap_corpus(&slot, corpus_of(&["rand_a", "rand_b", "rand_c"])).await;

        assert_eq!(held.len(), 2);
        assert_eq!(slot.read().await.len(), 3);
    }
}
