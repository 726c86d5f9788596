//! OpenAI-compatible embedding client used as the production `Embedder`.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::Embedder;

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
///
/// Oversized batches are split internally, so ingestion can hand the whole
/// description list to `embed_batch` and let the client pace requests.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid embedding API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }

    /// Configured per-request batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_chunk(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse =
                            resp.json().context("failed to parse embedding response")?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        anyhow::ensure!(
                            parsed.data.len() == inputs.len(),
                            "embedding endpoint returned {} vectors for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        );
                        let vectors: Vec<Vec<f32>> = parsed
                            .data
                            .into_iter()
                            .map(|entry| entry.embedding)
                            .collect();
                        if let Some(dim) = self.dimensions {
                            for vector in &vectors {
                                anyhow::ensure!(
                                    vector.len() == dim,
                                    "embedding endpoint returned dimension {} (expected {dim})",
                                    vector.len()
                                );
                            }
                        }
                        return Ok(vectors);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("embedding request failed ({status}): {body}");
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_chunk(chunk)?);
        }
        Ok(vectors)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() || err.is_decode()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
