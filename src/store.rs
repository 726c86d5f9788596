//! Object storage collaborators: the trait the pipelines talk to, a
//! blocking HTTP implementation, and an in-memory store for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// Synchronous key/value blob store shared by both pipelines.
///
/// Transport details stay behind this trait; the retrieval core only needs
/// whole-object reads and writes, prefix listing, and the two URL forms
/// the result assembler hands out.
pub trait ObjectStore: Send + Sync {
    /// Fetches an object's full contents.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Writes an object's full contents, replacing any prior value.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Lists object keys under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Permanent, publicly resolvable URL for an object.
    fn public_url(&self, key: &str) -> String;

    /// Time-limited, authenticated download URL with an attachment
    /// disposition, issued by the storage collaborator.
    fn signed_download_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Blocking HTTP object store for a GCS-style JSON API, with bounded
/// retries on transient failures.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    api_base: String,
    public_base: String,
    signer_endpoint: Option<String>,
    bucket: String,
    max_retries: usize,
}

impl HttpObjectStore {
    /// Builds a store client for one bucket.
    ///
    /// `signer_endpoint` points at the collaborator that issues signed
    /// download URLs; requesting one without it configured is an error.
    pub fn new(
        api_base: String,
        public_base: String,
        bucket: String,
        auth_token: Option<String>,
        signer_endpoint: Option<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(!bucket.trim().is_empty(), "missing bucket name");
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = auth_token.filter(|t| !t.trim().is_empty()) {
            let bearer = format!("Bearer {}", token.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).context("invalid storage auth token")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build storage HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
            signer_endpoint,
            bucket,
            max_retries: max_retries.max(1),
        })
    }

    fn object_url(&self, key: &str, alt_media: bool) -> String {
        let mut url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            self.bucket,
            encode_key(key)
        );
        if alt_media {
            url.push_str("?alt=media");
        }
        url
    }

    fn execute_with_retry<F>(&self, describe: &str, send: F) -> Result<reqwest::blocking::Response>
    where
        F: Fn() -> reqwest::Result<reqwest::blocking::Response>,
    {
        let mut attempt = 0usize;
        loop {
            match send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("{describe} failed ({status}): {body}");
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

impl ObjectStore for HttpObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(key, true);
        let resp = self.execute_with_retry(&format!("GET {key}"), || self.client.get(&url).send())?;
        let bytes = resp
            .bytes()
            .with_context(|| format!("failed to read body of {key}"))?;
        Ok(bytes.to_vec())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_base,
            self.bucket,
            encode_key(key)
        );
        self.execute_with_retry(&format!("PUT {key}"), || {
            self.client.post(&url).body(bytes.to_vec()).send()
        })?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = Url::parse(&format!(
                "{}/storage/v1/b/{}/o",
                self.api_base, self.bucket
            ))
            .context("invalid storage API base URL")?;
            url.query_pairs_mut()
                .append_pair("prefix", prefix)
                .append_pair("fields", "items(name),nextPageToken");
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let resp = self.execute_with_retry(&format!("LIST {prefix}"), || {
                self.client.get(url.as_str()).send()
            })?;
            let page: ListResponse = resp
                .json()
                .context("failed to parse storage list response")?;
            keys.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket, key)
    }

    fn signed_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let endpoint = self
            .signer_endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("no signer endpoint configured for signed downloads"))?;
        let request = SignRequest {
            bucket: &self.bucket,
            key,
            expires_in_secs: ttl.as_secs(),
            disposition: "attachment",
        };
        let resp = self.execute_with_retry(&format!("SIGN {key}"), || {
            self.client.post(endpoint).json(&request).send()
        })?;
        let signed: SignResponse = resp.json().context("failed to parse signer response")?;
        Ok(signed.url)
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    bucket: &'a str,
    key: &'a str,
    expires_in_secs: u64,
    disposition: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    url: String,
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

/// Everything outside the URL-unreserved set, `/` included, so an object
/// key always lands in a single path segment.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_SEGMENT).to_string()
}

/// In-memory object store used by tests and local experiments.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("store lock poisoned").len()
    }

    /// True when no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no such object: {key}"))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .expect("store lock poisoned")
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://public/{key}")
    }

    fn signed_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!(
            "memory://signed/{key}?expires_in={}&disposition=attachment",
            ttl.as_secs()
        ))
    }
}
