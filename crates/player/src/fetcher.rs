// Resource fetching: HTTP client plus an in-memory fetcher for offline playback.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::PlayerError;

/// A downloaded binary resource.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub data: Bytes,
    /// Time from the response becoming available to the last byte.
    pub latency: Duration,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, PlayerError>;

    async fn fetch_binary(&self, url: &str) -> Result<FetchedPayload, PlayerError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, PlayerError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                PlayerError::configuration(format!("invalid header name `{name}`: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                PlayerError::configuration(format!("invalid value for header `{name}`: {e}"))
            })?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .default_headers(headers);
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }

        let client = builder
            .build()
            .map_err(|e| PlayerError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, PlayerError> {
        let parsed = Url::parse(url).map_err(|e| PlayerError::invalid_url(url, e))?;
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| PlayerError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlayerError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, PlayerError> {
        debug!(url, "Fetching text resource");
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| PlayerError::network(url, e))
    }

    async fn fetch_binary(&self, url: &str) -> Result<FetchedPayload, PlayerError> {
        let response = self.get(url).await?;
        let started = Instant::now();
        let data = response
            .bytes()
            .await
            .map_err(|e| PlayerError::network(url, e))?;
        let latency = started.elapsed();

        debug!(url, bytes = data.len(), latency_ms = latency.as_millis() as u64, "Fetched binary resource");
        Ok(FetchedPayload { data, latency })
    }
}

/// Serves resources from memory, keyed by absolute URL.
///
/// Unknown URLs answer with HTTP 404. Every request is counted.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    resources: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<HashMap<String, usize>>,
    latency: Duration,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated transfer time applied to every binary fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_resource(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.resources.lock().insert(url.into(), body.into());
    }

    /// Make requests for `url` fail with a network error.
    pub fn fail(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().get(url).copied().unwrap_or(0)
    }

    fn lookup(&self, url: &str) -> Result<Bytes, PlayerError> {
        *self.requests.lock().entry(url.to_string()).or_default() += 1;

        if self.failing.lock().contains(url) {
            return Err(PlayerError::network(url, "simulated failure"));
        }
        self.resources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| PlayerError::HttpStatus {
                status: StatusCode::NOT_FOUND,
                url: url.to_string(),
            })
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, PlayerError> {
        let body = self.lookup(url)?;
        trace!(url, bytes = body.len(), "Serving static text resource");
        String::from_utf8(body.to_vec()).map_err(|e| PlayerError::network(url, e))
    }

    async fn fetch_binary(&self, url: &str) -> Result<FetchedPayload, PlayerError> {
        let data = self.lookup(url)?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        trace!(url, bytes = data.len(), "Serving static binary resource");
        Ok(FetchedPayload {
            data,
            latency: self.latency,
        })
    }
}
