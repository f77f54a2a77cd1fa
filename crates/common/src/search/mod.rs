//! Metasearch client
//!
//! Results from the search engine are untrusted. They are validated once,
//! here, when the JSON response is decoded: records without a URL are
//! dropped and missing text fields become empty strings. Everything past
//! this module works with [`SearchResult`] only.

use crate::config::SearchConfig;
use crate::errors::{is_retryable_status, AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// One validated search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub image_url: Option<String>,
}

/// Per-call search options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub categories: Vec<String>,
    pub engines: Vec<String>,
    pub language: Option<String>,
}

impl SearchOptions {
    /// General web search, constrained to one language
    pub fn web(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    /// Image-only search over the given engines
    pub fn images(engines: &[String]) -> Self {
        Self {
            categories: vec!["images".to_string()],
            engines: engines.to_vec(),
            language: None,
        }
    }

    fn query_params(&self, query: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", query.to_string()), ("format", "json".to_string())];
        if !self.categories.is_empty() {
            params.push(("categories", self.categories.join(",")));
        }
        if !self.engines.is_empty() {
            params.push(("engines", self.engines.join(",")));
        }
        if let Some(language) = &self.language {
            params.push(("language", language.clone()));
        }
        params
    }
}

/// Search capability consumed by the pipeline
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>>;
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    title: Option<String>,
    url: Option<String>,
    content: Option<String>,
    img_src: Option<String>,
}

impl RawResult {
    fn validate(self) -> Option<SearchResult> {
        let url = self.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())?;
        Some(SearchResult {
            title: self.title.unwrap_or_default().trim().to_string(),
            url,
            content: self.content.unwrap_or_default(),
            image_url: self
                .img_src
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

/// Decode a SearxNG JSON body into validated results, preserving order
fn parse_results(body: &str) -> Result<Vec<SearchResult>> {
    let raw: RawResponse = serde_json::from_str(body).map_err(|e| AppError::SearchError {
        message: format!("Failed to parse search response: {}", e),
        retryable: false,
    })?;
    Ok(raw.results.into_iter().filter_map(RawResult::validate).collect())
}

/// SearxNG JSON API client
pub struct SearxngClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl SearxngClient {
    pub fn new(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            base_url: config.searxng_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }

    async fn request(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&options.query_params(query))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout {
                        service: "search".to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    AppError::SearchError {
                        message: format!("Request failed: {}", e),
                        retryable: e.is_connect() || e.is_request(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::SearchError {
                message: format!("Search API error {}: {}", status, body),
                retryable: is_retryable_status(status),
            });
        }

        parse_results(&body)
    }
}

#[async_trait]
impl SearchClient for SearxngClient {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let attempts = AtomicU32::new(0);
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(self.timeout * (self.max_retries + 1)),
            ..ExponentialBackoff::default()
        };

        let results = retry(policy, || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.request(query, options).await {
                Ok(results) => Ok(results),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    tracing::warn!(attempt, error = %e, "Search request failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        tracing::debug!(query, results = results.len(), "Search completed");
        Ok(results)
    }
}
