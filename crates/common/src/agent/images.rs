//! Image search
//!
//! Rephrases the follow-up for an image engine and returns image hits.
//! Unlike web search there is no "not needed" shortcut.

use super::history::Message;
use super::rephraser::{QueryRephraser, RephrasedQuery};
use crate::errors::{AppError, Result};
use crate::llm::TextCompleter;
use crate::metrics;
use crate::search::{SearchClient, SearchOptions, SearchResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One image hit as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub img_src: String,
    pub url: String,
    pub title: String,
}

impl ImageResult {
    /// Only hits with an image, a page URL and a title are usable
    fn from_search(result: SearchResult) -> Option<Self> {
        let img_src = result.image_url.filter(|s| !s.trim().is_empty())?;
        if result.url.trim().is_empty() || result.title.trim().is_empty() {
            return None;
        }
        Some(Self {
            img_src,
            url: result.url,
            title: result.title,
        })
    }
}

pub struct ImageSearch {
    rephraser: QueryRephraser,
    search: Arc<dyn SearchClient>,
    engines: Vec<String>,
    max_images: usize,
    upstream_timeout: Duration,
}

impl ImageSearch {
    pub fn new(
        llm: Arc<dyn TextCompleter>,
        search: Arc<dyn SearchClient>,
        engines: Vec<String>,
        max_images: usize,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            rephraser: QueryRephraser::image_search(llm),
            search,
            engines,
            max_images,
            upstream_timeout,
        }
    }

    pub async fn search(&self, history: &[Message], query: &str) -> Result<Vec<ImageResult>> {
        let started = Instant::now();

        let rephrased = self
            .with_timeout("llm", self.rephraser.rephrase(history, query))
            .await?;
        let search_query = match rephrased {
            RephrasedQuery::Search(q) => q,
            // image prompt never skips, but stay total
            RephrasedQuery::NotNeeded => query.trim().to_string(),
        };

        let options = SearchOptions::images(&self.engines);
        let results = self
            .with_timeout("search", self.search.search(&search_query, &options))
            .await?;
        let found = results.len();

        let images: Vec<ImageResult> = results
            .into_iter()
            .filter_map(ImageResult::from_search)
            .take(self.max_images)
            .collect();

        metrics::record_stage("image_search", started.elapsed().as_secs_f64());
        tracing::info!(
            query = %search_query,
            found,
            returned = images.len(),
            "Image search completed"
        );

        Ok(images)
    }

    async fn with_timeout<T>(
        &self,
        service: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.upstream_timeout, fut)
            .await
            .map_err(|_| AppError::UpstreamTimeout {
                service: service.to_string(),
                timeout_ms: self.upstream_timeout.as_millis() as u64,
            })?
    }
}
