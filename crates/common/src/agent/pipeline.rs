//! Query-to-answer pipeline
//!
//! One run per user turn: rephrase, search (unless skipped), rerank,
//! stream the answer. Every provider call is bounded by a deadline and
//! raced against consumer disconnect, so a closed connection stops the
//! run at its next suspension point.

use super::answer::{out_of_range_citations, AnswerGenerator};
use super::document::Document;
use super::events::{EventMultiplexer, Interrupt, PipelineState, QueryOutcome, StreamEvent};
use super::history::{ConversationHistory, Message};
use super::rephraser::{QueryRephraser, RephrasedQuery};
use super::reranker::{RerankOptions, Reranker};
use crate::config::AppConfig;
use crate::embeddings::{create_embedder, Embedder};
use crate::errors::{AppError, Result};
use crate::llm::{ChatStreamer, OpenAiClient, TextCompleter};
use crate::metrics;
use crate::search::{SearchClient, SearchOptions, SearxngClient};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Provider capabilities, built once at startup and shared by every query
#[derive(Clone)]
pub struct Providers {
    pub completer: Arc<dyn TextCompleter>,
    pub streamer: Arc<dyn ChatStreamer>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn SearchClient>,
}

impl Providers {
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Result<Self> {
        let llm = Arc::new(OpenAiClient::new(client.clone(), config.llm.clone())?);
        let embedder = create_embedder(config, client.clone())?;
        let search = Arc::new(SearxngClient::new(client, &config.search));

        Ok(Self {
            completer: llm.clone(),
            streamer: llm,
            embedder,
            search,
        })
    }
}

/// Events of one running query.
///
/// Dropping this cancels the run.
pub struct QueryEvents {
    rx: mpsc::Receiver<StreamEvent>,
}

impl QueryEvents {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for QueryEvents {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Runs queries. Cheap to clone.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    rephraser: QueryRephraser,
    search: Arc<dyn SearchClient>,
    reranker: Reranker,
    generator: AnswerGenerator,
    search_language: String,
    upstream_timeout: Duration,
    stream_idle_timeout: Duration,
    event_buffer: usize,
}

impl PipelineOrchestrator {
    pub fn new(providers: &Providers, config: &AppConfig) -> Self {
        let pipeline = &config.pipeline;
        let options = RerankOptions {
            measure: pipeline.similarity_measure,
            threshold: pipeline.relevance_threshold,
            max_results: pipeline.max_sources,
        };

        Self {
            inner: Arc::new(Inner {
                rephraser: QueryRephraser::web_search(providers.completer.clone()),
                search: providers.search.clone(),
                reranker: Reranker::new(providers.embedder.clone(), options),
                generator: AnswerGenerator::new(providers.streamer.clone()),
                search_language: config.search.language.clone(),
                upstream_timeout: pipeline.upstream_timeout(),
                stream_idle_timeout: pipeline.stream_idle_timeout(),
                event_buffer: pipeline.event_buffer.max(1),
            }),
        }
    }

    /// Spawn a run and hand back its event source
    pub fn start(&self, query: String, history: ConversationHistory) -> QueryEvents {
        let (tx, rx) = mpsc::channel(self.inner.event_buffer);
        let this = self.clone();
        let span = tracing::info_span!(
            "query",
            query_len = query.len(),
            history = history.len()
        );

        tokio::spawn(
            async move {
                this.run(&query, &history, tx).await;
            }
            .instrument(span),
        );

        QueryEvents { rx }
    }

    /// Run one query to completion, writing its events into `tx`
    pub async fn run(
        &self,
        query: &str,
        history: &[Message],
        tx: mpsc::Sender<StreamEvent>,
    ) -> QueryOutcome {
        let started = Instant::now();
        let mut mux = EventMultiplexer::new(tx);

        let outcome = match self.inner.drive(query, history, &mut mux).await {
            Ok(()) => mux.end().await,
            Err(Interrupt::Failed(err)) => mux.fail(&err).await,
            Err(Interrupt::Cancelled) => QueryOutcome::Cancelled,
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_query(elapsed, outcome.as_str());
        tracing::info!(
            outcome = outcome.as_str(),
            duration_ms = (elapsed * 1000.0) as u64,
            "Query finished"
        );
        outcome
    }
}

impl Inner {
    async fn drive(
        &self,
        query: &str,
        history: &[Message],
        mux: &mut EventMultiplexer,
    ) -> std::result::Result<(), Interrupt> {
        mux.advance(PipelineState::Rephrasing)?;
        let stage = Instant::now();
        let rephrased = self
            .guard(mux, "llm", self.rephraser.rephrase(history, query))
            .await?;
        metrics::record_stage("rephrase", stage.elapsed().as_secs_f64());

        let sources = match rephrased {
            RephrasedQuery::NotNeeded => {
                mux.advance(PipelineState::SearchSkipped)?;
                Vec::new()
            }
            RephrasedQuery::Search(search_query) => {
                mux.advance(PipelineState::Searching)?;
                let stage = Instant::now();
                let options = SearchOptions::web(self.search_language.as_str());
                let results = self
                    .guard(mux, "search", self.search.search(&search_query, &options))
                    .await?;
                metrics::record_stage("search", stage.elapsed().as_secs_f64());
                tracing::info!(query = %search_query, results = results.len(), "Search completed");

                mux.advance(PipelineState::Reranking)?;
                let stage = Instant::now();
                let documents: Vec<Document> = results.into_iter().map(Document::from).collect();
                let kept = self
                    .guard(mux, "embedding", self.reranker.rerank(&search_query, documents))
                    .await?;
                metrics::record_stage("rerank", stage.elapsed().as_secs_f64());
                kept
            }
        };

        let source_count = sources.len();
        mux.sources(sources.clone()).await?;
        mux.advance(PipelineState::Generating)?;

        let stage = Instant::now();
        let mut chunks = self
            .guard(mux, "llm", self.generator.generate(query, history, &sources))
            .await?;
        let mut answer = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = mux.closed() => return Err(Interrupt::Cancelled),
                next = tokio::time::timeout(self.stream_idle_timeout, chunks.next()) => next,
            };
            match next {
                Ok(Some(Ok(chunk))) => {
                    answer.push_str(&chunk);
                    mux.chunk(chunk).await?;
                }
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(None) => break,
                Err(_) => return Err(timeout_error("llm", self.stream_idle_timeout).into()),
            }
        }
        metrics::record_stage("generate", stage.elapsed().as_secs_f64());

        audit_citations(&answer, source_count);
        Ok(())
    }

    /// Bound `fut` by the upstream deadline and abandon it if the
    /// consumer disconnects first.
    async fn guard<T>(
        &self,
        mux: &EventMultiplexer,
        service: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, Interrupt> {
        // Disconnect wins over a ready provider future
        tokio::select! {
            biased;
            _ = mux.closed() => Err(Interrupt::Cancelled),
            result = tokio::time::timeout(self.upstream_timeout, fut) => match result {
                Ok(value) => value.map_err(Interrupt::from),
                Err(_) => Err(timeout_error(service, self.upstream_timeout).into()),
            },
        }
    }
}

fn timeout_error(service: &str, limit: Duration) -> AppError {
    AppError::UpstreamTimeout {
        service: service.to_string(),
        timeout_ms: limit.as_millis() as u64,
    }
}

/// Citations are not rewritten; out-of-range ones are only reported.
fn audit_citations(answer: &str, source_count: usize) {
    let invalid = out_of_range_citations(answer, source_count);
    if !invalid.is_empty() {
        tracing::warn!(
            ?invalid,
            source_count,
            "Answer cites sources that were not provided"
        );
        metrics::record_out_of_range_citations(invalid.len());
    }
}
