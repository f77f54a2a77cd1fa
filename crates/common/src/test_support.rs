//! In-process fakes for the provider traits and their HTTP endpoints

use crate::agent::history::Message;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::llm::{ChatStreamer, ChunkStream, TextCompleter};
use crate::search::{SearchClient, SearchOptions, SearchResult};
use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum::routing::any;
use axum::Router;
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Completion model with a fixed reply
pub struct ScriptedCompleter {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompleter {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextCompleter for ScriptedCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or_else(|| AppError::LlmError {
            message: "completion failed".to_string(),
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum EmbedBehavior {
    Normal,
    Fail,
    Hang,
    DropOne,
}

/// Embedder returning fixed vectors per text
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    behavior: EmbedBehavior,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            fallback: vec![0.0, 0.0, 1.0],
            behavior: EmbedBehavior::Normal,
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: EmbedBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst) + self.single_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        self.table.get(text).cloned().unwrap_or_else(|| self.fallback.clone())
    }

    async fn misbehave(&self) -> Result<()> {
        match self.behavior {
            EmbedBehavior::Fail => Err(AppError::EmbeddingError {
                message: "embedding failed".to_string(),
                retryable: false,
            }),
            EmbedBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.misbehave().await?;
        Ok(self.lookup(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.misbehave().await?;
        let mut vectors: Vec<_> = texts.iter().map(|t| self.lookup(t)).collect();
        if self.behavior == EmbedBehavior::DropOne {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Search engine returning canned results
pub struct CannedSearch {
    results: Vec<SearchResult>,
    fail: bool,
    calls: Mutex<Vec<(String, SearchOptions)>>,
}

impl CannedSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<(String, SearchOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchClient for CannedSearch {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), options.clone()));
        if self.fail {
            return Err(AppError::SearchError {
                message: "search failed".to_string(),
                retryable: false,
            });
        }
        Ok(self.results.clone())
    }
}

/// Recorded arguments of one `stream_chat` call
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_turn: String,
}

/// Chat model streaming fixed chunks, optionally failing after them
pub struct ScriptedStreamer {
    chunks: Vec<String>,
    fail_after: bool,
    calls: Mutex<Vec<ChatCall>>,
}

impl ScriptedStreamer {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_after: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_after(chunks: &[&str]) -> Self {
        Self {
            fail_after: true,
            ..Self::new(chunks)
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStreamer for ScriptedStreamer {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_turn: &str,
    ) -> Result<ChunkStream> {
        self.calls.lock().unwrap().push(ChatCall {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            user_turn: user_turn.to_string(),
        });

        let mut items: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        if self.fail_after {
            items.push(Err(AppError::LlmError {
                message: "stream broke".to_string(),
            }));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

pub fn result(title: &str, content: &str) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
        content: content.to_string(),
        image_url: None,
    }
}

/// Local HTTP endpoint answering with scripted statuses.
///
/// Request `n` gets `statuses[n]`; the last status repeats once the
/// script runs out.
pub struct ScriptedEndpoint {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl ScriptedEndpoint {
    pub async fn start(path: &str, statuses: &[u16], body: &str) -> Self {
        Self::start_with(path, statuses, body, "application/json").await
    }

    pub async fn start_with(path: &str, statuses: &[u16], body: &str, content_type: &'static str) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let statuses = statuses.to_vec();
        let body = body.to_string();

        let handler = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = StatusCode::from_u16(statuses[n.min(statuses.len() - 1)]).unwrap();
            let body = body.clone();
            async move { (status, [(header::CONTENT_TYPE, content_type)], body) }
        };
        let router = Router::new().route(path, any(handler));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
