//! Per-query event protocol
//!
//! A query produces exactly one `Sources` event, zero or more
//! `ResponseChunk` events and then one terminal event (`End` or `Error`).
//! [`EventMultiplexer`] is the only producer and enforces that order:
//!
//! ```text
//! Init -> Rephrasing -> SearchSkipped ---------------> Generating -> Done
//!                    \-> Searching -> Reranking ----/
//! (any non-terminal state) -> Error
//! ```

use super::document::Document;
use crate::errors::{AppError, CLIENT_ERROR_MESSAGE};
use std::fmt;
use tokio::sync::mpsc;

/// Event delivered to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Reranked sources; position `i` is citation `[i + 1]`
    Sources(Vec<Document>),
    ResponseChunk(String),
    End,
    /// Client-safe failure text
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::End | StreamEvent::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Rephrasing,
    SearchSkipped,
    Searching,
    Reranking,
    Generating,
    Done,
    Error,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Error)
    }

    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Init, Rephrasing)
            | (Rephrasing, SearchSkipped)
            | (Rephrasing, Searching)
            | (Searching, Reranking)
            | (SearchSkipped, Generating)
            | (Reranking, Generating)
            | (Generating, Done) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::Rephrasing => "rephrasing",
            PipelineState::SearchSkipped => "search_skipped",
            PipelineState::Searching => "searching",
            PipelineState::Reranking => "reranking",
            PipelineState::Generating => "generating",
            PipelineState::Done => "done",
            PipelineState::Error => "error",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped before its terminal event
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// The consumer went away; emit nothing more
    Cancelled,
    Failed(AppError),
}

impl From<AppError> for Interrupt {
    fn from(err: AppError) -> Self {
        Interrupt::Failed(err)
    }
}

/// How a query finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Ended,
    Failed,
    Cancelled,
}

impl QueryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryOutcome::Ended => "end",
            QueryOutcome::Failed => "error",
            QueryOutcome::Cancelled => "cancelled",
        }
    }
}

/// Single producer of a query's events.
///
/// Terminal methods take `self`, so a second terminal event cannot be
/// written.
pub struct EventMultiplexer {
    tx: mpsc::Sender<StreamEvent>,
    state: PipelineState,
    sources_sent: bool,
}

impl EventMultiplexer {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            state: PipelineState::Init,
            sources_sent: false,
        }
    }

    /// Resolves once the consumer has dropped its receiver
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub(crate) fn advance(&mut self, next: PipelineState) -> Result<(), Interrupt> {
        if !self.state.can_transition_to(next) {
            return Err(Interrupt::Failed(AppError::Internal {
                message: format!("Invalid pipeline transition {} -> {}", self.state, next),
            }));
        }
        if next == PipelineState::Generating && !self.sources_sent {
            return Err(Interrupt::Failed(AppError::Internal {
                message: "Generation started before sources were emitted".to_string(),
            }));
        }
        tracing::debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        Ok(())
    }

    /// Emit the final source list. Only valid once, at the end of
    /// reranking or right after search was skipped.
    pub(crate) async fn sources(&mut self, documents: Vec<Document>) -> Result<(), Interrupt> {
        let finalizing = matches!(
            self.state,
            PipelineState::Reranking | PipelineState::SearchSkipped
        );
        if self.sources_sent || !finalizing {
            return Err(Interrupt::Failed(AppError::Internal {
                message: format!("Sources emitted out of order in state {}", self.state),
            }));
        }
        self.send(StreamEvent::Sources(documents)).await?;
        self.sources_sent = true;
        Ok(())
    }

    pub(crate) async fn chunk(&mut self, text: String) -> Result<(), Interrupt> {
        if self.state != PipelineState::Generating {
            return Err(Interrupt::Failed(AppError::Internal {
                message: format!("Response chunk emitted in state {}", self.state),
            }));
        }
        self.send(StreamEvent::ResponseChunk(text)).await
    }

    /// Finish normally. Falls back to an error event if generation
    /// never started.
    pub async fn end(mut self) -> QueryOutcome {
        if let Err(interrupt) = self.advance(PipelineState::Done) {
            return match interrupt {
                Interrupt::Failed(err) => self.fail(&err).await,
                Interrupt::Cancelled => QueryOutcome::Cancelled,
            };
        }
        match self.send(StreamEvent::End).await {
            Ok(()) => QueryOutcome::Ended,
            Err(_) => QueryOutcome::Cancelled,
        }
    }

    /// Finish with the generic client error. Detail stays in the logs.
    pub async fn fail(mut self, error: &AppError) -> QueryOutcome {
        tracing::error!(
            state = %self.state,
            error = %error,
            code = error.code().as_code(),
            "Query failed"
        );
        self.state = PipelineState::Error;
        match self
            .send(StreamEvent::Error(CLIENT_ERROR_MESSAGE.to_string()))
            .await
        {
            Ok(()) => QueryOutcome::Failed,
            Err(_) => QueryOutcome::Cancelled,
        }
    }

    async fn send(&self, event: StreamEvent) -> Result<(), Interrupt> {
        self.tx.send(event).await.map_err(|_| Interrupt::Cancelled)
    }
}
