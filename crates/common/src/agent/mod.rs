//! Conversational search agent
//!
//! The query-to-answer pipeline and the pieces it is built from.

pub mod answer;
pub mod document;
pub mod events;
pub mod history;
pub mod images;
pub mod pipeline;
pub mod prompts;
pub mod rephraser;
pub mod reranker;

pub use answer::AnswerGenerator;
pub use document::{Document, DocumentMetadata, ScoredDocument};
pub use events::{EventMultiplexer, PipelineState, QueryOutcome, StreamEvent};
pub use history::{format_history, ConversationHistory, Message, Role};
pub use images::{ImageResult, ImageSearch};
pub use pipeline::{PipelineOrchestrator, Providers, QueryEvents};
pub use rephraser::{QueryRephraser, RephrasedQuery};
pub use reranker::{RerankOptions, Reranker};
