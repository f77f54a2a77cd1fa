//! WebSift Common Library
//!
//! Shared code for the WebSift service:
//! - Configuration management
//! - Error types and handling
//! - Metrics and observability
//! - Provider clients (chat model, embeddings, metasearch)
//! - The conversational search pipeline

pub mod agent;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod search;
pub mod similarity;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use agent::{PipelineOrchestrator, Providers, StreamEvent};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use similarity::SimilarityMeasure;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
