//! Configuration management for WebSift services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Loading is the only place configuration is checked. A bad similarity
//! measure or a missing provider key fails here, before the server binds.

use crate::errors::AppError;
use crate::similarity::SimilarityMeasure;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat and completion model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Metasearch (SearxNG) configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Retrieval pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Outbound frames buffered per WebSocket connection
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// How long a frame may wait for queue space before the client is dropped
    #[serde(default = "default_slow_consumer_timeout")]
    pub slow_consumer_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API key for the chat completions endpoint
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// Model used for answer generation
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Sampling temperature for answer generation
    #[serde(default = "default_chat_temperature")]
    pub chat_temperature: f32,

    /// Model used for query rephrasing
    #[serde(default = "default_chat_model")]
    pub rephrase_model: String,

    /// Sampling temperature for query rephrasing
    #[serde(default)]
    pub rephrase_temperature: f32,

    /// Connect/request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// SearxNG base URL
    #[serde(default = "default_searxng_url")]
    pub searxng_url: String,

    /// Language for web search
    #[serde(default = "default_language")]
    pub language: String,

    /// Engines queried by image search, in order
    #[serde(default = "default_image_engines")]
    pub image_engines: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_search_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Similarity measure for reranking: cosine or dot
    #[serde(default)]
    pub similarity_measure: SimilarityMeasure,

    /// Documents must score strictly above this to be kept
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,

    /// Maximum documents passed to the answer generator
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Maximum images returned by image search
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Deadline for each upstream call, in seconds
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Maximum wait between two generated chunks, in seconds
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Events buffered between a pipeline and its consumer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3001 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_outbound_queue_capacity() -> usize { 256 }
fn default_slow_consumer_timeout() -> u64 { 5_000 }
fn default_llm_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_chat_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_chat_temperature() -> f32 { 0.7 }
fn default_llm_timeout() -> u64 { 60 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-large".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 100 }
fn default_searxng_url() -> String { "http://localhost:8080".to_string() }
fn default_language() -> String { "en".to_string() }
fn default_image_engines() -> Vec<String> {
    ["google", "bing", "duckduckgo", "startpage", "yahoo", "yandex"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_search_timeout() -> u64 { 15 }
fn default_search_retries() -> u32 { 2 }
fn default_relevance_threshold() -> f32 { 0.5 }
fn default_max_sources() -> usize { 15 }
fn default_max_images() -> usize { 10 }
fn default_upstream_timeout() -> u64 { 30 }
fn default_stream_idle_timeout() -> u64 { 30 }
fn default_event_buffer() -> usize { 64 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "websift".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__SIMILARITY_MEASURE=dot
            .add_source(env_source())
            .build()?;

        config.try_deserialize()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |message: String| Err(AppError::Configuration { message });

        if self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return fail("llm.api_key is required".to_string());
        }

        match self.embedding.provider.as_str() {
            "openai" => {
                let key = self
                    .embedding
                    .api_key
                    .as_deref()
                    .or(self.llm.api_key.as_deref());
                if key.map_or(true, str::is_empty) {
                    return fail("embedding.api_key is required for the openai provider".to_string());
                }
            }
            "mock" => {}
            other => return fail(format!("Unknown embedding provider: {}", other)),
        }

        if self.embedding.batch_size == 0 {
            return fail("embedding.batch_size must be at least 1".to_string());
        }
        if self.pipeline.max_sources == 0 {
            return fail("pipeline.max_sources must be at least 1".to_string());
        }
        if !self.pipeline.relevance_threshold.is_finite() {
            return fail("pipeline.relevance_threshold must be finite".to_string());
        }
        if self.pipeline.event_buffer == 0 || self.server.outbound_queue_capacity == 0 {
            return fail("queue capacities must be at least 1".to_string());
        }
        if self.pipeline.upstream_timeout_secs == 0
            || self.pipeline.stream_idle_timeout_secs == 0
            || self.server.slow_consumer_timeout_ms == 0
        {
            return fail("timeouts must be greater than zero".to_string());
        }
        if self.search.searxng_url.is_empty() {
            return fail("search.searxng_url is required".to_string());
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Key used for embeddings, falling back to the LLM key
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
    }
}

impl PipelineConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("APP")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("search.image_engines")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            slow_consumer_timeout_ms: default_slow_consumer_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_llm_base(),
            chat_model: default_chat_model(),
            chat_temperature: default_chat_temperature(),
            rephrase_model: default_chat_model(),
            rephrase_temperature: 0.0,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            searxng_url: default_searxng_url(),
            language: default_language(),
            image_engines: default_image_engines(),
            timeout_secs: default_search_timeout(),
            max_retries: default_search_retries(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_measure: SimilarityMeasure::default(),
            relevance_threshold: default_relevance_threshold(),
            max_sources: default_max_sources(),
            max_images: default_max_images(),
            upstream_timeout_secs: default_upstream_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}
