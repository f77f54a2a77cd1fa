//! Language model capabilities
//!
//! Two narrow traits, so the pipeline can be driven by fakes in tests:
//! - [`TextCompleter`]: one prompt in, one string out (query rephrasing)
//! - [`ChatStreamer`]: system prompt + prior turns + user turn in, a live
//!   stream of text chunks out (answer generation)
//!
//! [`OpenAiClient`] implements both against any OpenAI-compatible
//! chat completions endpoint.

use crate::agent::history::{Message, Role};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stream of generated text chunks
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Single-shot text completion
#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Streaming chat completion
#[async_trait]
pub trait ChatStreamer: Send + Sync {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_turn: &str,
    ) -> Result<ChunkStream>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamResponse {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
}

#[derive(Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Marker the server sends after the last chunk
const STREAM_DONE: &str = "[DONE]";

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl OpenAiClient {
    /// Create a new client; the API key must already be validated
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required".to_string(),
            })?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(request);

        // A whole-request timeout would cut long streams short
        if !request.stream {
            builder = builder.timeout(Duration::from_secs(self.config.timeout_secs));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::UpstreamTimeout {
                    service: "llm".to_string(),
                    timeout_ms: self.config.timeout_secs * 1000,
                }
            } else {
                AppError::LlmError {
                    message: format!("LLM API request failed: {}", e),
                }
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl TextCompleter for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.rephrase_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: self.config.rephrase_temperature,
            stream: false,
        };

        let response = self.send(&request).await?;
        let chat_response: ChatResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl ChatStreamer for OpenAiClient {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_turn: &str,
    ) -> Result<ChunkStream> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: chat_messages(system_prompt, history, user_turn),
            temperature: self.config.chat_temperature,
            stream: true,
        };

        let response = self.send(&request).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| AppError::LlmError {
                    message: format!("Malformed event stream: {}", e),
                })?;
                match parse_stream_data(&event.data)? {
                    StreamData::Chunk(text) => {
                        yield text;
                    }
                    StreamData::Empty => {}
                    StreamData::Done => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Lay out the conversation as chat completion messages
fn chat_messages(system_prompt: &str, history: &[Message], user_turn: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage {
        role: "system",
        content: system_prompt.to_string(),
    });
    messages.extend(history.iter().map(|m| ChatMessage {
        role: match m.role {
            Role::Human => "user",
            Role::Assistant => "assistant",
        },
        content: m.content.clone(),
    }));
    messages.push(ChatMessage {
        role: "user",
        content: user_turn.to_string(),
    });
    messages
}

#[derive(Debug, PartialEq)]
enum StreamData {
    Chunk(String),
    Empty,
    Done,
}

/// Decode one server-sent event payload
fn parse_stream_data(data: &str) -> Result<StreamData> {
    let data = data.trim();
    if data == STREAM_DONE {
        return Ok(StreamData::Done);
    }
    if data.is_empty() {
        return Ok(StreamData::Empty);
    }

    let parsed: ChatStreamResponse = serde_json::from_str(data).map_err(|e| AppError::LlmError {
        message: format!("Failed to parse stream chunk: {}", e),
    })?;

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map(StreamData::Chunk)
        .unwrap_or(StreamData::Empty))
}
