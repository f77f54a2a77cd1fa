//! Answer generation
//!
//! Builds the numbered context block from reranked sources and streams a
//! cited answer from the chat model. Citation numbers are 1-based
//! positions in the source list.

use super::document::Document;
use super::history::Message;
use super::prompts;
use crate::errors::Result;
use crate::llm::{ChatStreamer, ChunkStream};
use chrono::Utc;
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

pub struct AnswerGenerator {
    llm: Arc<dyn ChatStreamer>,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn ChatStreamer>) -> Self {
        Self { llm }
    }

    /// Start streaming an answer.
    ///
    /// The stream ends when the model finishes. An `Err` item aborts the
    /// answer; nothing is retried.
    pub async fn generate(
        &self,
        query: &str,
        history: &[Message],
        sources: &[Document],
    ) -> Result<ChunkStream> {
        let context = build_context(sources);
        let system_prompt = system_prompt(&context);

        tracing::debug!(
            sources = sources.len(),
            history = history.len(),
            "Starting answer generation"
        );

        self.llm.stream_chat(&system_prompt, history, query).await
    }
}

/// `"{i}. {content}"` per source, one per line
pub fn build_context(sources: &[Document]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("{}. {}", i + 1, doc.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Answer instructions stamped with today's date
pub fn system_prompt(context: &str) -> String {
    let date = Utc::now().format("%A, %B %-d, %Y").to_string();
    prompts::render(
        prompts::WEB_SEARCH_ANSWER,
        &[("context", context), ("date", date.as_str())],
    )
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is valid"))
}

/// Distinct citation numbers in `text`, ascending
pub fn citation_indices(text: &str) -> Vec<usize> {
    citation_pattern()
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| m.as_str().parse::<usize>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Citation numbers that do not point at a source
pub fn out_of_range_citations(text: &str, source_count: usize) -> Vec<usize> {
    citation_indices(text)
        .into_iter()
        .filter(|&i| i == 0 || i > source_count)
        .collect()
}
