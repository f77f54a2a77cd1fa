//! Query rephraser - turns a follow-up into a standalone search query

use super::history::{format_history, Message};
use super::prompts::{self, NOT_NEEDED};
use crate::errors::Result;
use crate::llm::TextCompleter;
use std::sync::Arc;

/// Outcome of rephrasing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RephrasedQuery {
    /// Conversational turn; skip search entirely
    NotNeeded,
    /// Standalone query to send to the search engine
    Search(String),
}

/// Rephrases follow-up questions with a completion model
pub struct QueryRephraser {
    llm: Arc<dyn TextCompleter>,
    template: &'static str,
    allow_skip: bool,
}

impl QueryRephraser {
    /// Rephraser for the web search path, which may answer `not_needed`
    pub fn web_search(llm: Arc<dyn TextCompleter>) -> Self {
        Self {
            llm,
            template: prompts::WEB_SEARCH_REPHRASE,
            allow_skip: true,
        }
    }

    /// Rephraser for image search, which always searches
    pub fn image_search(llm: Arc<dyn TextCompleter>) -> Self {
        Self {
            llm,
            template: prompts::IMAGE_SEARCH_REPHRASE,
            allow_skip: false,
        }
    }

    /// Provider errors propagate unchanged; there is no retry here.
    pub async fn rephrase(&self, history: &[Message], query: &str) -> Result<RephrasedQuery> {
        let chat_history = format_history(history);
        let prompt = prompts::render(
            self.template,
            &[("chat_history", chat_history.as_str()), ("query", query)],
        );

        let output = self.llm.complete(&prompt).await?;
        let rephrased = interpret(&output, query, self.allow_skip);

        tracing::debug!(query, ?rephrased, "Query rephrased");
        Ok(rephrased)
    }
}

/// Map raw model output onto a decision.
///
/// The sentinel is matched after trimming whitespace, quotes and backticks,
/// ignoring case. Blank output falls back to the user's own query.
fn interpret(output: &str, query: &str, allow_skip: bool) -> RephrasedQuery {
    let cleaned = output
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'')
        .trim();

    if allow_skip && cleaned.eq_ignore_ascii_case(NOT_NEEDED) {
        return RephrasedQuery::NotNeeded;
    }
    if cleaned.is_empty() {
        return RephrasedQuery::Search(query.trim().to_string());
    }
    RephrasedQuery::Search(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::test_support::ScriptedCompleter;

    #[test]
    fn test_interpret_sentinel_variants() {
        for raw in ["not_needed", " `not_needed`\n", "\"NOT_NEEDED\""] {
            assert_eq!(interpret(raw, "hi", true), RephrasedQuery::NotNeeded);
        }
    }

    #[test]
    fn test_interpret_sentinel_disabled_for_images() {
        assert_eq!(
            interpret("not_needed", "hi", false),
            RephrasedQuery::Search("not_needed".to_string())
        );
    }

    #[test]
    fn test_interpret_blank_falls_back() {
        assert_eq!(
            interpret("  \n", " What is Docker? ", true),
            RephrasedQuery::Search("What is Docker?".to_string())
        );
    }

    #[tokio::test]
    async fn test_rephrase_prompt_contains_history_and_query() {
        let llm = Arc::new(ScriptedCompleter::replying("Docker maintainers"));
        let rephraser = QueryRephraser::web_search(llm.clone());
        let history = vec![
            Message::human("What is Docker?"),
            Message::assistant("A container platform [1]."),
        ];

        let result = rephraser.rephrase(&history, "Who maintains it?").await.unwrap();
        assert_eq!(result, RephrasedQuery::Search("Docker maintainers".to_string()));

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("human: What is Docker?"));
        assert!(prompts[0].contains("Follow-up question: Who maintains it?"));
    }

    #[tokio::test]
    async fn test_braces_in_history_reach_the_model_verbatim() {
        let llm = Arc::new(ScriptedCompleter::replying("Python format strings"));
        let rephraser = QueryRephraser::web_search(llm.clone());
        let history = vec![Message::human("What does {query} do in a format string?")];

        rephraser.rephrase(&history, "Show an example").await.unwrap();

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("human: What does {query} do in a format string?"));
        assert_eq!(prompt.matches("Show an example").count(), 1);
    }

    #[tokio::test]
    async fn test_rephrase_greeting() {
        let llm = Arc::new(ScriptedCompleter::replying("not_needed"));
        let rephraser = QueryRephraser::web_search(llm);
        let result = rephraser.rephrase(&[], "hi").await.unwrap();
        assert_eq!(result, RephrasedQuery::NotNeeded);
    }

    #[tokio::test]
    async fn test_rephrase_propagates_provider_error() {
        let llm = Arc::new(ScriptedCompleter::failing());
        let rephraser = QueryRephraser::web_search(llm.clone());
        let err = rephraser.rephrase(&[], "What is Docker?").await.unwrap_err();
        assert!(matches!(err, AppError::LlmError { .. }));
        assert_eq!(llm.prompts().len(), 1);
    }
}
