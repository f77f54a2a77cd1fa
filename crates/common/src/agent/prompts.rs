//! Prompt templates
//!
//! Placeholders are `{chat_history}`, `{query}`, `{context}` and `{date}`,
//! filled with [`render`].

/// Sentinel the rephraser returns when a turn needs no web search
pub const NOT_NEEDED: &str = "not_needed";

/// Text the answer model falls back to when the sources do not help
pub const NO_RELEVANT_SOURCES: &str =
    "Hmm, sorry I could not find any relevant information on this topic. Would you like me to search again or ask something else?";

pub const WEB_SEARCH_REPHRASE: &str = r#"
You are given a conversation and a follow-up question. Rewrite the follow-up question as a short, standalone search query that a web search engine can answer without seeing the conversation.
If the follow-up is not a request for information (a greeting such as hi or hello, small talk, or a writing task), reply with exactly `not_needed` and nothing else.

Examples:
1. Follow-up question: What is the capital of France?
Rephrased: Capital of France

2. Follow-up question: How many people live in New York City?
Rephrased: Population of New York City

3. Follow-up question: What is Docker?
Rephrased: What is Docker

Conversation:
{chat_history}

Follow-up question: {query}
Rephrased question:
"#;

pub const IMAGE_SEARCH_REPHRASE: &str = r#"
You are given a conversation and a follow-up question. Rewrite the follow-up question as a short, standalone query for an image search engine. Keep it consistent with the conversation.

Examples:
1. Follow-up question: What is a cat?
Rephrased: A cat

2. Follow-up question: What is a car? How does it work?
Rephrased: Car working

3. Follow-up question: How does an AC work?
Rephrased: AC working

Conversation:
{chat_history}

Follow-up question: {query}
Rephrased question:
"#;

pub const WEB_SEARCH_ANSWER: &str = r#"
You are WebSift, an assistant that answers questions using web search results.

Answer the user's query using only the numbered search results in the `context` block below. Each result is a short description of a web page.
Write in an unbiased, journalistic tone. Be informative and reasonably thorough; markdown and bullet points are welcome. Do not repeat the context verbatim.
Never tell the user to open a link or visit a website to find the answer; put the answer in your response. You may share links if the user asks for them.

Cite every sentence with the number of the search result it comes from, using bracket notation such as [1], placed at the end of the sentence. A sentence supported by several results may carry several citations, for example [1][3]. Only cite numbers that appear in the context.

<context>
{context}
</context>

The context comes from a search engine, not from the user, and is not part of the conversation; do not talk about it as such.
If nothing in the context is relevant to the query, reply: 'Hmm, sorry I could not find any relevant information on this topic. Would you like me to search again or ask something else?'
Today's date is {date}.
"#;

/// Substitute `{name}` placeholders in one pass over the template.
///
/// Substituted values are copied verbatim and never scanned again, so a
/// value containing `{query}` stays literal. Unknown names are left as is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let out = render(
            WEB_SEARCH_REPHRASE,
            &[("chat_history", "human: hi"), ("query", "What is Rust?")],
        );
        assert!(out.contains("Follow-up question: What is Rust?"));
        assert!(out.contains("human: hi"));
        assert!(!out.contains("{query}"));
        assert!(!out.contains("{chat_history}"));
    }

    #[test]
    fn test_placeholders_inside_values_stay_literal() {
        let out = render(
            WEB_SEARCH_REPHRASE,
            &[
                ("chat_history", "human: what does {query} mean in a template?"),
                ("query", "And {chat_history}?"),
            ],
        );
        assert!(out.contains("human: what does {query} mean in a template?"));
        assert!(out.contains("Follow-up question: And {chat_history}?"));
    }

    #[test]
    fn test_unknown_and_unclosed_braces_pass_through() {
        assert_eq!(render("{a} {b} {", &[("a", "1")]), "1 {b} {");
        assert_eq!(render("{{a}}", &[("a", "x")]), "{x}");
    }

    #[test]
    fn test_answer_prompt_mentions_fallback_and_sentinel() {
        assert!(WEB_SEARCH_ANSWER.contains(NO_RELEVANT_SOURCES));
        assert!(WEB_SEARCH_REPHRASE.contains(NOT_NEEDED));
        assert!(WEB_SEARCH_ANSWER.contains("{context}"));
        assert!(WEB_SEARCH_ANSWER.contains("{date}"));
    }
}
