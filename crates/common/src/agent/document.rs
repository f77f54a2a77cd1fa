//! Documents flowing from search into reranking and generation

use crate::search::SearchResult;
use serde::{Deserialize, Serialize};

/// Source metadata carried alongside document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub url: String,
    #[serde(rename = "img_src", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A search result normalized for the pipeline.
///
/// Serialized as `{"pageContent": ..., "metadata": {...}}`, the shape web
/// clients render in the sources panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "pageContent")]
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Empty documents are never embedded or cited
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

impl From<SearchResult> for Document {
    fn from(result: SearchResult) -> Self {
        Self {
            content: result.content,
            metadata: DocumentMetadata {
                title: result.title,
                url: result.url,
                image_url: result.image_url,
            },
        }
    }
}

/// A document with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub similarity: f32,
}
