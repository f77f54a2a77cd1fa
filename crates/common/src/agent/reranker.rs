//! Embedding-based reranker
//!
//! Reorders search documents by similarity to the query, drops the ones
//! at or below the relevance threshold and caps the list. The position of
//! a document in the output is its citation number.

use super::document::{Document, ScoredDocument};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::similarity::SimilarityMeasure;
use std::cmp::Ordering;
use std::sync::Arc;

/// Reranker tuning
#[derive(Debug, Clone, Copy)]
pub struct RerankOptions {
    pub measure: SimilarityMeasure,
    /// Kept documents score strictly above this
    pub threshold: f32,
    pub max_results: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            measure: SimilarityMeasure::Cosine,
            threshold: 0.5,
            max_results: 15,
        }
    }
}

pub struct Reranker {
    embedder: Arc<dyn Embedder>,
    options: RerankOptions,
}

impl Reranker {
    pub fn new(embedder: Arc<dyn Embedder>, options: RerankOptions) -> Self {
        Self { embedder, options }
    }

    /// Rerank and drop scores.
    pub async fn rerank(&self, query: &str, candidates: Vec<Document>) -> Result<Vec<Document>> {
        Ok(self
            .rerank_scored(query, candidates)
            .await?
            .into_iter()
            .map(|scored| scored.document)
            .collect())
    }

    /// Rerank, keeping each document's similarity.
    ///
    /// No embedding call is made when there is nothing to embed. Any
    /// embedding failure fails the whole step.
    pub async fn rerank_scored(
        &self,
        query: &str,
        candidates: Vec<Document>,
    ) -> Result<Vec<ScoredDocument>> {
        let candidate_count = candidates.len();
        let documents: Vec<Document> = candidates.into_iter().filter(Document::has_content).collect();
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let document_embeddings = self.embedder.embed_batch(&texts).await?;
        if document_embeddings.len() != documents.len() {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "Expected {} document embeddings, received {}",
                    documents.len(),
                    document_embeddings.len()
                ),
                retryable: false,
            });
        }
        let query_embedding = self.embedder.embed(query).await?;

        let scored: Vec<ScoredDocument> = documents
            .into_iter()
            .zip(document_embeddings.iter())
            .map(|(document, embedding)| ScoredDocument {
                similarity: self.options.measure.score(&query_embedding, embedding),
                document,
            })
            .collect();

        let kept = select(scored, self.options.threshold, self.options.max_results);

        metrics::record_rerank(candidate_count, kept.len());
        tracing::info!(
            candidates = candidate_count,
            kept = kept.len(),
            measure = %self.options.measure,
            "Documents reranked"
        );

        Ok(kept)
    }
}

/// Threshold, order by descending similarity, truncate.
///
/// `sort_by` is stable, so equal scores keep candidate order and citation
/// numbers are reproducible. NaN scores never pass the threshold.
fn select(mut scored: Vec<ScoredDocument>, threshold: f32, max_results: usize) -> Vec<ScoredDocument> {
    scored.retain(|s| s.similarity > threshold);
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(max_results);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchResult;
    use crate::test_support::{EmbedBehavior, TableEmbedder};
    use tokio_test::{assert_err, assert_ok};

    fn doc(content: &str) -> Document {
        Document::from(SearchResult {
            title: content.to_string(),
            url: format!("https://example.com/{}", content.len()),
            content: content.to_string(),
            image_url: None,
        })
    }

    fn reranker(embedder: Arc<TableEmbedder>) -> Reranker {
        Reranker::new(embedder, RerankOptions::default())
    }

    #[tokio::test]
    async fn test_empty_candidates_make_no_calls() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let out = assert_ok!(reranker(embedder.clone()).rerank("q", Vec::new()).await);
        assert!(out.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_empty_content_makes_no_calls() {
        let embedder = Arc::new(TableEmbedder::new(&[]));
        let out = assert_ok!(reranker(embedder.clone()).rerank("q", vec![doc(""), doc("  ")]).await);
        assert!(out.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_orders_and_thresholds() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("q", vec![1.0, 0.0]),
            ("weak", vec![0.4, 0.9165]),   // ~0.40
            ("strong", vec![1.0, 0.0]),    // 1.0
            ("medium", vec![0.8, 0.6]),    // 0.8
        ]));
        let out = reranker(embedder.clone())
            .rerank_scored("q", vec![doc("weak"), doc("strong"), doc("medium"), doc("")])
            .await
            .unwrap();

        let contents: Vec<_> = out.iter().map(|s| s.document.content.as_str()).collect();
        assert_eq!(contents, vec!["strong", "medium"]);
        assert!(out.iter().all(|s| s.similarity > 0.5));
        assert_eq!(embedder.batch_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(embedder.single_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caps_at_fifteen_of_twenty() {
        let names: Vec<String> = (0..20).map(|i| format!("doc {}", i)).collect();
        let mut entries: Vec<(&str, Vec<f32>)> = vec![("What is Docker", vec![1.0, 0.0])];
        for (i, name) in names.iter().enumerate() {
            // similarity decreases with i, all well above 0.5
            entries.push((name.as_str(), vec![1.0, i as f32 * 0.02]));
        }
        let embedder = Arc::new(TableEmbedder::new(&entries));
        let candidates = names.iter().map(|n| doc(n)).collect();

        let out = reranker(embedder).rerank_scored("What is Docker", candidates).await.unwrap();

        assert_eq!(out.len(), 15);
        assert!(out.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(out[0].document.content, "doc 0");
        assert_eq!(out[14].document.content, "doc 14");
    }

    #[tokio::test]
    async fn test_ties_keep_candidate_order() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("q", vec![1.0, 0.0]),
            ("b", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("c", vec![1.0, 0.0]),
        ]));
        let rr = reranker(embedder);
        for _ in 0..3 {
            let out = rr.rerank("q", vec![doc("b"), doc("a"), doc("c")]).await.unwrap();
            let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
            assert_eq!(contents, vec!["b", "a", "c"]);
        }
    }

    #[tokio::test]
    async fn test_dot_measure() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("q", vec![2.0, 0.0]),
            ("big", vec![3.0, 0.0]),   // 6.0
            ("small", vec![0.2, 0.0]), // 0.4
            ("half", vec![0.25, 0.0]), // exactly 0.5, not strictly above
        ]));
        let rr = Reranker::new(
            embedder,
            RerankOptions {
                measure: SimilarityMeasure::Dot,
                ..RerankOptions::default()
            },
        );
        let out = rr.rerank_scored("q", vec![doc("small"), doc("half"), doc("big")]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].similarity, 6.0);
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_step() {
        let embedder = Arc::new(TableEmbedder::new(&[]).with_behavior(EmbedBehavior::Fail));
        let err = assert_err!(reranker(embedder).rerank("q", vec![doc("x")]).await);
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn test_partial_embeddings_rejected() {
        let embedder = Arc::new(TableEmbedder::new(&[]).with_behavior(EmbedBehavior::DropOne));
        let err = assert_err!(reranker(embedder).rerank("q", vec![doc("x"), doc("y")]).await);
        assert!(matches!(err, AppError::EmbeddingError { .. }));
    }

    #[test]
    fn test_select_drops_nan() {
        let scored = vec![ScoredDocument {
            document: doc("x"),
            similarity: f32::NAN,
        }];
        assert!(select(scored, 0.5, 15).is_empty());
    }
}
