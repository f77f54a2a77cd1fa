//! Image search handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::socket::message::into_history;
use crate::AppState;
use websift_common::{
    agent::ImageResult,
    errors::{AppError, Result},
};

/// Image search request
#[derive(Debug, Deserialize, Validate)]
pub struct ImageSearchRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// `[role, text]` pairs, oldest first
    #[serde(default)]
    pub chat_history: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct ImageSearchResponse {
    pub images: Vec<ImageResult>,
}

/// Search images for a follow-up question
pub async fn search_images(
    State(state): State<AppState>,
    Json(mut request): Json<ImageSearchRequest>,
) -> Result<Json<ImageSearchResponse>> {
    let start = Instant::now();

    request.query = request.query.trim().to_string();
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("query".to_string()),
    })?;

    let history = into_history(request.chat_history);
    let images = state.images.search(&history, &request.query).await?;

    tracing::info!(
        query = %request.query,
        images = images.len(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Image search request completed"
    );

    Ok(Json(ImageSearchResponse { images }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_request_defaults() {
        let request: ImageSearchRequest = serde_json::from_str(r#"{"query":"cats"}"#).unwrap();
        assert!(request.chat_history.is_empty());
        assert_ok!(request.validate());
    }

    #[test]
    fn test_empty_query_invalid() {
        let request: ImageSearchRequest =
            serde_json::from_str(r#"{"query":"","chat_history":[["human","hi"]]}"#).unwrap();
        assert_err!(request.validate());
    }
}
