use std::time::Duration;

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const EMBEDDING_DIMENSIONS: usize = 1536;

// The embeddings endpoint rejects inputs above ~8k tokens.
const MAX_INPUT_CHARS: usize = 24_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct Embedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl Embedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> StoreResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        let input = truncate_chars(text, MAX_INPUT_CHARS);
        debug!(model = %self.model, bytes = input.len(), "requesting embedding");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::EmbeddingStatus { status, body });
        }

        let body = response.text().await?;
        parse_embedding(&body)
    }
}

pub(crate) fn parse_embedding(body: &str) -> StoreResult<Vec<f32>> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|err| StoreError::Embedding(err.to_string()))?;

    let embedding = parsed
        .data
        .into_iter()
        .next()
        .map(|data| data.embedding)
        .ok_or_else(|| StoreError::Embedding("response contained no embeddings".into()))?;

    if embedding.len() != EMBEDDING_DIMENSIONS {
        return Err(StoreError::Embedding(format!(
            "expected {EMBEDDING_DIMENSIONS} dimensions, got {}",
            embedding.len()
        )));
    }

    Ok(embedding)
}

pub(crate) fn embedding_input(title: &str, content: &str) -> String {
    format!("{title}\n\n{content}")
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(dimensions: usize) -> String {
        let values: Vec<String> = (0..dimensions).map(|_| "0.25".to_string()).collect();
        format!(
            r#"{{"object":"list","data":[{{"object":"embedding","index":0,"embedding":[{}]}}],"model":"text-embedding-3-small"}}"#,
            values.join(",")
        )
    }

    #[test]
    fn parses_embedding_of_expected_size() {
        let embedding = parse_embedding(&response_with(EMBEDDING_DIMENSIONS)).expect("parse");
        assert_eq!(embedding.len(), EMBEDDING_DIMENSIONS);
        assert_eq!(embedding[0], 0.25);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let err = parse_embedding(&response_with(3)).expect_err("should fail");
        assert!(err.to_string().contains("expected 1536 dimensions, got 3"));
    }

    #[test]
    fn rejects_empty_data() {
        let err = parse_embedding(r#"{"data":[]}"#).expect_err("should fail");
        assert!(err.to_string().contains("no embeddings"));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn input_joins_title_and_content() {
        assert_eq!(
            embedding_input("API Gateway Design", "Technical Documentation"),
            "API Gateway Design\n\nTechnical Documentation"
        );
    }
}
