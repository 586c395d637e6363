use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::traits::TextEmbedder;

const VOYAGE_API_URL: &str = "https://api.voyageai.com/v1";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Voyage AI embeddings over the OpenAI-compatible `/embeddings` endpoint.
pub struct VoyageEmbedder {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl VoyageEmbedder {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            http: reqwest::Client::new(),
            base_url: VOYAGE_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(model = %self.model, count = texts.len(), "Embedding request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("Embedding API error ({}): {}", status, error_text));
        }

        let body: EmbeddingResponse = response.json().await?;
        into_vectors(body, texts.len())
    }
}

/// Vectors in input order. The API may return entries out of order, so
/// they are sorted by their `index`.
fn into_vectors(mut body: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if body.data.len() != expected {
        return Err(anyhow!(
            "Embedding API returned {} vectors for {} inputs",
            body.data.len(),
            expected
        ));
    }
    body.data.sort_by_key(|d| d.index);
    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl TextEmbedder for VoyageEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(&texts).await
    }
}

/// Embedder for offline runs: returns empty vectors, which callers treat
/// as unresolved.
pub struct NoOpEmbedder;

#[async_trait]
impl TextEmbedder for NoOpEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![])
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(vec![Vec::new(); texts.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> EmbeddingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn response_is_reordered_by_index() {
        let json = r#"{"data":[
            {"index":2,"embedding":[3.0]},
            {"index":0,"embedding":[1.0]},
            {"index":1,"embedding":[2.0]}
        ]}"#;
        let vectors = into_vectors(body(json), 3).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn short_response_is_an_error() {
        let json = r#"{"data":[{"index":0,"embedding":[1.0]}]}"#;
        let err = into_vectors(body(json), 2).unwrap_err();
        assert!(err.to_string().contains("1 vectors for 2 inputs"), "{err}");
    }

    #[test]
    fn request_serializes_input_array() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let json = serde_json::to_value(EmbeddingRequest {
            model: "voyage-3-large",
            input: &texts,
        })
        .unwrap();
        assert_eq!(json["input"][1], "b");
        assert_eq!(json["model"], "voyage-3-large");
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let embedder = VoyageEmbedder::new("key", "voyage-3-large").with_base_url("http://127.0.0.1:9");
        assert!(embedder.embed_batch(Vec::new()).await.unwrap().is_empty());
    }
}
