//! Cross-encoder reranking behind a remote scoring service

use crate::error::{Result, RetrievalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Trait for cross-encoder rerankers
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each (query, text) pair; one score per input text
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// HTTP reranker calling a cross-encoder scoring endpoint
pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

impl HttpReranker {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Reranking {} candidates", texts.len());

        let request = RerankRequest {
            query,
            documents: texts,
        };
        let response: RerankResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;

        if response.scores.len() != texts.len() {
            return Err(RetrievalError::SearchFailed(format!(
                "Reranker returned {} scores for {} documents",
                response.scores.len(),
                texts.len()
            ))
            .into());
        }

        Ok(response.scores)
    }
}
