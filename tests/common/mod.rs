//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use sitewise::error::Result;
use sitewise::graph::{GraphClient, Row, WriteSummary};
use sitewise::llm::{EmbeddingResponse, GenerationResponse, LlmClient, Message};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Deterministic stand-in for the LLM: embeddings from a character
/// histogram, canned generation, and a call counter
pub struct StubLlm {
    pub dimension: usize,
    pub answer: String,
    pub generate_calls: AtomicUsize,
}

impl StubLlm {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            answer: "根据参考资料，C30混凝土的强度等级标准值为30MPa。".to_string(),
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn generate(&self, _messages: &[Message]) -> Result<GenerationResponse> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationResponse {
            text: self.answer.clone(),
            tokens_used: Some(24),
            model: "stub".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        // Character histogram folded into the configured dimension,
        // L2-normalized: deterministic, and similar texts land close
        let mut embedding = vec![0.0f32; self.dimension];
        for ch in text.chars() {
            embedding[(ch as usize) % self.dimension] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        Ok(EmbeddingResponse {
            embedding,
            model: "stub-embed".to_string(),
        })
    }

    fn model(&self) -> &str {
        "stub"
    }
}

/// Graph client that records every write for assertion and answers
/// queries with nothing
#[derive(Default)]
pub struct RecordingGraphClient {
    pub writes: Mutex<Vec<String>>,
}

impl RecordingGraphClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_writes_containing(&self, needle: &str) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|cypher| cypher.contains(needle))
            .count()
    }
}

#[async_trait]
impl GraphClient for RecordingGraphClient {
    async fn execute_query(&self, _cypher: &str, _params: Value) -> Result<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn execute_write(&self, cypher: &str, _params: Value) -> Result<WriteSummary> {
        self.writes.lock().unwrap().push(cypher.to_string());
        Ok(WriteSummary {
            nodes_created: 1,
            ..Default::default()
        })
    }

    async fn verify_connectivity(&self) -> Result<()> {
        Ok(())
    }
}

/// Graph client simulating an unreachable store
pub struct DownGraphClient;

#[async_trait]
impl GraphClient for DownGraphClient {
    async fn execute_query(&self, _cypher: &str, _params: Value) -> Result<Vec<Row>> {
        Err(sitewise::error::GraphError::Unavailable("connection refused".to_string()).into())
    }

    async fn execute_write(&self, _cypher: &str, _params: Value) -> Result<WriteSummary> {
        Err(sitewise::error::GraphError::Unavailable("connection refused".to_string()).into())
    }

    async fn verify_connectivity(&self) -> Result<()> {
        Err(sitewise::error::GraphError::Unavailable("connection refused".to_string()).into())
    }
}
