//! Sitewise
//!
//! An enterprise retrieval-augmented QA and analytics engine for
//! construction-project management:
//! - three-way hybrid retrieval (BM25 + dense vectors + knowledge
//!   graph) with fusion, cross-encoder rerank and graph-context
//!   injection;
//! - a drawing knowledge pipeline that parses construction drawings
//!   into entity/relation graphs;
//! - analytics agents (progress / cost / safety / risk / weekly
//!   report) orchestrating deterministic tool facades over relational
//!   project data, with workflow logging and cached answers.
//!
//! # Example
//!
//! ```rust,no_run
//! use sitewise::{AskOptions, Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default()).await?;
//!
//!     let answer = engine
//!         .ask("C30混凝土的强度等级标准值是多少？", &AskOptions::default())
//!         .await?;
//!
//!     println!("{}", answer.answer);
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod drawing;
pub mod engine;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod rag;
pub mod retrieval;
pub mod store;
pub mod tools;
pub mod workflow_log;

// Re-export main types
pub use agents::{
    AgentContext, CostAnalysisAgent, CostReport, ProgressAnalysisAgent, ProgressReport,
    QuickScan, ReportFormat, RiskAnalysisAgent, RiskAnalysisResult, RiskItem, RiskLevel,
    SafetyAnalysisAgent, SafetyReport, WeeklyReport, WeeklyReportAgent, WeeklyReportOutput,
};
pub use analyzer::{KeywordMethod, TextAnalyzer, TokenizeMode};
pub use cache::{CacheStore, CachedAnswer, HotQuery, SqliteCacheStore};
pub use config::{EngineConfig, LlmConfig, RetrievalConfig, VectorConfig, VectorMetric};
pub use drawing::{
    DrawingProcessingRecord, DrawingProcessor, EntityExtractor, ParsedDrawing, ProcessingStatus,
};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use graph::{GraphClient, GraphRepository, HttpGraphClient, WriteSummary};
pub use ingest::{DocumentIndexer, IngestChunk, IngestRequest, IngestResult};
pub use llm::{HttpLlmClient, LlmClient, Message, Role};
pub use rag::{AskOptions, QaResponse, QaSource, RagPipeline};
pub use retrieval::{
    Bm25Index, GraphRetriever, HybridRetriever, InMemoryVectorBackend, RetrievedChunk,
    SearchOptions, VectorBackend, VectorIndexClient, VectorRecord,
};
pub use store::{
    ChunkRecord, CostRecord, DocumentRecord, DocumentStatus, ProjectRecord, ProjectStore,
    SafetyRecord, SqliteProjectStore, TaskRecord,
};
pub use tools::{CostTools, ProgressTools, SafetyTools, TrafficLight};
pub use workflow_log::{WorkflowLog, WorkflowLogEntry, WorkflowStatus};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
