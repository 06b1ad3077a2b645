//! Application context wiring the engine together
//!
//! Owns the long-lived client handles (LLM, vector, graph, cache,
//! relational store) and passes them explicitly into the components
//! that need them. The inbound operations (`ask`, the agent entry
//! points, drawing processing) live here.

use crate::agents::{
    AgentContext, CostAnalysisAgent, CostReport, ProgressAnalysisAgent, ProgressReport,
    QuickScan, ReportFormat, RiskAnalysisAgent, RiskAnalysisResult, SafetyAnalysisAgent,
    SafetyReport, WeeklyReportAgent, WeeklyReportOutput,
};
use crate::analyzer::TextAnalyzer;
use crate::cache::{CacheStore, SqliteCacheStore};
use crate::config::EngineConfig;
use crate::drawing::{DrawingProcessingRecord, DrawingProcessor, EntityExtractor, ParsedDrawing};
use crate::error::Result;
use crate::graph::{GraphRepository, HttpGraphClient};
use crate::ingest::{DocumentIndexer, IngestChunk, IngestRequest, IngestResult};
use crate::llm::{HttpLlmClient, LlmClient};
use crate::rag::{AskOptions, QaResponse, RagPipeline};
use crate::retrieval::bm25::Bm25Index;
use crate::retrieval::graph::{GraphRetriever, GraphRetrieverConfig};
use crate::retrieval::hybrid::HybridRetriever;
use crate::retrieval::rerank::{HttpReranker, Reranker};
use crate::retrieval::vector::{HttpVectorBackend, VectorBackend, VectorIndexClient};
use crate::store::{ProjectStore, SqliteProjectStore};
use crate::workflow_log::WorkflowLog;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// The assembled engine
pub struct Engine {
    config: EngineConfig,
    rag: Arc<RagPipeline>,
    indexer: Arc<DocumentIndexer>,
    drawing_processor: Arc<DrawingProcessor>,
    agent_context: AgentContext,
    store: Arc<dyn ProjectStore>,
    cache: Option<Arc<dyn CacheStore>>,
}

/// Builder with injectable backends for embedding into other hosts and
/// for tests
pub struct EngineBuilder {
    config: EngineConfig,
    llm: Option<Arc<dyn LlmClient>>,
    vector_backend: Option<Arc<dyn VectorBackend>>,
    graph_client: Option<Arc<dyn crate::graph::GraphClient>>,
    cache: Option<Arc<dyn CacheStore>>,
    store: Option<Arc<SqliteProjectStore>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            llm: None,
            vector_backend: None,
            graph_client: None,
            cache: None,
            store: None,
            reranker: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector_backend = Some(backend);
        self
    }

    pub fn with_graph_client(mut self, client: Arc<dyn crate::graph::GraphClient>) -> Self {
        self.graph_client = Some(client);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_store(mut self, store: Arc<SqliteProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Wire everything together
    pub async fn build(self) -> anyhow::Result<Engine> {
        let config = self.config;
        config.validate()?;

        info!("Building engine");

        let llm: Arc<dyn LlmClient> = match self.llm {
            Some(llm) => llm,
            None => Arc::new(HttpLlmClient::new(config.llm.clone())?),
        };

        let vector_backend: Arc<dyn VectorBackend> = match self.vector_backend {
            Some(backend) => backend,
            None => Arc::new(HttpVectorBackend::new(&config.vector)?),
        };
        let vector = Arc::new(VectorIndexClient::new(
            vector_backend,
            config.vector.clone(),
        ));
        vector.ensure_collections().await?;

        let graph_client: Arc<dyn crate::graph::GraphClient> = match self.graph_client {
            Some(client) => client,
            None => Arc::new(HttpGraphClient::new(config.graph.clone())?),
        };
        let graph_repo = Arc::new(GraphRepository::new(graph_client.clone()));

        let graph_retriever = if config.retrieval.enable_graph {
            Some(Arc::new(GraphRetriever::new(
                graph_client.clone(),
                GraphRetrieverConfig {
                    max_entities: config.retrieval.max_entities,
                    relation_depth: config.retrieval.relation_depth,
                    ..Default::default()
                },
            )))
        } else {
            None
        };

        let reranker: Option<Arc<dyn Reranker>> = match self.reranker {
            Some(reranker) => Some(reranker),
            None if config.retrieval.use_rerank && !config.retrieval.rerank_url.is_empty() => {
                Some(Arc::new(HttpReranker::new(
                    config.retrieval.rerank_url.clone(),
                    config.vector.timeout,
                )?))
            }
            None => None,
        };

        let cache: Option<Arc<dyn CacheStore>> = match self.cache {
            Some(cache) => Some(cache),
            None if config.cache.enabled => {
                Some(Arc::new(SqliteCacheStore::new(config.cache.clone()).await?))
            }
            None => None,
        };

        let store: Arc<SqliteProjectStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                SqliteProjectStore::new(&config.database.url, config.database.pool_size).await?,
            ),
        };
        let workflow_log = Arc::new(WorkflowLog::new(store.pool()).await?);

        let analyzer = Arc::new(TextAnalyzer::new());
        let bm25 = Arc::new(RwLock::new(Bm25Index::new(analyzer.clone())));

        let retriever = Arc::new(HybridRetriever::new(
            bm25.clone(),
            vector.clone(),
            graph_retriever,
            reranker,
            llm.clone(),
            config.retrieval.clone(),
        ));

        let rag = Arc::new(RagPipeline::new(
            retriever,
            llm.clone(),
            cache.clone(),
            config.retrieval.enable_graph,
            config.retrieval.max_context_length,
        ));

        let store_dyn: Arc<dyn ProjectStore> = store.clone();
        let indexer = Arc::new(DocumentIndexer::new(
            store_dyn.clone(),
            bm25.clone(),
            vector.clone(),
            Some(graph_repo.clone()),
            llm.clone(),
            analyzer.clone(),
        ));

        let extractor = EntityExtractor::new(
            config.drawing.clone(),
            if config.drawing.use_llm {
                Some(llm.clone())
            } else {
                None
            },
        );
        let drawing_processor = Arc::new(DrawingProcessor::new(graph_repo, extractor));

        // Warm the lexical index from the persisted corpus
        indexer.rebuild_lexical_index().await?;

        let agent_context = AgentContext::new(store_dyn.clone(), workflow_log, Some(rag.clone()));

        info!("Engine ready");
        Ok(Engine {
            config,
            rag,
            indexer,
            drawing_processor,
            agent_context,
            store: store_dyn,
            cache,
        })
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build with the default HTTP backends
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        EngineBuilder::new(config).build().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    pub fn indexer(&self) -> &Arc<DocumentIndexer> {
        &self.indexer
    }

    // ----- inbound operations -----

    /// qa.ask
    pub async fn ask(&self, query: &str, options: &AskOptions) -> Result<QaResponse> {
        self.rag.ask(query, options).await
    }

    /// agents.weekly_report
    pub async fn weekly_report(
        &self,
        project_id: &str,
        format: ReportFormat,
        include_ai: bool,
    ) -> Result<WeeklyReportOutput> {
        WeeklyReportAgent::new(self.agent_context.clone())
            .generate(project_id, format, include_ai)
            .await
    }

    /// agents.risk_analyze
    pub async fn risk_analyze(
        &self,
        project_id: &str,
        historical_days: Option<i64>,
        include_ai: bool,
    ) -> Result<RiskAnalysisResult> {
        RiskAnalysisAgent::new(self.agent_context.clone())
            .analyze(project_id, include_ai, historical_days.unwrap_or(30))
            .await
    }

    /// agents.quick_scan
    pub async fn quick_scan(&self, project_id: &str) -> Result<QuickScan> {
        RiskAnalysisAgent::new(self.agent_context.clone())
            .quick_scan(project_id)
            .await
    }

    /// agents.progress_analyze
    pub async fn progress_analyze(
        &self,
        project_id: &str,
        include_ai: bool,
    ) -> Result<ProgressReport> {
        ProgressAnalysisAgent::new(self.agent_context.clone())
            .analyze(project_id, include_ai)
            .await
    }

    /// agents.cost_analyze
    pub async fn cost_analyze(&self, project_id: &str, include_ai: bool) -> Result<CostReport> {
        CostAnalysisAgent::new(self.agent_context.clone())
            .analyze(project_id, include_ai)
            .await
    }

    /// agents.safety_analyze
    pub async fn safety_analyze(
        &self,
        project_id: &str,
        window_days: Option<i64>,
        include_ai: bool,
    ) -> Result<SafetyReport> {
        SafetyAnalysisAgent::new(self.agent_context.clone())
            .analyze(project_id, window_days.unwrap_or(7), include_ai)
            .await
    }

    /// drawing.process
    pub async fn process_drawing(
        &self,
        document_id: &str,
        document_name: &str,
        project_id: Option<&str>,
        parsed: &ParsedDrawing,
    ) -> DrawingProcessingRecord {
        self.drawing_processor
            .process(document_id, document_name, project_id, parsed)
            .await
    }

    /// Ingest a parsed document into the indexes
    pub async fn ingest_document(
        &self,
        request: &IngestRequest,
        chunks: Vec<IngestChunk>,
    ) -> Result<IngestResult> {
        self.indexer.ingest(request, chunks).await
    }

    /// Graceful shutdown of owned handles. SQLite pools close on drop;
    /// this is the explicit hook for hosts that want a deterministic
    /// teardown point.
    pub async fn shutdown(self) {
        info!("Engine shut down");
    }
}
