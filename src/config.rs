//! Configuration management for the engine

use serde::{Deserialize, Serialize};

/// Main configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// LLM configuration
    pub llm: LlmConfig,

    /// Vector store configuration
    pub vector: VectorConfig,

    /// Graph store configuration
    pub graph: GraphConfig,

    /// Retrieval and fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Relational project store configuration
    pub database: DatabaseConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Drawing knowledge extraction configuration
    #[serde(default)]
    pub drawing: DrawingConfig,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// API key (empty for unauthenticated local deployments)
    #[serde(default)]
    pub api_key: String,

    /// Default model for text generation
    pub text_model: String,

    /// Model for embeddings
    pub embedding_model: String,

    /// Maximum tokens for generation
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Maximum retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

/// Distance metric for vector collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VectorMetric {
    /// Inner product (assumes normalized embeddings)
    Ip,
    /// Euclidean distance
    L2,
    /// Cosine similarity
    Cosine,
}

impl VectorMetric {
    /// Whether larger distances mean closer matches for this metric
    pub fn larger_is_closer(&self) -> bool {
        !matches!(self, VectorMetric::L2)
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector DB endpoint URL
    pub url: String,

    /// Embedding dimension (fixed per collection)
    pub dimension: usize,

    /// Distance metric
    #[serde(default = "default_metric")]
    pub metric: VectorMetric,

    /// Collection probe order for hierarchical search, by authority
    #[serde(default = "default_tier_order")]
    pub tier_order: Vec<String>,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout: u64,
}

fn default_metric() -> VectorMetric {
    VectorMetric::Ip
}

fn default_tier_order() -> Vec<String> {
    vec![
        "standards".to_string(),
        "projects".to_string(),
        "contracts".to_string(),
    ]
}

fn default_store_timeout() -> u64 {
    10
}

/// Graph store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Graph DB HTTP endpoint (transactional Cypher API)
    pub url: String,

    /// Username for basic auth
    #[serde(default)]
    pub username: String,

    /// Password for basic auth
    #[serde(default)]
    pub password: String,

    /// Request timeout in seconds
    #[serde(default = "default_store_timeout")]
    pub timeout: u64,

    /// Wall-clock budget for write retries in seconds
    #[serde(default = "default_write_retry_budget")]
    pub write_retry_budget: u64,
}

fn default_write_retry_budget() -> u64 {
    15
}

/// Retrieval and fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Fusion method ("rrf" or "weighted")
    #[serde(default = "default_fusion_method")]
    pub fusion_method: String,

    /// RRF rank constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// BM25 channel weight
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,

    /// Vector channel weight
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Graph channel weight
    #[serde(default = "default_graph_weight")]
    pub graph_weight: f64,

    /// Enable cross-encoder reranking
    #[serde(default = "default_true")]
    pub use_rerank: bool,

    /// Rerank service endpoint (empty disables reranking)
    #[serde(default)]
    pub rerank_url: String,

    /// Enable graph retrieval channel
    #[serde(default = "default_true")]
    pub enable_graph: bool,

    /// Relation traversal depth for graph retrieval
    #[serde(default = "default_relation_depth")]
    pub relation_depth: usize,

    /// Maximum entities linked from one query
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,

    /// Character budget for assembled retrieval context
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
}

fn default_fusion_method() -> String {
    "rrf".to_string()
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_bm25_weight() -> f64 {
    0.3
}

fn default_vector_weight() -> f64 {
    0.4
}

fn default_graph_weight() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_relation_depth() -> usize {
    2
}

fn default_max_entities() -> usize {
    5
}

fn default_max_context_length() -> usize {
    3000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion_method: default_fusion_method(),
            rrf_k: default_rrf_k(),
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            graph_weight: default_graph_weight(),
            use_rerank: true,
            rerank_url: String::new(),
            enable_graph: true,
            relation_depth: default_relation_depth(),
            max_entities: default_max_entities(),
            max_context_length: default_max_context_length(),
        }
    }
}

/// Relational project store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable or disable caching
    pub enabled: bool,

    /// SQLite database path for the cache
    pub db_path: String,

    /// Time-to-live for cached query results in seconds
    pub query_ttl_seconds: i64,

    /// Time-to-live for cached user permissions in seconds
    pub permission_ttl_seconds: i64,

    /// Maximum entries per user's search history
    pub max_search_history: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: "cache.db".to_string(),
            query_ttl_seconds: 6 * 3600,
            permission_ttl_seconds: 3600,
            max_search_history: 50,
        }
    }
}

/// Drawing knowledge extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingConfig {
    /// Enable LLM enrichment of rule-extracted entities
    #[serde(default)]
    pub use_llm: bool,

    /// Character cap on the text sample sent for LLM enrichment
    #[serde(default = "default_llm_sample_chars")]
    pub llm_sample_chars: usize,
}

fn default_llm_sample_chars() -> usize {
    3000
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            use_llm: false,
            llm_sample_chars: default_llm_sample_chars(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            vector: VectorConfig::default(),
            graph: GraphConfig::default(),
            retrieval: RetrievalConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            drawing: DrawingConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            text_model: "qwen2.5".to_string(),
            embedding_model: "bge-m3".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout: 30,
            max_retries: default_max_retries(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:19530".to_string(),
            dimension: 1024,
            metric: VectorMetric::Ip,
            tier_order: default_tier_order(),
            timeout: default_store_timeout(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            username: String::new(),
            password: String::new(),
            timeout: default_store_timeout(),
            write_retry_budget: default_write_retry_budget(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:sitewise.db".to_string(),
            pool_size: default_pool_size(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.base_url.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid LLM base URL: {}", self.llm.base_url));
        }

        if self.llm.text_model.is_empty() {
            return Err(anyhow::anyhow!("Text model name cannot be empty"));
        }

        if self.llm.embedding_model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.vector.dimension == 0 {
            return Err(anyhow::anyhow!("Embedding dimension must be greater than 0"));
        }

        if self.vector.tier_order.is_empty() {
            return Err(anyhow::anyhow!("Hierarchical search needs at least one tier"));
        }

        let weight_sum =
            self.retrieval.bm25_weight + self.retrieval.vector_weight + self.retrieval.graph_weight;
        if weight_sum <= 0.0 {
            return Err(anyhow::anyhow!("Fusion weights must sum to a positive value"));
        }

        match self.retrieval.fusion_method.as_str() {
            "rrf" | "weighted" => {}
            other => return Err(anyhow::anyhow!("Unsupported fusion method: {}", other)),
        }

        if self.cache.query_ttl_seconds <= 0 {
            return Err(anyhow::anyhow!("Query cache TTL must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(
            config.vector.tier_order,
            vec!["standards", "projects", "contracts"]
        );
        assert_eq!(config.cache.query_ttl_seconds, 6 * 3600);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.llm.base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.retrieval.fusion_method = "magic".to_string();
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.vector.tier_order.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metric_sort_direction() {
        assert!(VectorMetric::Ip.larger_is_closer());
        assert!(VectorMetric::Cosine.larger_is_closer());
        assert!(!VectorMetric::L2.larger_is_closer());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let config = EngineConfig::default();
        config.to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.llm.text_model, config.llm.text_model);
        assert_eq!(loaded.vector.dimension, config.vector.dimension);
    }
}
