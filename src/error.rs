//! Error handling for the engine

use thiserror::Error;

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] AnalyticsError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors related to language model operations
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout: operation took too long")]
    Timeout,

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors related to retrieval (BM25, vector, graph channels)
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Index not built")]
    IndexNotBuilt,

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Vector store unavailable: {0}")]
    VectorUnavailable(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Index persistence failed: {0}")]
    PersistenceFailed(String),
}

/// Errors related to the property-graph store
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Write retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },
}

/// Errors related to the cache layer
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

/// Errors related to analytics tools and agents
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Workflow failed: {0}")]
    WorkflowFailed(String),
}

impl EngineError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Llm(LlmError::Timeout)
                | EngineError::Llm(LlmError::ConnectionFailed(_))
                | EngineError::Graph(GraphError::Unavailable(_))
                | EngineError::Retrieval(RetrievalError::VectorUnavailable(_))
                | EngineError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Llm(_) => "llm",
            EngineError::Retrieval(_) => "retrieval",
            EngineError::Graph(_) => "graph",
            EngineError::Cache(_) => "cache",
            EngineError::Analytics(_) => "analytics",
            EngineError::Config(_) => "config",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::NotFound(_) => "not_found",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
            EngineError::Http(_) => "http",
            EngineError::Database(_) => "database",
            EngineError::Generic(_) => "generic",
        }
    }

    /// True for input-invalid errors that surface to the caller without
    /// being logged as errors
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidInput(_) | EngineError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_error = EngineError::Llm(LlmError::Timeout);
        assert!(timeout_error.is_retryable());

        let config_error = EngineError::Config("invalid config".to_string());
        assert!(!config_error.is_retryable());

        let graph_down = EngineError::Graph(GraphError::Unavailable("refused".to_string()));
        assert!(graph_down.is_retryable());
    }

    #[test]
    fn test_error_category() {
        let llm_error = EngineError::Llm(LlmError::Timeout);
        assert_eq!(llm_error.category(), "llm");

        let retrieval_error = EngineError::Retrieval(RetrievalError::IndexNotBuilt);
        assert_eq!(retrieval_error.category(), "retrieval");
    }

    #[test]
    fn test_input_errors_are_not_retryable() {
        let err = EngineError::InvalidInput("missing query".to_string());
        assert!(err.is_input_error());
        assert!(!err.is_retryable());
    }
}
