//! Retrieval channels and fusion
//!
//! Three independent channels (lexical BM25, dense vector, knowledge
//! graph) feed the hybrid retriever, which fuses, reranks and annotates
//! candidates with graph context.

pub mod bm25;
pub mod graph;
pub mod hybrid;
pub mod rerank;
pub mod vector;

pub use bm25::{Bm25Hit, Bm25Index};
pub use graph::{GraphRetriever, GraphSearchResult};
pub use hybrid::{HybridRetriever, RetrievedChunk, SearchOptions};
pub use rerank::{HttpReranker, Reranker};
pub use vector::{
    InMemoryVectorBackend, VectorBackend, VectorHit, VectorIndexClient, VectorRecord,
};
