//! Document ingestion and index maintenance
//!
//! Takes parser output (chunk texts) and drives it through the lexical
//! and vector indexes while keeping the document row's status honest:
//! a document only becomes `completed` after its chunks and vectors are
//! both written, so any reader observing `completed` can read both.

use crate::analyzer::{KeywordMethod, TextAnalyzer, TokenizeMode};
use crate::error::Result;
use crate::graph::GraphRepository;
use crate::llm::LlmClient;
use crate::retrieval::bm25::{Bm25Doc, Bm25Index};
use crate::retrieval::vector::{VectorIndexClient, VectorRecord};
use crate::store::{ChunkRecord, DocumentRecord, DocumentStatus, ProjectStore};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// A chunk of parsed text ready for indexing
#[derive(Debug, Clone)]
pub struct IngestChunk {
    pub text: String,
    pub page_num: Option<i64>,
}

/// Metadata for a document being ingested
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub name: String,
    /// regulation | project | contract | drawing | other
    pub doc_type: String,
    pub permission_level: i64,
    pub project_id: Option<String>,
    pub source_path: Option<String>,
    /// Target vector tier; defaults by doc_type when empty
    pub vector_collection: Option<String>,
}

impl IngestRequest {
    fn collection(&self) -> String {
        if let Some(collection) = &self.vector_collection {
            return collection.clone();
        }
        match self.doc_type.as_str() {
            "regulation" => "standards",
            "contract" => "contracts",
            _ => "projects",
        }
        .to_string()
    }
}

/// Outcome of one ingestion
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub document_id: String,
    pub status: DocumentStatus,
    pub total_chunks: usize,
    pub keywords: Vec<String>,
}

/// Indexer shared by ingestion and re-indexing
pub struct DocumentIndexer {
    store: Arc<dyn ProjectStore>,
    bm25: Arc<RwLock<Bm25Index>>,
    vector: Arc<VectorIndexClient>,
    graph_repo: Option<Arc<GraphRepository>>,
    embedder: Arc<dyn LlmClient>,
    analyzer: Arc<TextAnalyzer>,
}

impl DocumentIndexer {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        bm25: Arc<RwLock<Bm25Index>>,
        vector: Arc<VectorIndexClient>,
        graph_repo: Option<Arc<GraphRepository>>,
        embedder: Arc<dyn LlmClient>,
        analyzer: Arc<TextAnalyzer>,
    ) -> Self {
        Self {
            store,
            bm25,
            vector,
            graph_repo,
            embedder,
            analyzer,
        }
    }

    /// Ingest a new document: create the row, index chunks into the
    /// lexical and vector stores, then mark it completed
    pub async fn ingest(&self, request: &IngestRequest, chunks: Vec<IngestChunk>) -> Result<IngestResult> {
        let document_id = Uuid::new_v4().to_string();
        let collection = request.collection();
        let now = Utc::now();

        self.store
            .upsert_document(&DocumentRecord {
                id: document_id.clone(),
                name: request.name.clone(),
                doc_type: request.doc_type.clone(),
                permission_level: request.permission_level,
                project_id: request.project_id.clone(),
                source_path: request.source_path.clone(),
                status: DocumentStatus::Processing,
                total_chunks: 0,
                vector_collection: Some(collection.clone()),
                created_at: now,
                updated_at: now,
            })
            .await?;

        match self
            .index_chunks(&document_id, request, &collection, chunks)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Ingestion failed for {}: {}", document_id, e);
                self.store
                    .update_document_status(&document_id, DocumentStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    /// Re-index an existing document: replaces chunks and vectors
    /// atomically per document, then restores `completed`
    pub async fn reindex(&self, document_id: &str, chunks: Vec<IngestChunk>) -> Result<IngestResult> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| crate::error::EngineError::NotFound(document_id.to_string()))?;
        let collection = document
            .vector_collection
            .clone()
            .unwrap_or_else(|| "projects".to_string());

        self.store
            .update_document_status(document_id, DocumentStatus::Processing, None)
            .await?;

        // Drop stale vectors and lexical entries before re-inserting
        if let Err(e) = self
            .vector
            .delete(&collection, &format!("doc_id == '{}'", document_id))
            .await
        {
            warn!("Stale vector delete failed for {}: {}", document_id, e);
        }
        let stale_ids: Vec<String> = self
            .store
            .chunks_by_document(document_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        {
            let mut index = self.bm25.write().await;
            index.remove_documents(&stale_ids);
        }

        let request = IngestRequest {
            name: document.name.clone(),
            doc_type: document.doc_type.clone(),
            permission_level: document.permission_level,
            project_id: document.project_id.clone(),
            source_path: document.source_path.clone(),
            vector_collection: Some(collection.clone()),
        };

        match self
            .index_chunks(document_id, &request, &collection, chunks)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                self.store
                    .update_document_status(document_id, DocumentStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn index_chunks(
        &self,
        document_id: &str,
        request: &IngestRequest,
        collection: &str,
        chunks: Vec<IngestChunk>,
    ) -> Result<IngestResult> {
        // A completed document always has at least one indexed chunk
        if chunks.is_empty() {
            return Err(crate::error::EngineError::InvalidInput(
                "document has no chunks to index".to_string(),
            ));
        }

        info!(
            "Indexing {} chunks for document {} into {}",
            chunks.len(),
            document_id,
            collection
        );

        // Chunk rows first
        let mut records: Vec<ChunkRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| ChunkRecord {
                id: format!("{}#{}", document_id, i),
                document_id: document_id.to_string(),
                chunk_index: i as i64,
                text: chunk.text.clone(),
                token_count: self
                    .analyzer
                    .tokenize(&chunk.text, TokenizeMode::Default)
                    .len() as i64,
                page_num: chunk.page_num,
                vector_id: None,
                vector_collection: Some(collection.to_string()),
            })
            .collect();

        // Vectors next; the document is not completed until they land.
        // Chunk embeddings fan out concurrently.
        let embeddings = futures::future::try_join_all(
            records.iter().map(|record| self.embedder.embed(&record.text)),
        )
        .await?;
        let vector_records: Vec<VectorRecord> = records
            .iter()
            .zip(embeddings)
            .map(|(record, embedding)| VectorRecord {
                chunk_id: record.id.clone(),
                embedding: embedding.embedding,
                doc_id: document_id.to_string(),
                doc_type: request.doc_type.clone(),
                permission_level: request.permission_level,
                page_num: record.page_num,
            })
            .collect();
        let pks = self.vector.insert(collection, &vector_records).await?;
        for (record, pk) in records.iter_mut().zip(&pks) {
            record.vector_id = Some(*pk);
        }

        self.store.replace_chunks(document_id, &records).await?;

        // Lexical index over the updated corpus
        {
            let mut index = self.bm25.write().await;
            index.add_documents(
                records
                    .iter()
                    .map(|r| Bm25Doc {
                        id: r.id.clone(),
                        text: r.text.clone(),
                    })
                    .collect(),
            );
        }

        self.store
            .update_document_status(
                document_id,
                DocumentStatus::Completed,
                Some(records.len() as i64),
            )
            .await?;

        let keywords = self.analyzer.extract_keywords(
            &chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            10,
            KeywordMethod::TfIdf,
        );

        info!("Document {} indexed | chunks: {}", document_id, records.len());
        Ok(IngestResult {
            document_id: document_id.to_string(),
            status: DocumentStatus::Completed,
            total_chunks: records.len(),
            keywords,
        })
    }

    /// Delete a document everywhere: chunks, vectors and owned graph
    /// entities
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let document = self.store.get_document(document_id).await?;
        let collection = document
            .as_ref()
            .and_then(|d| d.vector_collection.clone())
            .unwrap_or_else(|| "projects".to_string());

        let chunk_ids: Vec<String> = self
            .store
            .chunks_by_document(document_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if let Err(e) = self
            .vector
            .delete(&collection, &format!("doc_id == '{}'", document_id))
            .await
        {
            warn!("Vector delete failed for {}: {}", document_id, e);
        }
        {
            let mut index = self.bm25.write().await;
            index.remove_documents(&chunk_ids);
        }
        if let Some(repo) = &self.graph_repo {
            if let Err(e) = repo.delete_document_and_relations(document_id).await {
                warn!("Graph cascade delete failed for {}: {}", document_id, e);
            }
        }
        self.store.delete_document(document_id).await?;

        info!("Document {} deleted with {} chunks", document_id, chunk_ids.len());
        Ok(())
    }

    /// Rebuild the BM25 index from the full chunk corpus in the store
    pub async fn rebuild_lexical_index(&self) -> Result<usize> {
        let chunks = self.store.all_chunks().await?;
        let count = chunks.len();
        let docs: Vec<Bm25Doc> = chunks
            .into_iter()
            .map(|c| Bm25Doc {
                id: c.id,
                text: c.text,
            })
            .collect();
        let mut index = self.bm25.write().await;
        index.build(docs);
        info!("Lexical index rebuilt over {} chunks", count);
        Ok(count)
    }
}
