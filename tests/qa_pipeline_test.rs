//! End-to-end QA pipeline tests with stubbed external services

mod common;

use common::{DownGraphClient, StubLlm};
use sitewise::cache::SqliteCacheStore;
use sitewise::config::{CacheConfig, EngineConfig};
use sitewise::ingest::{IngestChunk, IngestRequest};
use sitewise::rag::AskOptions;
use sitewise::retrieval::InMemoryVectorBackend;
use sitewise::store::SqliteProjectStore;
use sitewise::Engine;
use std::sync::Arc;

const EMBED_DIM: usize = 8;

async fn test_engine() -> (Engine, Arc<StubLlm>) {
    let mut config = EngineConfig::default();
    config.vector.dimension = EMBED_DIM;
    config.retrieval.enable_graph = true;

    let cache_file = tempfile::NamedTempFile::new().unwrap();
    let cache_config = CacheConfig {
        db_path: cache_file.path().to_str().unwrap().to_string(),
        ..Default::default()
    };
    std::mem::forget(cache_file);

    let llm = Arc::new(StubLlm::new(EMBED_DIM));
    let engine = Engine::builder(config)
        .with_llm(llm.clone())
        .with_vector_backend(Arc::new(InMemoryVectorBackend::new()))
        .with_graph_client(Arc::new(DownGraphClient))
        .with_cache(Arc::new(SqliteCacheStore::new(cache_config).await.unwrap()))
        .with_store(Arc::new(SqliteProjectStore::in_memory().await.unwrap()))
        .build()
        .await
        .unwrap();

    (engine, llm)
}

fn regulation_request() -> IngestRequest {
    IngestRequest {
        name: "混凝土结构设计规范".to_string(),
        doc_type: "regulation".to_string(),
        permission_level: 1,
        project_id: None,
        source_path: None,
        vector_collection: None,
    }
}

#[tokio::test]
async fn test_qa_happy_path_and_cache_round_trip() {
    let (engine, llm) = test_engine().await;

    let result = engine
        .ingest_document(
            &regulation_request(),
            vec![IngestChunk {
                text: "根据GB50010-2010，C30混凝土的强度等级标准值为30MPa，用于框架梁柱。"
                    .to_string(),
                page_num: Some(12),
            }],
        )
        .await
        .unwrap();
    assert_eq!(result.total_chunks, 1);

    let options = AskOptions {
        top_k: 5,
        ..Default::default()
    };
    let response = engine.ask("C30 混凝土强度", &options).await.unwrap();

    assert!(!response.cached);
    assert_eq!(response.metadata.retrieval_count, 1);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(
        response.sources[0].doc_id.as_deref(),
        Some(result.document_id.as_str())
    );
    assert!(response.answer.contains("30MPa"));
    assert_eq!(llm.calls(), 1);

    // Second identical call within the TTL: cached, same sources, no
    // further LLM call
    let cached = engine.ask("C30 混凝土强度", &options).await.unwrap();
    assert!(cached.cached);
    assert_eq!(cached.answer, response.answer);
    assert_eq!(cached.sources.len(), 1);
    assert_eq!(cached.sources[0].chunk_id, response.sources[0].chunk_id);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_empty_corpus_returns_fallback_without_llm() {
    let (engine, llm) = test_engine().await;

    let response = engine
        .ask("C30 混凝土强度", &AskOptions::default())
        .await
        .unwrap();

    assert!(response.metadata.no_result);
    assert!(response.sources.is_empty());
    assert!(response.answer.contains("未能"));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_top_k_zero_skips_llm() {
    let (engine, llm) = test_engine().await;
    engine
        .ingest_document(
            &regulation_request(),
            vec![IngestChunk {
                text: "C30混凝土强度等级".to_string(),
                page_num: None,
            }],
        )
        .await
        .unwrap();

    let options = AskOptions {
        top_k: 0,
        ..Default::default()
    };
    let response = engine.ask("C30", &options).await.unwrap();
    assert!(response.metadata.no_result);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_graph_store_down_still_answers() {
    // The engine above is wired to an unreachable graph store; BM25
    // and vector channels carry the query
    let (engine, _llm) = test_engine().await;
    engine
        .ingest_document(
            &regulation_request(),
            vec![IngestChunk {
                text: "KL-1框架梁使用C30混凝土，截面300x500。".to_string(),
                page_num: None,
            }],
        )
        .await
        .unwrap();

    let response = engine
        .ask("KL-1 使用什么材料", &AskOptions::default())
        .await
        .unwrap();
    assert!(!response.metadata.no_result);
    assert!(!response.sources.is_empty());
}

#[tokio::test]
async fn test_skip_cache_bypasses_hit() {
    let (engine, llm) = test_engine().await;
    engine
        .ingest_document(
            &regulation_request(),
            vec![IngestChunk {
                text: "C30混凝土的强度等级标准值为30MPa。".to_string(),
                page_num: None,
            }],
        )
        .await
        .unwrap();

    let options = AskOptions::default();
    engine.ask("C30 强度", &options).await.unwrap();
    assert_eq!(llm.calls(), 1);

    let skip = AskOptions {
        skip_cache: true,
        ..Default::default()
    };
    let response = engine.ask("C30 强度", &skip).await.unwrap();
    assert!(!response.cached);
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn test_ingest_without_chunks_fails_document() {
    let (engine, _llm) = test_engine().await;
    let err = engine
        .ingest_document(&regulation_request(), vec![])
        .await
        .unwrap_err();
    assert_eq!(err.category(), "invalid_input");
}

#[tokio::test]
async fn test_empty_query_is_invalid_input() {
    let (engine, _llm) = test_engine().await;
    let err = engine.ask("   ", &AskOptions::default()).await.unwrap_err();
    assert_eq!(err.category(), "invalid_input");
}
