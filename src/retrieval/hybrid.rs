//! Hybrid three-way retrieval with fusion and rerank
//!
//! Fans out to the BM25, vector and graph channels concurrently, fuses
//! the candidate lists (reciprocal-rank or weighted min-max fusion),
//! optionally reranks with a cross-encoder, and annotates fused results
//! with graph context. A failing channel degrades to an empty list and
//! never fails the whole call.

use crate::config::RetrievalConfig;
use crate::llm::LlmClient;
use crate::retrieval::bm25::{Bm25Hit, Bm25Index};
use crate::retrieval::graph::{GraphRetriever, GraphSearchResult};
use crate::retrieval::rerank::Reranker;
use crate::retrieval::vector::{VectorHit, VectorIndexClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Multiplier applied to a graph hit's RRF contribution when it carries
/// rendered context
const GRAPH_CONTEXT_RRF_BONUS: f64 = 1.2;
/// Additive bonus on the normalized score of a context-bearing graph
/// hit under weighted fusion
const GRAPH_CONTEXT_WEIGHTED_BONUS: f64 = 0.1;

/// One fused retrieval candidate with full provenance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub doc_id: Option<String>,

    pub bm25_rank: Option<usize>,
    pub bm25_score: Option<f64>,
    pub vector_rank: Option<usize>,
    pub vector_score: Option<f64>,
    pub graph_rank: Option<usize>,
    pub graph_score: Option<f64>,

    pub fusion_score: f64,
    pub fusion_rank: usize,
    pub rerank_score: Option<f32>,

    /// Which channels produced this candidate
    pub retrieval_sources: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_graph_context: Option<String>,
}

/// Per-call search options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub bm25_top_k: Option<usize>,
    pub vector_top_k: Option<usize>,
    pub graph_top_k: Option<usize>,
    /// Filter expression passed through to the vector store
    pub filter: Option<String>,
    /// Document scope for graph retrieval
    pub doc_id: Option<String>,
    pub use_rerank: bool,
    pub enhance_with_graph: bool,
    /// Override of the (bm25, vector, graph) fusion weights
    pub fusion_weights: Option<(f64, f64, f64)>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            bm25_top_k: None,
            vector_top_k: None,
            graph_top_k: None,
            filter: None,
            doc_id: None,
            use_rerank: true,
            enhance_with_graph: true,
            fusion_weights: None,
        }
    }
}

/// Three-way hybrid retriever
pub struct HybridRetriever {
    bm25: Arc<RwLock<Bm25Index>>,
    vector: Arc<VectorIndexClient>,
    graph: Option<Arc<GraphRetriever>>,
    reranker: Option<Arc<dyn Reranker>>,
    embedder: Arc<dyn LlmClient>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        bm25: Arc<RwLock<Bm25Index>>,
        vector: Arc<VectorIndexClient>,
        graph: Option<Arc<GraphRetriever>>,
        reranker: Option<Arc<dyn Reranker>>,
        embedder: Arc<dyn LlmClient>,
        config: RetrievalConfig,
    ) -> Self {
        info!(
            "Hybrid retriever | graph: {} | rerank: {} | fusion: {}",
            graph.is_some(),
            reranker.is_some(),
            config.fusion_method
        );
        Self {
            bm25,
            vector,
            graph,
            reranker,
            embedder,
            config,
        }
    }

    /// Three-way search with fusion, optional rerank and graph-context
    /// enhancement
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Vec<RetrievedChunk> {
        let top_k = options.top_k;
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let bm25_top_k = options.bm25_top_k.unwrap_or(top_k * 3);
        let vector_top_k = options.vector_top_k.unwrap_or(top_k * 3);
        let graph_top_k = options.graph_top_k.unwrap_or(top_k * 2);

        // Parallel fan-out; each channel absorbs its own failures
        let (bm25_hits, vector_hits, graph_hits) = tokio::join!(
            self.bm25_channel(query, bm25_top_k),
            self.vector_channel(query, vector_top_k, options.filter.as_deref()),
            self.graph_channel(query, graph_top_k, options.doc_id.as_deref()),
        );

        debug!(
            "Channels returned | bm25: {} | vector: {} | graph: {}",
            bm25_hits.len(),
            vector_hits.len(),
            graph_hits.len()
        );

        let weights = options.fusion_weights.unwrap_or((
            self.config.bm25_weight,
            self.config.vector_weight,
            self.config.graph_weight,
        ));

        let mut fused = if self.config.fusion_method == "weighted" {
            self.weighted_fusion(&bm25_hits, &vector_hits, &graph_hits, weights)
                .await
        } else {
            self.rrf_fusion(&bm25_hits, &vector_hits, &graph_hits, weights)
                .await
        };

        // Bound the candidate list before reranking
        let rerank_top_k = (top_k * 3).min(fused.len());
        fused.truncate(rerank_top_k);

        if options.use_rerank && self.config.use_rerank {
            if let Some(reranker) = &self.reranker {
                self.apply_rerank(query, reranker.as_ref(), &mut fused).await;
            }
        }

        if options.enhance_with_graph && !graph_hits.is_empty() {
            enhance_with_graph_context(&mut fused, &graph_hits);
        }

        fused.truncate(top_k);
        for (i, chunk) in fused.iter_mut().enumerate() {
            chunk.fusion_rank = i + 1;
        }

        info!(
            "Hybrid search complete | final: {} of top_k {}",
            fused.len(),
            top_k
        );
        fused
    }

    async fn bm25_channel(&self, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let index = self.bm25.read().await;
        index.search(query, top_k, true)
    }

    async fn vector_channel(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> Vec<VectorHit> {
        let embedding = match self.embedder.embed(query).await {
            Ok(response) => response.embedding,
            Err(e) => {
                warn!("Query embedding failed, vector channel empty: {}", e);
                return Vec::new();
            }
        };
        match self
            .vector
            .hierarchical_search(&embedding, top_k, filter)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector search failed, channel empty: {}", e);
                Vec::new()
            }
        }
    }

    async fn graph_channel(
        &self,
        query: &str,
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Vec<GraphSearchResult> {
        if !self.config.enable_graph {
            return Vec::new();
        }
        match &self.graph {
            Some(graph) => graph.search(query, top_k, doc_id).await,
            None => Vec::new(),
        }
    }

    /// Reciprocal-rank fusion with per-channel weights:
    /// score(d) = Σ weight_c / (k + rank_c(d)), with a ×1.2 bonus on
    /// context-bearing graph contributions
    async fn rrf_fusion(
        &self,
        bm25_hits: &[Bm25Hit],
        vector_hits: &[VectorHit],
        graph_hits: &[GraphSearchResult],
        (bm25_weight, vector_weight, graph_weight): (f64, f64, f64),
    ) -> Vec<RetrievedChunk> {
        let k = self.config.rrf_k;
        let mut candidates: HashMap<String, RetrievedChunk> = HashMap::new();

        for hit in bm25_hits {
            let entry = candidates
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.chunk_id.clone(),
                    text: hit.text.clone(),
                    ..Default::default()
                });
            entry.fusion_score += bm25_weight / (k + hit.rank as f64);
            entry.bm25_rank = Some(hit.rank);
            entry.bm25_score = Some(hit.score);
            entry.retrieval_sources.push("bm25".to_string());
        }

        for (rank0, hit) in vector_hits.iter().enumerate() {
            let text = self.resolve_chunk_text(&hit.chunk_id).await;
            let Some(text) = text else {
                warn!("Vector hit references unknown chunk {}, skipping", hit.chunk_id);
                continue;
            };
            let rank = rank0 + 1;
            let entry = candidates
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.chunk_id.clone(),
                    text,
                    ..Default::default()
                });
            entry.fusion_score += vector_weight / (k + rank as f64);
            entry.vector_rank = Some(rank);
            entry.vector_score = Some(hit.distance as f64);
            entry.doc_id = Some(hit.doc_id.clone());
            entry.retrieval_sources.push("vector".to_string());
        }

        for (i, hit) in graph_hits.iter().enumerate() {
            let rank = i + 1;
            let mut contribution = graph_weight / (k + rank as f64);
            if !hit.text.is_empty() || !hit.relations.is_empty() {
                contribution *= GRAPH_CONTEXT_RRF_BONUS;
            }
            let entry = candidates
                .entry(hit.entity_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.entity_id.clone(),
                    text: hit.text.clone(),
                    ..Default::default()
                });
            entry.fusion_score += contribution;
            entry.graph_rank = Some(rank);
            entry.graph_score = Some(hit.score);
            if !hit.text.is_empty() {
                entry.graph_context = Some(hit.text.clone());
            }
            entry.retrieval_sources.push("graph".to_string());
        }

        sort_candidates(candidates)
    }

    /// Weighted fusion over min-max normalized per-channel scores, with
    /// a +0.1 bonus on the normalized score of context-bearing graph
    /// hits
    async fn weighted_fusion(
        &self,
        bm25_hits: &[Bm25Hit],
        vector_hits: &[VectorHit],
        graph_hits: &[GraphSearchResult],
        (bm25_weight, vector_weight, graph_weight): (f64, f64, f64),
    ) -> Vec<RetrievedChunk> {
        let mut candidates: HashMap<String, RetrievedChunk> = HashMap::new();

        let bm25_norm = min_max_normalize(&bm25_hits.iter().map(|h| h.score).collect::<Vec<_>>());
        for (hit, norm) in bm25_hits.iter().zip(bm25_norm) {
            let entry = candidates
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.chunk_id.clone(),
                    text: hit.text.clone(),
                    ..Default::default()
                });
            entry.fusion_score += norm * bm25_weight;
            entry.bm25_rank = Some(hit.rank);
            entry.bm25_score = Some(hit.score);
            entry.retrieval_sources.push("bm25".to_string());
        }

        let vector_norm = min_max_normalize(
            &vector_hits
                .iter()
                .map(|h| h.distance as f64)
                .collect::<Vec<_>>(),
        );
        for (rank0, (hit, norm)) in vector_hits.iter().zip(vector_norm).enumerate() {
            let Some(text) = self.resolve_chunk_text(&hit.chunk_id).await else {
                warn!("Vector hit references unknown chunk {}, skipping", hit.chunk_id);
                continue;
            };
            let entry = candidates
                .entry(hit.chunk_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.chunk_id.clone(),
                    text,
                    ..Default::default()
                });
            entry.fusion_score += norm * vector_weight;
            entry.vector_rank = Some(rank0 + 1);
            entry.vector_score = Some(hit.distance as f64);
            entry.doc_id = Some(hit.doc_id.clone());
            entry.retrieval_sources.push("vector".to_string());
        }

        let graph_norm =
            min_max_normalize(&graph_hits.iter().map(|h| h.score).collect::<Vec<_>>());
        for (rank0, (hit, norm)) in graph_hits.iter().zip(graph_norm).enumerate() {
            let bonus = if hit.text.is_empty() {
                0.0
            } else {
                GRAPH_CONTEXT_WEIGHTED_BONUS
            };
            let entry = candidates
                .entry(hit.entity_id.clone())
                .or_insert_with(|| RetrievedChunk {
                    chunk_id: hit.entity_id.clone(),
                    text: hit.text.clone(),
                    ..Default::default()
                });
            entry.fusion_score += (norm + bonus) * graph_weight;
            entry.graph_rank = Some(rank0 + 1);
            entry.graph_score = Some(hit.score);
            if !hit.text.is_empty() {
                entry.graph_context = Some(hit.text.clone());
            }
            entry.retrieval_sources.push("graph".to_string());
        }

        sort_candidates(candidates)
    }

    async fn resolve_chunk_text(&self, chunk_id: &str) -> Option<String> {
        let index = self.bm25.read().await;
        index.get_text(chunk_id).map(|t| t.to_string())
    }

    /// Score each (query, text) pair with the cross-encoder and re-sort;
    /// fusion metadata stays on every candidate for observability
    async fn apply_rerank(
        &self,
        query: &str,
        reranker: &dyn Reranker,
        candidates: &mut Vec<RetrievedChunk>,
    ) {
        if candidates.is_empty() {
            return;
        }
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        match reranker.score(query, &texts).await {
            Ok(scores) => {
                for (candidate, score) in candidates.iter_mut().zip(scores) {
                    candidate.rerank_score = Some(score);
                }
                candidates.sort_by(|a, b| {
                    let sa = a.rerank_score.unwrap_or(f32::MIN);
                    let sb = b.rerank_score.unwrap_or(f32::MIN);
                    sb.partial_cmp(&sa)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| tie_break(a, b))
                });
            }
            Err(e) => {
                warn!("Rerank failed, keeping fusion order: {}", e);
            }
        }
    }

    /// Rendered graph context for prompt assembly: the global summary
    /// plus up to five per-result contexts
    pub fn graph_context_for_prompt(results: &[RetrievedChunk]) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(global) = results.iter().find_map(|r| r.global_graph_context.clone()) {
            parts.push(global);
        }
        for result in results.iter().take(5) {
            if let Some(context) = &result.graph_context {
                parts.push(context.clone());
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// Deterministic ordering: fusion score desc, then vector score desc,
/// then chunk id asc
fn tie_break(a: &RetrievedChunk, b: &RetrievedChunk) -> std::cmp::Ordering {
    let va = a.vector_score.unwrap_or(f64::MIN);
    let vb = b.vector_score.unwrap_or(f64::MIN);
    vb.partial_cmp(&va)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

fn sort_candidates(candidates: HashMap<String, RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut list: Vec<RetrievedChunk> = candidates
        .into_values()
        .map(|mut c| {
            c.retrieval_sources.dedup();
            c
        })
        .collect();
    list.sort_by(|a, b| {
        b.fusion_score
            .partial_cmp(&a.fusion_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| tie_break(a, b))
    });
    for (i, candidate) in list.iter_mut().enumerate() {
        candidate.fusion_rank = i + 1;
    }
    list
}

fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// Attach per-result graph context to fused documents that mention a
/// graph entity (or one of its relation targets), and a global summary
/// of the top entities to the first result
fn enhance_with_graph_context(results: &mut [RetrievedChunk], graph_hits: &[GraphSearchResult]) {
    let display_key = |properties: &serde_json::Value| -> Option<String> {
        for key in ["code", "grade", "value"] {
            if let Some(v) = properties.get(key).and_then(|v| v.as_str()) {
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
        None
    };

    for result in results.iter_mut() {
        if result.graph_context.is_some() {
            continue;
        }
        let mut matched: Vec<&str> = Vec::new();
        for hit in graph_hits {
            if hit.text.is_empty() {
                continue;
            }
            let mut mentions = display_key(&hit.properties)
                .map(|key| result.text.contains(&key))
                .unwrap_or(false);
            if !mentions {
                mentions = hit.relations.iter().any(|rel| {
                    display_key(&rel.target_properties)
                        .map(|key| result.text.contains(&key))
                        .unwrap_or(false)
                });
            }
            if mentions {
                matched.push(hit.text.as_str());
            }
        }
        if !matched.is_empty() {
            result.graph_context = Some(matched.into_iter().take(2).collect::<Vec<_>>().join(" "));
        }
    }

    if let Some(first) = results.first_mut() {
        if let Some(summary) = build_global_summary(graph_hits) {
            first.global_graph_context = Some(summary);
        }
    }
}

/// Aggregate the top entities by type into a one-line summary
fn build_global_summary(graph_hits: &[GraphSearchResult]) -> Option<String> {
    let mut components: Vec<String> = Vec::new();
    let mut materials: Vec<String> = Vec::new();
    let mut specs: Vec<String> = Vec::new();

    for hit in graph_hits.iter().take(5) {
        let props = &hit.properties;
        match hit.entity_type.as_str() {
            "component" => {
                if let Some(code) = props.get("code").and_then(|v| v.as_str()) {
                    components.push(code.to_string());
                }
            }
            "material" => {
                if let Some(grade) = props.get("grade").and_then(|v| v.as_str()) {
                    materials.push(grade.to_string());
                }
            }
            "specification" => {
                if let Some(code) = props.get("code").and_then(|v| v.as_str()) {
                    specs.push(code.to_string());
                }
            }
            _ => {}
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if !components.is_empty() {
        components.truncate(3);
        parts.push(format!("相关构件: {}", components.join(", ")));
    }
    if !materials.is_empty() {
        materials.truncate(3);
        parts.push(format!("相关材料: {}", materials.join(", ")));
    }
    if !specs.is_empty() {
        specs.truncate(3);
        parts.push(format!("相关规范: {}", specs.join(", ")));
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("【知识图谱摘要】{}", parts.join("; ")))
    }
}
