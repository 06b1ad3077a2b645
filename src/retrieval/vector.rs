//! Typed wrapper over a vector database
//!
//! The backend trait mirrors the narrow surface of the external vector
//! DB (collection lifecycle, insert, filtered ANN search, delete). The
//! client layers the three-tier hierarchical search policy and schema
//! validation on top.

use crate::config::{VectorConfig, VectorMetric};
use crate::error::{Result, RetrievalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One row per chunk per collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub doc_id: String,
    pub doc_type: String,
    pub permission_level: i64,
    pub page_num: Option<i64>,
}

/// One ANN search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub pk: i64,
    pub distance: f32,
    pub chunk_id: String,
    pub doc_id: String,
    pub doc_type: String,
    pub permission_level: i64,
    pub page_num: Option<i64>,
    /// Collection the hit came from (set by hierarchical search)
    #[serde(default)]
    pub collection: String,
}

/// Narrow interface over the external vector database
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn create_index(&self, name: &str, metric: VectorMetric) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Insert records; flushes before returning. Returned primary keys
    /// are in the same order as the input.
    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<Vec<i64>>;

    /// Filtered ANN search. The filter expression is passed through to
    /// the database verbatim.
    async fn search(
        &self,
        collection: &str,
        query_vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Vec<VectorHit>>>;

    /// Delete by filter expression, returning the number of rows removed
    async fn delete(&self, collection: &str, filter: &str) -> Result<u64>;

    async fn drop_collection(&self, name: &str) -> Result<()>;
}

/// Typed vector index client with tiered search
pub struct VectorIndexClient {
    backend: std::sync::Arc<dyn VectorBackend>,
    config: VectorConfig,
}

impl VectorIndexClient {
    pub fn new(backend: std::sync::Arc<dyn VectorBackend>, config: VectorConfig) -> Self {
        info!(
            "Vector index client | dimension: {} | tiers: {:?}",
            config.dimension, config.tier_order
        );
        Self { backend, config }
    }

    /// Create every configured tier collection and its index if missing
    pub async fn ensure_collections(&self) -> Result<()> {
        for tier in &self.config.tier_order {
            if !self.backend.has_collection(tier).await? {
                self.backend
                    .create_collection(tier, self.config.dimension)
                    .await?;
                self.backend.create_index(tier, self.config.metric).await?;
                info!("Created vector collection: {}", tier);
            }
        }
        Ok(())
    }

    fn validate_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.config.dimension {
            return Err(RetrievalError::InvalidDimension {
                expected: self.config.dimension,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Batched insert; returns primary keys in input order
    pub async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<Vec<i64>> {
        for record in records {
            self.validate_dimension(&record.embedding)?;
        }
        let pks = self.backend.insert(collection, records).await?;
        debug!("Inserted {} vectors into {}", pks.len(), collection);
        Ok(pks)
    }

    /// Single-collection filtered search
    pub async fn search(
        &self,
        collection: &str,
        query_vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Vec<VectorHit>>> {
        if top_k == 0 {
            return Ok(query_vectors.iter().map(|_| Vec::new()).collect());
        }
        for v in query_vectors {
            self.validate_dimension(v)?;
        }
        let mut per_query = self
            .backend
            .search(collection, query_vectors, top_k, filter)
            .await?;
        for hits in &mut per_query {
            for hit in hits {
                hit.collection = collection.to_string();
            }
        }
        Ok(per_query)
    }

    /// Tiered search: probe collections in the configured authority
    /// order, stop as soon as enough hits have accumulated, then sort by
    /// distance in the direction the metric implies.
    pub async fn hierarchical_search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        permission_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.validate_dimension(query_vector)?;

        let mut accumulated: Vec<VectorHit> = Vec::new();
        let query = vec![query_vector.to_vec()];

        for tier in &self.config.tier_order {
            match self.backend.has_collection(tier).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Collection missing, skipping tier: {}", tier);
                    continue;
                }
                Err(e) => {
                    warn!("Tier probe failed for {}: {}", tier, e);
                    continue;
                }
            }

            let per_query = self
                .backend
                .search(tier, &query, top_k, permission_filter)
                .await?;

            if let Some(hits) = per_query.into_iter().next() {
                for mut hit in hits {
                    hit.collection = tier.clone();
                    accumulated.push(hit);
                }
            }

            if accumulated.len() >= top_k {
                break;
            }
        }

        if self.config.metric.larger_is_closer() {
            accumulated.sort_by(|a, b| {
                b.distance
                    .partial_cmp(&a.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            accumulated.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        accumulated.truncate(top_k);
        Ok(accumulated)
    }

    /// Delete by filter expression
    pub async fn delete(&self, collection: &str, filter: &str) -> Result<u64> {
        let count = self.backend.delete(collection, filter).await?;
        info!("Deleted {} vectors from {} ({})", count, collection, filter);
        Ok(count)
    }

    pub fn metric(&self) -> VectorMetric {
        self.config.metric
    }

    pub fn tier_order(&self) -> &[String] {
        &self.config.tier_order
    }
}

/// HTTP backend for a REST-speaking vector database
pub struct HttpVectorBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct HttpInsertRequest<'a> {
    collection: &'a str,
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
struct HttpInsertResponse {
    primary_keys: Vec<i64>,
}

#[derive(Serialize)]
struct HttpSearchRequest<'a> {
    collection: &'a str,
    vectors: &'a [Vec<f32>],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
}

#[derive(Deserialize)]
struct HttpSearchResponse {
    results: Vec<Vec<VectorHit>>,
}

#[derive(Deserialize)]
struct HttpDeleteResponse {
    deleted: u64,
}

impl HttpVectorBackend {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/v1/{}", self.base_url, endpoint)
    }
}

#[async_trait]
impl VectorBackend for HttpVectorBackend {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let body = serde_json::json!({ "collection": name, "dimension": dimension });
        self.client
            .post(self.url("collections"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(())
    }

    async fn create_index(&self, name: &str, metric: VectorMetric) -> Result<()> {
        let metric_name = match metric {
            VectorMetric::Ip => "IP",
            VectorMetric::L2 => "L2",
            VectorMetric::Cosine => "COSINE",
        };
        let body = serde_json::json!({ "collection": name, "metric": metric_name });
        self.client
            .post(self.url("indexes"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.url(&format!("collections/{}", name)))
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<Vec<i64>> {
        let request = HttpInsertRequest { collection, records };
        let response: HttpInsertResponse = self
            .client
            .post(self.url("insert"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(response.primary_keys)
    }

    async fn search(
        &self,
        collection: &str,
        query_vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Vec<VectorHit>>> {
        let request = HttpSearchRequest {
            collection,
            vectors: query_vectors,
            top_k,
            filter,
        };
        let response: HttpSearchResponse = self
            .client
            .post(self.url("search"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(response.results)
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<u64> {
        let body = serde_json::json!({ "collection": collection, "filter": filter });
        let response: HttpDeleteResponse = self
            .client
            .post(self.url("delete"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(response.deleted)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("collections/{}", name)))
            .send()
            .await
            .map_err(|e| RetrievalError::VectorUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RetrievalError::SearchFailed(e.to_string()))?;
        Ok(())
    }
}

/// In-memory backend used in tests and single-node deployments
#[derive(Default)]
pub struct InMemoryVectorBackend {
    collections: RwLock<HashMap<String, CollectionState>>,
    next_pk: AtomicI64,
}

struct CollectionState {
    dimension: usize,
    metric: VectorMetric,
    rows: Vec<(i64, VectorRecord)>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_pk: AtomicI64::new(1),
        }
    }

    /// Supports the `field == 'value'` expressions our callers pass
    fn matches_filter(record: &VectorRecord, filter: &str) -> bool {
        let filter = filter.trim();
        let Some((field, value)) = filter.split_once("==") else {
            return true;
        };
        let field = field.trim();
        let value = value.trim().trim_matches('\'').trim_matches('"');
        match field {
            "doc_id" => record.doc_id == value,
            "doc_type" => record.doc_type == value,
            "chunk_id" => record.chunk_id == value,
            "permission_level" => record.permission_level.to_string() == value,
            _ => true,
        }
    }

    fn distance(metric: VectorMetric, a: &[f32], b: &[f32]) -> f32 {
        match metric {
            VectorMetric::Ip => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            VectorMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
            VectorMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.entry(name.to_string()).or_insert(CollectionState {
            dimension,
            metric: VectorMetric::Ip,
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn create_index(&self, name: &str, metric: VectorMetric) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get_mut(name) {
            Some(state) => {
                state.metric = metric;
                Ok(())
            }
            None => Err(RetrievalError::CollectionNotFound(name.to_string()).into()),
        }
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn insert(&self, collection: &str, records: &[VectorRecord]) -> Result<Vec<i64>> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| RetrievalError::CollectionNotFound(collection.to_string()))?;

        let mut pks = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != state.dimension {
                return Err(RetrievalError::InvalidDimension {
                    expected: state.dimension,
                    actual: record.embedding.len(),
                }
                .into());
            }
            let pk = self.next_pk.fetch_add(1, Ordering::SeqCst);
            state.rows.push((pk, record.clone()));
            pks.push(pk);
        }
        Ok(pks)
    }

    async fn search(
        &self,
        collection: &str,
        query_vectors: &[Vec<f32>],
        top_k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<Vec<VectorHit>>> {
        let collections = self.collections.read().await;
        let state = collections
            .get(collection)
            .ok_or_else(|| RetrievalError::CollectionNotFound(collection.to_string()))?;

        let mut results = Vec::with_capacity(query_vectors.len());
        for query in query_vectors {
            let mut hits: Vec<VectorHit> = state
                .rows
                .iter()
                .filter(|(_, r)| filter.map(|f| Self::matches_filter(r, f)).unwrap_or(true))
                .map(|(pk, r)| VectorHit {
                    pk: *pk,
                    distance: Self::distance(state.metric, query, &r.embedding),
                    chunk_id: r.chunk_id.clone(),
                    doc_id: r.doc_id.clone(),
                    doc_type: r.doc_type.clone(),
                    permission_level: r.permission_level,
                    page_num: r.page_num,
                    collection: collection.to_string(),
                })
                .collect();

            if state.metric.larger_is_closer() {
                hits.sort_by(|a, b| {
                    b.distance
                        .partial_cmp(&a.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            } else {
                hits.sort_by(|a, b| {
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            hits.truncate(top_k);
            results.push(hits);
        }
        Ok(results)
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| RetrievalError::CollectionNotFound(collection.to_string()))?;
        let before = state.rows.len();
        state.rows.retain(|(_, r)| !Self::matches_filter(r, filter));
        Ok((before - state.rows.len()) as u64)
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }
}
