//! In-memory BM25 index over the active chunk corpus
//!
//! Okapi BM25 with the usual k1/b parameters. The index keeps the
//! tokenized corpus so it can be persisted to disk and reloaded with
//! identical search behavior.

use crate::analyzer::{TextAnalyzer, TokenizeMode};
use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document fed into the index: one retrievable chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Doc {
    pub id: String,
    pub text: String,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Hit {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    pub rank: usize,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct Bm25Stats {
    pub total_docs: usize,
    pub avg_doc_length: f64,
    pub min_doc_length: usize,
    pub max_doc_length: usize,
    pub k1: f64,
    pub b: f64,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    docs: Vec<Bm25Doc>,
    tokenized: Vec<Vec<String>>,
    k1: f64,
    b: f64,
}

/// Okapi BM25 index with persistence
pub struct Bm25Index {
    analyzer: Arc<TextAnalyzer>,
    k1: f64,
    b: f64,
    docs: Vec<Bm25Doc>,
    tokenized: Vec<Vec<String>>,
    doc_len: Vec<usize>,
    avgdl: f64,
    /// term -> (doc index, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    built: bool,
}

impl Bm25Index {
    /// Create an empty index with default parameters (k1 = 1.5, b = 0.75)
    pub fn new(analyzer: Arc<TextAnalyzer>) -> Self {
        Self::with_params(analyzer, 1.5, 0.75)
    }

    /// Create an empty index with explicit parameters.
    /// k1 is clamped into the recommended [1.2, 2.0] range.
    pub fn with_params(analyzer: Arc<TextAnalyzer>, k1: f64, b: f64) -> Self {
        let k1 = k1.clamp(1.2, 2.0);
        info!("BM25 index created | k1={}, b={}", k1, b);
        Self {
            analyzer,
            k1,
            b,
            docs: Vec::new(),
            tokenized: Vec::new(),
            doc_len: Vec::new(),
            avgdl: 0.0,
            postings: HashMap::new(),
            built: false,
        }
    }

    /// Build the index from a document corpus.
    ///
    /// Chunks with empty text or an empty token list are skipped with a
    /// warning; a single bad chunk never aborts the build.
    pub fn build(&mut self, documents: Vec<Bm25Doc>) {
        info!("Building BM25 index | documents: {}", documents.len());

        self.docs.clear();
        self.tokenized.clear();
        self.doc_len.clear();
        self.postings.clear();

        for (idx, doc) in documents.into_iter().enumerate() {
            if doc.text.trim().is_empty() {
                warn!("Document {} has empty text, skipping", idx);
                continue;
            }
            let tokens = self.analyzer.tokenize(&doc.text, TokenizeMode::Search);
            if tokens.is_empty() {
                warn!("Document {} produced no tokens, skipping", idx);
                continue;
            }
            self.docs.push(doc);
            self.tokenized.push(tokens);
        }

        self.rebuild_statistics();
        self.built = !self.tokenized.is_empty();

        if self.built {
            info!(
                "BM25 index built | valid documents: {} | avg tokens: {:.1}",
                self.tokenized.len(),
                self.avgdl
            );
        } else {
            warn!("No valid documents, BM25 index is empty");
        }
    }

    fn rebuild_statistics(&mut self) {
        self.doc_len = self.tokenized.iter().map(|t| t.len()).collect();
        self.avgdl = if self.doc_len.is_empty() {
            0.0
        } else {
            self.doc_len.iter().sum::<usize>() as f64 / self.doc_len.len() as f64
        };

        self.postings.clear();
        for (doc_idx, tokens) in self.tokenized.iter().enumerate() {
            let mut tf: HashMap<&String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for (token, count) in tf {
                self.postings
                    .entry(token.clone())
                    .or_default()
                    .push((doc_idx, count));
            }
        }
    }

    /// Non-negative Okapi IDF
    fn idf(&self, term: &str) -> f64 {
        let n = self.tokenized.len() as f64;
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f64;
        if df == 0.0 {
            return 0.0;
        }
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Search the corpus. An unbuilt index returns empty, not an error.
    pub fn search(&self, query: &str, top_k: usize, return_scores: bool) -> Vec<Bm25Hit> {
        if !self.built {
            warn!("BM25 index not built, returning empty results");
            return Vec::new();
        }
        if top_k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let query_tokens = self.analyzer.tokenize(query, TokenizeMode::Search);
        if query_tokens.is_empty() {
            warn!("Query produced no tokens");
            return Vec::new();
        }

        debug!("BM25 search | tokens: {} | top_k: {}", query_tokens.len(), top_k);

        let mut scores = vec![0.0f64; self.tokenized.len()];
        for term in &query_tokens {
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            if let Some(postings) = self.postings.get(term) {
                for &(doc_idx, tf) in postings {
                    let tf = tf as f64;
                    let dl = self.doc_len[doc_idx] as f64;
                    let norm = tf + self.k1 * (1.0 - self.b + self.b * dl / self.avgdl);
                    scores[doc_idx] += idf * tf * (self.k1 + 1.0) / norm;
                }
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        // Score descending, doc id ascending for determinism
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.docs[a.0].id.cmp(&self.docs[b.0].id))
        });
        ranked.truncate(top_k);

        let hits: Vec<Bm25Hit> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (doc_idx, score))| Bm25Hit {
                chunk_id: self.docs[doc_idx].id.clone(),
                text: self.docs[doc_idx].text.clone(),
                score: if return_scores { score } else { 0.0 },
                rank: i + 1,
            })
            .collect();

        debug!("BM25 search complete | results: {}", hits.len());
        hits
    }

    /// Add documents to the index.
    ///
    /// Contract-equivalent to rebuilding over the union of old and new
    /// documents.
    pub fn add_documents(&mut self, new_documents: Vec<Bm25Doc>) {
        info!("Adding {} documents to BM25 index", new_documents.len());
        let mut all = std::mem::take(&mut self.docs);
        all.extend(new_documents);
        self.build(all);
    }

    /// Remove all documents belonging to the given chunk ids
    pub fn remove_documents(&mut self, chunk_ids: &[String]) {
        let remove: std::collections::HashSet<&String> = chunk_ids.iter().collect();
        let remaining: Vec<Bm25Doc> = std::mem::take(&mut self.docs)
            .into_iter()
            .filter(|d| !remove.contains(&d.id))
            .collect();
        self.build(remaining);
    }

    /// Persist the tokenized corpus and parameters to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedIndex {
            docs: self.docs.clone(),
            tokenized: self.tokenized.clone(),
            k1: self.k1,
            b: self.b,
        };
        let data = serde_json::to_vec(&persisted)
            .map_err(|e| RetrievalError::PersistenceFailed(e.to_string()))?;
        std::fs::write(path, data)?;

        info!("BM25 index saved: {} | documents: {}", path.display(), self.docs.len());
        Ok(())
    }

    /// Load a persisted index. Reloading reproduces identical search
    /// output for the same query.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let persisted: PersistedIndex = serde_json::from_slice(&data)
            .map_err(|e| RetrievalError::PersistenceFailed(e.to_string()))?;

        self.docs = persisted.docs;
        self.tokenized = persisted.tokenized;
        self.k1 = persisted.k1.clamp(1.2, 2.0);
        self.b = persisted.b;
        self.rebuild_statistics();
        self.built = !self.tokenized.is_empty();

        info!("BM25 index loaded: {} | documents: {}", path.display(), self.docs.len());
        Ok(())
    }

    /// Index statistics
    pub fn stats(&self) -> Bm25Stats {
        Bm25Stats {
            total_docs: self.docs.len(),
            avg_doc_length: self.avgdl,
            min_doc_length: self.doc_len.iter().min().copied().unwrap_or(0),
            max_doc_length: self.doc_len.iter().max().copied().unwrap_or(0),
            k1: self.k1,
            b: self.b,
        }
    }

    /// Whether the index has been built with at least one document
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Text of a chunk in the active corpus, if indexed
    pub fn get_text(&self, chunk_id: &str) -> Option<&str> {
        self.docs
            .iter()
            .find(|d| d.id == chunk_id)
            .map(|d| d.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Bm25Doc> {
        vec![
            Bm25Doc {
                id: "c1".to_string(),
                text: "根据GB50010-2010，C30混凝土的强度等级标准值为30MPa".to_string(),
            },
            Bm25Doc {
                id: "c2".to_string(),
                text: "钢筋采用HRB400，梁柱节点应加密箍筋".to_string(),
            },
            Bm25Doc {
                id: "c3".to_string(),
                text: "合同约定工期为300天，逾期按日计罚".to_string(),
            },
        ]
    }

    fn built_index() -> Bm25Index {
        let mut index = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        index.build(corpus());
        index
    }

    #[test]
    fn test_search_ranks_relevant_chunk_first() {
        let index = built_index();
        let hits = index.search("C30 混凝土强度", 3, true);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[0].rank, 1);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_unbuilt_index_returns_empty() {
        let index = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        assert!(index.search("混凝土", 5, true).is_empty());
    }

    #[test]
    fn test_zero_score_documents_dropped() {
        let index = built_index();
        let hits = index.search("完全无关的词汇组合xyz", 5, true);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn test_bad_chunks_skipped() {
        let mut index = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        let mut docs = corpus();
        docs.push(Bm25Doc {
            id: "empty".to_string(),
            text: "   ".to_string(),
        });
        index.build(docs);
        assert_eq!(index.stats().total_docs, 3);
    }

    #[test]
    fn test_add_documents_equivalent_to_rebuild() {
        let mut incremental = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        let mut docs = corpus();
        let extra = Bm25Doc {
            id: "c4".to_string(),
            text: "楼板厚度120mm，配筋双层双向".to_string(),
        };
        incremental.build(docs.clone());
        incremental.add_documents(vec![extra.clone()]);

        docs.push(extra);
        let mut rebuilt = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        rebuilt.build(docs);

        let a = incremental.search("楼板 厚度", 5, true);
        let b = rebuilt.search("楼板 厚度", 5, true);
        assert_eq!(
            a.iter().map(|h| &h.chunk_id).collect::<Vec<_>>(),
            b.iter().map(|h| &h.chunk_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25.json");

        let index = built_index();
        let before = index.search("C30 混凝土", 3, true);
        index.save(&path).unwrap();

        let mut reloaded = Bm25Index::new(Arc::new(TextAnalyzer::new()));
        reloaded.load(&path).unwrap();
        let after = reloaded.search("C30 混凝土", 3, true);

        assert_eq!(before.len(), after.len());
        for (x, y) in before.iter().zip(after.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert!((x.score - y.score).abs() < 1e-9);
        }
    }

    #[test]
    fn test_k1_clamped_to_recommended_range() {
        let index = Bm25Index::with_params(Arc::new(TextAnalyzer::new()), 5.0, 0.75);
        assert_eq!(index.stats().k1, 2.0);
    }

    #[test]
    fn test_top_k_zero_returns_empty() {
        let index = built_index();
        assert!(index.search("混凝土", 0, true).is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            /// Two successive build+search runs over the same corpus
            /// produce identical ranked lists.
            #[test]
            fn search_is_deterministic(texts in proptest::collection::vec("[a-z混凝土强度梁柱 ]{1,40}", 1..8)) {
                let docs: Vec<Bm25Doc> = texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| Bm25Doc { id: format!("d{}", i), text: t.clone() })
                    .collect();

                let mut first = Bm25Index::new(Arc::new(TextAnalyzer::new()));
                first.build(docs.clone());
                let mut second = Bm25Index::new(Arc::new(TextAnalyzer::new()));
                second.build(docs);

                let a = first.search("混凝土 强度", 10, true);
                let b = second.search("混凝土 强度", 10, true);

                prop_assert_eq!(a.len(), b.len());
                for (x, y) in a.iter().zip(b.iter()) {
                    prop_assert_eq!(&x.chunk_id, &y.chunk_id);
                    prop_assert!((x.score - y.score).abs() < 1e-12);
                }
            }
        }
    }
}
