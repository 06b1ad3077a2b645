//! End-to-end question answering pipeline
//!
//! Preprocess → cache lookup → hybrid retrieval → prompt assembly with
//! graph context → LLM generation → cache store. Safe for concurrent
//! callers; distinct queries share no mutable state beyond the
//! best-effort cache.

use crate::cache::{CacheStore, CachedAnswer};
use crate::error::{EngineError, Result};
use crate::llm::{system_message, user_message, LlmClient};
use crate::retrieval::hybrid::{HybridRetriever, RetrievedChunk, SearchOptions};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Character budget for the graph-knowledge preamble
const GRAPH_PREAMBLE_BUDGET: usize = 500;
/// Character cap on each returned source text
const SOURCE_TEXT_BUDGET: usize = 500;

const SYSTEM_PROMPT_ZH: &str = "你是一个专业的建设工程知识问答助手。请基于提供的参考资料准确回答用户问题。\n\
回答要求：\n\
1. 必须基于参考资料回答，不要编造信息\n\
2. 如果参考资料不足以回答问题，请明确说明\n\
3. 引用具体内容时，标注来源\n\
4. 回答要准确、专业、易懂";

const SYSTEM_PROMPT_EN: &str = "You are a professional construction knowledge assistant. \
Answer questions accurately based on the provided references. \
Do not fabricate; state clearly when the references are insufficient; cite sources.";

const NO_RESULT_ZH: &str =
    "抱歉，未能在知识库中找到与您问题相关的内容。请尝试换一种问法，或确认问题是否在知识库覆盖范围内。";
const NO_RESULT_EN: &str =
    "Sorry, no relevant content was found in the knowledge base. Please try rephrasing your question.";

const LLM_DOWN_ZH: &str = "抱歉，系统暂时无法生成答案，请稍后重试。";
const LLM_DOWN_EN: &str =
    "Sorry, the system is temporarily unable to generate an answer. Please try again later.";

/// Per-request options for [`RagPipeline::ask`]
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub top_k: usize,
    pub project_id: Option<String>,
    pub extra_context: Option<String>,
    pub use_rerank: bool,
    /// `None` keeps the configured default
    pub use_graph: Option<bool>,
    pub skip_cache: bool,
    /// User attribution for search history, when known
    pub user_id: Option<String>,
    /// Request-scoped deadline propagated from the caller. On expiry
    /// in-flight retrieval is abandoned and the call returns a
    /// cancellation error; no cache write happens.
    pub deadline: Option<std::time::Duration>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            project_id: None,
            extra_context: None,
            use_rerank: true,
            use_graph: None,
            skip_cache: false,
            user_id: None,
            deadline: None,
        }
    }
}

/// One cited source in the answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSource {
    pub chunk_id: String,
    pub doc_id: Option<String>,
    pub text: String,
    pub score: f64,
    pub retrieval_sources: Vec<String>,
}

/// Answer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaMetadata {
    pub retrieval_count: usize,
    pub response_time_ms: u64,
    pub model: String,
    pub timestamp: String,
    pub graph_enhanced: bool,
    #[serde(default)]
    pub no_result: bool,
}

/// Full question-answering response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResponse {
    pub answer: String,
    pub sources: Vec<QaSource>,
    pub query: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_context: Option<String>,
    pub metadata: QaMetadata,
}

/// The RAG pipeline
pub struct RagPipeline {
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn LlmClient>,
    cache: Option<Arc<dyn CacheStore>>,
    /// Configured default for graph-enhanced retrieval
    enable_graph: bool,
    max_context_length: usize,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        llm: Arc<dyn LlmClient>,
        cache: Option<Arc<dyn CacheStore>>,
        enable_graph: bool,
        max_context_length: usize,
    ) -> Self {
        info!(
            "RAG pipeline | cache: {} | graph: {}",
            cache.is_some(),
            enable_graph
        );
        Self {
            retriever,
            llm,
            cache,
            enable_graph,
            max_context_length,
        }
    }

    /// Answer a question over the indexed corpus.
    ///
    /// When the options carry a deadline, the whole pipeline runs
    /// under it: on expiry in-flight work is dropped and a
    /// cancellation error is returned.
    pub async fn ask(&self, query: &str, options: &AskOptions) -> Result<QaResponse> {
        match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.ask_inner(query, options))
                .await
                .map_err(|_| {
                    EngineError::Cancelled("request deadline exceeded".to_string())
                })?,
            None => self.ask_inner(query, options).await,
        }
    }

    async fn ask_inner(&self, query: &str, options: &AskOptions) -> Result<QaResponse> {
        let started = Instant::now();

        // Preprocess: trim and collapse whitespace
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Err(EngineError::InvalidInput("query must not be empty".to_string()));
        }
        let language = detect_language(&normalized);

        info!("RAG ask | query: {:.50} | top_k: {}", normalized, options.top_k);

        // Best-effort usage statistics
        if let Some(cache) = &self.cache {
            cache.increment_hot_query(&normalized).await;
            if let Some(user_id) = &options.user_id {
                cache.add_search_history(user_id, &normalized).await;
            }
        }

        // Cache check
        if !options.skip_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get_cached_query_result(&normalized).await {
                    debug!("Query cache hit, returning cached answer");
                    let sources = serde_json::from_value(hit.sources).unwrap_or_default();
                    return Ok(QaResponse {
                        answer: hit.answer,
                        sources,
                        query: normalized,
                        cached: true,
                        graph_context: None,
                        metadata: QaMetadata {
                            retrieval_count: 0,
                            response_time_ms: elapsed_ms(started),
                            model: self.llm.model().to_string(),
                            timestamp: Utc::now().to_rfc3339(),
                            graph_enhanced: false,
                            no_result: false,
                        },
                    });
                }
            }
        }

        // Retrieval
        let use_graph = options.use_graph.unwrap_or(self.enable_graph);
        let search_options = SearchOptions {
            top_k: options.top_k,
            filter: options
                .project_id
                .as_ref()
                .map(|id| format!("project_id == '{}'", id)),
            doc_id: options.project_id.clone(),
            use_rerank: options.use_rerank,
            enhance_with_graph: use_graph,
            ..Default::default()
        };
        let retrieved = self.retriever.search(&normalized, &search_options).await;

        // No-result branch: no retrieval means no LLM call
        if retrieved.is_empty() {
            warn!("Retrieval returned nothing, answering with fallback");
            return Ok(self.no_result_response(&normalized, language, started));
        }

        let graph_context = HybridRetriever::graph_context_for_prompt(&retrieved);

        // Prompt assembly and generation
        let prompt = self.build_prompt(
            &normalized,
            &retrieved,
            graph_context.as_deref(),
            options.extra_context.as_deref(),
            language,
        );
        let messages = vec![
            system_message(match language {
                Language::Zh => SYSTEM_PROMPT_ZH,
                Language::En => SYSTEM_PROMPT_EN,
            }),
            user_message(prompt),
        ];

        let (answer, generation_ok) = match self.llm.generate(&messages).await {
            Ok(response) => (response.text, true),
            Err(e) => {
                warn!("LLM generation failed after retries: {}", e);
                let fallback = match language {
                    Language::Zh => LLM_DOWN_ZH,
                    Language::En => LLM_DOWN_EN,
                };
                (fallback.to_string(), false)
            }
        };

        let sources: Vec<QaSource> = retrieved.iter().map(to_source).collect();
        let response = QaResponse {
            answer,
            sources,
            query: normalized.clone(),
            cached: false,
            graph_context: graph_context
                .map(|c| truncate_chars(&c, GRAPH_PREAMBLE_BUDGET)),
            metadata: QaMetadata {
                retrieval_count: retrieved.len(),
                response_time_ms: elapsed_ms(started),
                model: self.llm.model().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                graph_enhanced: use_graph,
                no_result: false,
            },
        };

        // Cache only real answers
        if generation_ok {
            if let Some(cache) = &self.cache {
                let cached = CachedAnswer {
                    answer: response.answer.clone(),
                    sources: serde_json::to_value(&response.sources).unwrap_or_default(),
                };
                cache.cache_query_result(&normalized, &cached, None).await;
            }
        }

        info!(
            "RAG ask complete | sources: {} | {}ms",
            response.sources.len(),
            response.metadata.response_time_ms
        );
        Ok(response)
    }

    fn no_result_response(
        &self,
        query: &str,
        language: Language,
        started: Instant,
    ) -> QaResponse {
        QaResponse {
            answer: match language {
                Language::Zh => NO_RESULT_ZH,
                Language::En => NO_RESULT_EN,
            }
            .to_string(),
            sources: Vec::new(),
            query: query.to_string(),
            cached: false,
            graph_context: None,
            metadata: QaMetadata {
                retrieval_count: 0,
                response_time_ms: elapsed_ms(started),
                model: "none".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                graph_enhanced: false,
                no_result: true,
            },
        }
    }

    /// Assemble the user prompt: graph preamble, numbered contexts
    /// bounded by the character budget, the question, then any extra
    /// caller context
    fn build_prompt(
        &self,
        query: &str,
        contexts: &[RetrievedChunk],
        graph_context: Option<&str>,
        extra_context: Option<&str>,
        language: Language,
    ) -> String {
        let mut prompt = String::new();

        if let Some(graph) = graph_context {
            let header = match language {
                Language::Zh => "【知识图谱参考】\n以下是从工程知识图谱中提取的结构化信息，请优先参考：\n",
                Language::En => "[Knowledge Graph Reference]\nPrioritize this structured information:\n",
            };
            prompt.push_str(header);
            prompt.push_str(&truncate_chars(graph, GRAPH_PREAMBLE_BUDGET));
            prompt.push_str("\n---\n\n");
        }

        prompt.push_str(match language {
            Language::Zh => "参考资料：\n",
            Language::En => "References:\n",
        });

        let mut used = 0usize;
        for (i, context) in contexts.iter().enumerate() {
            let score = context
                .rerank_score
                .map(|s| s as f64)
                .unwrap_or(context.fusion_score);
            let source_label = context.retrieval_sources.join("+");
            let entry = format!(
                "[{}] (来源: {} | 相关度: {:.3})\n{}\n\n",
                i + 1,
                if source_label.is_empty() { "unknown" } else { &source_label },
                score,
                context.text
            );
            let entry_chars = entry.chars().count();
            if used + entry_chars > self.max_context_length && used > 0 {
                break;
            }
            used += entry_chars;
            prompt.push_str(&entry);
        }

        prompt.push_str(match language {
            Language::Zh => "问题：",
            Language::En => "Question: ",
        });
        prompt.push_str(query);

        if let Some(extra) = extra_context {
            prompt.push_str(match language {
                Language::Zh => "\n\n【额外信息】\n",
                Language::En => "\n\n[Additional context]\n",
            });
            prompt.push_str(extra);
        }

        prompt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Zh,
    En,
}

fn detect_language(text: &str) -> Language {
    let has_cjk = text
        .chars()
        .any(|c| matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}'));
    if has_cjk {
        Language::Zh
    } else {
        Language::En
    }
}

fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        text.to_string()
    } else {
        text.chars().take(budget).collect()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn to_source(chunk: &RetrievedChunk) -> QaSource {
    QaSource {
        chunk_id: chunk.chunk_id.clone(),
        doc_id: chunk.doc_id.clone(),
        text: truncate_chars(&chunk.text, SOURCE_TEXT_BUDGET),
        score: chunk
            .rerank_score
            .map(|s| s as f64)
            .unwrap_or(chunk.fusion_score),
        retrieval_sources: chunk.retrieval_sources.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("C30 混凝土强度"), Language::Zh);
        assert_eq!(detect_language("concrete strength"), Language::En);
    }

    #[test]
    fn test_query_normalization() {
        assert_eq!(normalize_query("  C30   强度  "), "C30 强度");
        assert_eq!(normalize_query("\t\n"), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "混凝土强度等级";
        assert_eq!(truncate_chars(text, 3), "混凝土");
        assert_eq!(truncate_chars(text, 100), text);
    }
}
