//! Knowledge-graph retrieval channel
//!
//! Links entities out of the query text with the same pattern set the
//! drawing extractor uses, looks them up in the graph store, expands
//! their relations, and renders a natural-language context per hit. If
//! the graph store is unreachable this channel degrades to empty
//! results so the hybrid retriever can fall back to BM25 + vector.

use crate::drawing::patterns;
use crate::error::Result;
use crate::graph::client::GraphClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entity candidate linked from the query text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkedEntity {
    pub value: String,
    pub entity_type: String,
    pub field: String,
    pub source: String,
}

/// One relation out of a matched entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub rel_type: String,
    pub target_id: String,
    pub target_properties: Value,
}

/// A related entity one hop away
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub id: String,
    pub rel_type: String,
    pub properties: Value,
}

/// One graph retrieval hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub entity_id: String,
    pub entity_type: String,
    pub properties: Value,
    pub relations: Vec<EntityRelation>,
    pub related_entities: Vec<RelatedEntity>,
    /// Rendered natural-language context
    pub text: String,
    pub score: f64,
    pub source: String,
}

/// Subgraph around one entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySubgraph {
    pub center: Option<Value>,
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
}

/// Keyword table: domain vocabulary to entity type
const KEYWORD_TABLE: &[(&str, &str)] = &[
    ("构件", "component"),
    ("梁", "component"),
    ("柱", "component"),
    ("板", "component"),
    ("墙", "component"),
    ("基础", "component"),
    ("材料", "material"),
    ("混凝土", "material"),
    ("钢筋", "material"),
    ("钢材", "material"),
    ("规范", "specification"),
    ("标准", "specification"),
    ("尺寸", "dimension"),
    ("截面", "dimension"),
    ("厚度", "dimension"),
    ("跨度", "dimension"),
];

/// Configuration for graph retrieval
#[derive(Debug, Clone)]
pub struct GraphRetrieverConfig {
    pub max_entities: usize,
    pub relation_depth: usize,
    /// Fan-out cap per expansion level
    pub max_relations_per_level: usize,
    pub max_related_entities: usize,
    pub include_related_docs: bool,
    /// Character budget for rendered context
    pub context_char_budget: usize,
}

impl Default for GraphRetrieverConfig {
    fn default() -> Self {
        Self {
            max_entities: 5,
            relation_depth: 2,
            max_relations_per_level: 20,
            max_related_entities: 5,
            include_related_docs: true,
            context_char_budget: 1200,
        }
    }
}

/// Graph retrieval channel
pub struct GraphRetriever {
    client: Arc<dyn GraphClient>,
    config: GraphRetrieverConfig,
}

impl GraphRetriever {
    pub fn new(client: Arc<dyn GraphClient>, config: GraphRetrieverConfig) -> Self {
        Self { client, config }
    }

    /// Whether the graph store answers at all
    pub async fn is_available(&self) -> bool {
        self.client.verify_connectivity().await.is_ok()
    }

    /// Retrieve up to `top_k` graph-sourced results for a query.
    /// Never errors: an unreachable store yields an empty list.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Vec<GraphSearchResult> {
        if top_k == 0 {
            return Vec::new();
        }

        let linked = self.link_entities(query);
        if linked.is_empty() {
            debug!("No entities linked from query");
            return Vec::new();
        }
        debug!("Linked {} entity candidates from query", linked.len());

        let matched = match self.lookup_entities(&linked, doc_id).await {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Graph store unavailable, skipping graph channel: {}", e);
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for (entity_id, entity_type, properties, score) in matched.into_iter().take(top_k) {
            let relations = self
                .expand_relations(&entity_id, self.config.relation_depth)
                .await
                .unwrap_or_default();
            let related = self
                .related_entities(&entity_id)
                .await
                .unwrap_or_default();

            let text = self.render_context(&entity_type, &properties, &relations, &related);
            results.push(GraphSearchResult {
                entity_id,
                entity_type,
                properties,
                relations,
                related_entities: related,
                text,
                score,
                source: "graph".to_string(),
            });
        }

        if self.config.include_related_docs && !results.is_empty() {
            if let Ok(docs) = self.related_documents(&results, top_k).await {
                for doc in docs {
                    if results.len() >= top_k {
                        break;
                    }
                    results.push(doc);
                }
            }
        }

        info!("Graph retrieval complete | results: {}", results.len());
        results.truncate(top_k);
        results
    }

    /// Entity linking: pattern set shared with the drawing extractor
    /// plus the domain keyword table, deduped by (type, value) and
    /// capped at `max_entities`
    pub fn link_entities(&self, query: &str) -> Vec<LinkedEntity> {
        let mut entities = Vec::new();

        for (pattern, _) in patterns::component_patterns() {
            for m in pattern.find_iter(query) {
                entities.push(LinkedEntity {
                    value: m.as_str().to_uppercase().replace(' ', ""),
                    entity_type: "component".to_string(),
                    field: "code".to_string(),
                    source: "pattern".to_string(),
                });
            }
        }
        for pattern in patterns::spec_patterns() {
            for m in pattern.find_iter(query) {
                entities.push(LinkedEntity {
                    value: m.as_str().replace(' ', ""),
                    entity_type: "specification".to_string(),
                    field: "code".to_string(),
                    source: "pattern".to_string(),
                });
            }
        }
        for (pattern, _) in patterns::material_patterns() {
            for m in pattern.find_iter(query) {
                entities.push(LinkedEntity {
                    value: m.as_str().to_uppercase(),
                    entity_type: "material".to_string(),
                    field: "grade".to_string(),
                    source: "pattern".to_string(),
                });
            }
        }
        for (keyword, entity_type) in KEYWORD_TABLE {
            if query.contains(keyword) {
                entities.push(LinkedEntity {
                    value: keyword.to_string(),
                    entity_type: entity_type.to_string(),
                    field: "keyword".to_string(),
                    source: "keyword".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        entities.retain(|e| seen.insert((e.entity_type.clone(), e.value.clone())));
        entities.truncate(self.config.max_entities);
        entities
    }

    /// Look linked candidates up in the store. Exact code/grade matches
    /// rank 0.9; keyword matches 0.7.
    async fn lookup_entities(
        &self,
        linked: &[LinkedEntity],
        doc_id: Option<&str>,
    ) -> Result<Vec<(String, String, Value, f64)>> {
        let mut matched = Vec::new();

        for entity in linked {
            let label = match entity.entity_type.as_str() {
                "component" => "Component",
                "material" => "Material",
                "specification" => "Specification",
                "dimension" => "Dimension",
                _ => continue,
            };

            let (cypher, params) = match entity.field.as_str() {
                "code" | "grade" => {
                    let field = &entity.field;
                    let cypher = format!(
                        "MATCH (n:{label}) \
                         WHERE toLower(n.{field}) = toLower($value) \
                         {doc_filter} \
                         RETURN n LIMIT $limit",
                        label = label,
                        field = field,
                        doc_filter = if doc_id.is_some() {
                            "AND n.doc_id = $doc_id"
                        } else {
                            ""
                        },
                    );
                    (
                        cypher,
                        json!({
                            "value": entity.value,
                            "doc_id": doc_id,
                            "limit": self.config.max_entities,
                        }),
                    )
                }
                _ => {
                    let cypher = format!(
                        "MATCH (n:{label}) \
                         WHERE any(key IN keys(n) WHERE toLower(toString(n[key])) CONTAINS toLower($value)) \
                         {doc_filter} \
                         RETURN n LIMIT $limit",
                        label = label,
                        doc_filter = if doc_id.is_some() {
                            "AND n.doc_id = $doc_id"
                        } else {
                            ""
                        },
                    );
                    (
                        cypher,
                        json!({
                            "value": entity.value,
                            "doc_id": doc_id,
                            "limit": self.config.max_entities,
                        }),
                    )
                }
            };

            let rows = self.client.execute_query(&cypher, params).await?;
            let score = if entity.field == "code" || entity.field == "grade" {
                0.9
            } else {
                0.7
            };
            for mut row in rows {
                if let Some(node) = row.remove("n") {
                    let id = node
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    if !id.is_empty() {
                        matched.push((id, entity.entity_type.clone(), node, score));
                    }
                }
            }
        }

        matched.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let mut seen = HashSet::new();
        matched.retain(|(id, _, _, _)| seen.insert(id.clone()));
        Ok(matched)
    }

    /// Outgoing edges up to `depth`, fan-out capped per level
    async fn expand_relations(&self, entity_id: &str, depth: usize) -> Result<Vec<EntityRelation>> {
        let rows = self
            .client
            .execute_query(
                "MATCH (n {id: $id})-[r]->(m) \
                 RETURN type(r) AS rel_type, m AS target LIMIT $limit",
                json!({ "id": entity_id, "limit": self.config.max_relations_per_level }),
            )
            .await?;

        let mut relations = Vec::new();
        for mut row in rows {
            let rel_type = row
                .get("rel_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let target = row.remove("target").unwrap_or(Value::Null);
            let target_id = target
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            relations.push(EntityRelation {
                rel_type,
                target_id,
                target_properties: target,
            });
        }

        // One recursion level per configured depth; the per-level cap
        // keeps the fan-out bounded
        if depth > 1 {
            let next_ids: Vec<String> = relations
                .iter()
                .take(5)
                .map(|r| r.target_id.clone())
                .filter(|id| !id.is_empty())
                .collect();
            for id in next_ids {
                if let Ok(mut sub) = Box::pin(self.expand_relations(&id, depth - 1)).await {
                    relations.append(&mut sub);
                }
            }
        }

        Ok(relations)
    }

    async fn related_entities(&self, entity_id: &str) -> Result<Vec<RelatedEntity>> {
        let rows = self
            .client
            .execute_query(
                "MATCH (n {id: $id})-[r]-(m) \
                 RETURN DISTINCT m AS related, type(r) AS rel_type LIMIT $limit",
                json!({ "id": entity_id, "limit": self.config.max_related_entities }),
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let node = row.remove("related")?;
                let id = node.get("id").and_then(|v| v.as_str())?.to_string();
                let rel_type = row
                    .get("rel_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(RelatedEntity {
                    id,
                    rel_type,
                    properties: node,
                })
            })
            .collect())
    }

    /// Documents the matched entities belong to, ordered by how many
    /// entities point at them
    async fn related_documents(
        &self,
        results: &[GraphSearchResult],
        limit: usize,
    ) -> Result<Vec<GraphSearchResult>> {
        let entity_ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
        let rows = self
            .client
            .execute_query(
                "MATCH (n)-[:BELONGS_TO]->(d:Document) \
                 WHERE n.id IN $entity_ids \
                 RETURN DISTINCT d AS document, count(n) AS relevance \
                 ORDER BY relevance DESC LIMIT $limit",
                json!({ "entity_ids": entity_ids, "limit": limit }),
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let doc = row.remove("document")?;
                let id = doc.get("id").and_then(|v| v.as_str())?.to_string();
                let name = doc
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(GraphSearchResult {
                    entity_id: id,
                    entity_type: "document".to_string(),
                    text: format!("文档《{}》包含相关构件信息。", name),
                    properties: doc,
                    relations: Vec::new(),
                    related_entities: Vec::new(),
                    score: 0.6,
                    source: "graph_document".to_string(),
                })
            })
            .collect())
    }

    /// Render one entity and its relations as natural language, using a
    /// fixed template per variant
    fn render_context(
        &self,
        entity_type: &str,
        properties: &Value,
        relations: &[EntityRelation],
        related: &[RelatedEntity],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        let prop = |v: &Value, key: &str| -> String {
            v.get(key)
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string()
        };

        match entity_type {
            "component" => {
                let code = prop(properties, "code");
                let component_type_raw = prop(properties, "component_type");
                let comp_type = component_type_zh(&component_type_raw);
                parts.push(format!("【构件信息】{} 是一个{}构件。", code, comp_type));
            }
            "material" => {
                let grade = prop(properties, "grade");
                let material_type_raw = prop(properties, "material_type");
                let mat_type = material_type_zh(&material_type_raw);
                parts.push(format!("【材料信息】{} 是{}材料。", grade, mat_type));
            }
            "specification" => {
                let code = prop(properties, "code");
                parts.push(format!("【规范信息】{}。", code));
            }
            "dimension" => {
                let value = prop(properties, "value");
                let unit = prop(properties, "unit");
                parts.push(format!("【尺寸信息】{}{}。", value, unit));
            }
            _ => {}
        }

        let mut rel_parts: Vec<String> = Vec::new();
        for rel in relations.iter().take(5) {
            let target = &rel.target_properties;
            match rel.rel_type.as_str() {
                "USES_MATERIAL" => {
                    rel_parts.push(format!("使用材料 {}", prop(target, "grade")));
                }
                "HAS_DIMENSION" => {
                    let dim_type_raw = prop(target, "dim_type");
                    let dim_type = dimension_type_zh(&dim_type_raw);
                    rel_parts.push(format!(
                        "{}为 {}{}",
                        dim_type,
                        prop(target, "value"),
                        prop(target, "unit")
                    ));
                }
                "REFERS_TO" => {
                    rel_parts.push(format!("引用规范 {}", prop(target, "code")));
                }
                "CONNECTED_TO" => {
                    rel_parts.push(format!("连接构件 {}", prop(target, "code")));
                }
                _ => {}
            }
        }
        if !rel_parts.is_empty() {
            parts.push(format!("【关联关系】{}。", rel_parts.join("; ")));
        }

        let mut related_parts: Vec<String> = Vec::new();
        for entity in related.iter().take(3) {
            let code = prop(&entity.properties, "code");
            let grade = prop(&entity.properties, "grade");
            if !code.is_empty() {
                related_parts.push(format!("构件 {}", code));
            } else if !grade.is_empty() {
                related_parts.push(format!("材料 {}", grade));
            }
        }
        if !related_parts.is_empty() {
            parts.push(format!("【关联项】{}。", related_parts.join(", ")));
        }

        let mut text = parts.join(" ");
        if text.chars().count() > self.config.context_char_budget {
            text = text.chars().take(self.config.context_char_budget).collect();
        }
        text
    }

    /// Local subgraph around one entity
    pub async fn get_entity_subgraph(
        &self,
        entity_id: &str,
        depth: usize,
        max_nodes: usize,
    ) -> Result<EntitySubgraph> {
        let cypher = format!(
            "MATCH path = (n {{id: $id}})-[*1..{depth}]-(m) \
             WITH n, collect(DISTINCT m)[0..{max_nodes}] AS neighbors, \
                  [rel IN relationships(path) | {{from: startNode(rel).id, to: endNode(rel).id, type: type(rel)}}] AS edges \
             RETURN n AS center, neighbors, edges",
            depth = depth,
            max_nodes = max_nodes,
        );
        let rows = self
            .client
            .execute_query(&cypher, json!({ "id": entity_id }))
            .await?;

        let Some(mut row) = rows.into_iter().next() else {
            return Ok(EntitySubgraph::default());
        };
        let as_list = |v: Option<Value>| match v {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        Ok(EntitySubgraph {
            center: row.remove("center"),
            nodes: as_list(row.remove("neighbors")),
            edges: as_list(row.remove("edges")),
        })
    }

    /// Shortest paths between two entities
    pub async fn find_path(
        &self,
        from_entity_id: &str,
        to_entity_id: &str,
        max_depth: usize,
    ) -> Result<Vec<Value>> {
        let cypher = format!(
            "MATCH path = shortestPath((a {{id: $from_id}})-[*1..{}]-(b {{id: $to_id}})) \
             RETURN [n IN nodes(path) | n.id] AS node_ids, \
                    [r IN relationships(path) | type(r)] AS rel_types \
             LIMIT 3",
            max_depth
        );
        let rows = self
            .client
            .execute_query(
                &cypher,
                json!({ "from_id": from_entity_id, "to_id": to_entity_id }),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| serde_json::to_value(row).unwrap_or(Value::Null))
            .collect())
    }
}

fn component_type_zh(t: &str) -> &str {
    match t {
        "beam" => "梁",
        "column" => "柱",
        "slab" => "板",
        "wall" => "墙",
        "foundation" => "基础",
        _ => "构件",
    }
}

fn material_type_zh(t: &str) -> &str {
    match t {
        "concrete" => "混凝土",
        "rebar" => "钢筋",
        "steel" => "钢材",
        _ => "工程",
    }
}

fn dimension_type_zh(t: &str) -> &str {
    match t {
        "section" => "截面",
        "thickness" => "厚度",
        "height" => "高度",
        "width" => "宽度",
        "span" => "跨度",
        "spacing" => "间距",
        _ => "尺寸",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use async_trait::async_trait;

    /// Client that always fails, for the degradation contract
    struct DownGraphClient;

    #[async_trait]
    impl GraphClient for DownGraphClient {
        async fn execute_query(
            &self,
            _cypher: &str,
            _params: Value,
        ) -> Result<Vec<crate::graph::client::Row>> {
            Err(GraphError::Unavailable("connection refused".to_string()).into())
        }

        async fn execute_write(
            &self,
            _cypher: &str,
            _params: Value,
        ) -> Result<crate::graph::client::WriteSummary> {
            Err(GraphError::Unavailable("connection refused".to_string()).into())
        }

        async fn verify_connectivity(&self) -> Result<()> {
            Err(GraphError::Unavailable("connection refused".to_string()).into())
        }
    }

    fn retriever(client: Arc<dyn GraphClient>) -> GraphRetriever {
        GraphRetriever::new(client, GraphRetrieverConfig::default())
    }

    #[test]
    fn test_entity_linking_patterns_and_keywords() {
        let retriever = retriever(Arc::new(DownGraphClient));
        let linked = retriever.link_entities("KL-1梁使用C30混凝土，依据GB50010-2010");

        let values: Vec<&str> = linked.iter().map(|e| e.value.as_str()).collect();
        assert!(values.contains(&"KL-1"));
        assert!(values.contains(&"C30"));
        assert!(values.contains(&"GB50010-2010"));

        // Deduped by (type, value) and capped
        assert!(linked.len() <= 5);
        let mut seen = HashSet::new();
        for e in &linked {
            assert!(seen.insert((e.entity_type.clone(), e.value.clone())));
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_yields_empty_not_error() {
        let retriever = retriever(Arc::new(DownGraphClient));
        let results = retriever.search("KL-1 的材料", 5, None).await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_context_rendering_templates() {
        let retriever = retriever(Arc::new(DownGraphClient));
        let properties = json!({
            "code": "KL-1",
            "component_type": "beam",
        });
        let relations = vec![
            EntityRelation {
                rel_type: "USES_MATERIAL".to_string(),
                target_id: "m1".to_string(),
                target_properties: json!({"grade": "C30"}),
            },
            EntityRelation {
                rel_type: "HAS_DIMENSION".to_string(),
                target_id: "d1".to_string(),
                target_properties: json!({"dim_type": "section", "value": "300x500", "unit": "mm"}),
            },
        ];
        let text = retriever.render_context("component", &properties, &relations, &[]);

        assert!(text.contains("KL-1"));
        assert!(text.contains("梁"));
        assert!(text.contains("使用材料 C30"));
        assert!(text.contains("截面为 300x500mm"));
    }

    #[test]
    fn test_context_respects_char_budget() {
        let config = GraphRetrieverConfig {
            context_char_budget: 10,
            ..Default::default()
        };
        let retriever = GraphRetriever::new(Arc::new(DownGraphClient), config);
        let text = retriever.render_context(
            "component",
            &json!({"code": "KL-1", "component_type": "beam"}),
            &[],
            &[],
        );
        assert!(text.chars().count() <= 10);
    }

    #[tokio::test]
    async fn test_top_k_zero() {
        let retriever = retriever(Arc::new(DownGraphClient));
        assert!(retriever.search("KL-1", 0, None).await.is_empty());
    }

    /// Client returning one canned subgraph row
    struct CannedSubgraphClient;

    #[async_trait]
    impl GraphClient for CannedSubgraphClient {
        async fn execute_query(
            &self,
            _cypher: &str,
            _params: Value,
        ) -> Result<Vec<crate::graph::client::Row>> {
            let mut row = crate::graph::client::Row::new();
            row.insert("center".to_string(), json!({"id": "d1#comp:KL-1"}));
            row.insert("neighbors".to_string(), json!([{"id": "d1#mat:C30"}]));
            row.insert(
                "edges".to_string(),
                json!([{"from": "d1#comp:KL-1", "to": "d1#mat:C30", "type": "USES_MATERIAL"}]),
            );
            Ok(vec![row])
        }

        async fn execute_write(
            &self,
            _cypher: &str,
            _params: Value,
        ) -> Result<crate::graph::client::WriteSummary> {
            Ok(Default::default())
        }

        async fn verify_connectivity(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_entity_subgraph_parsing() {
        let retriever = retriever(Arc::new(CannedSubgraphClient));
        let subgraph = retriever
            .get_entity_subgraph("d1#comp:KL-1", 2, 50)
            .await
            .unwrap();

        assert_eq!(subgraph.center.unwrap()["id"], "d1#comp:KL-1");
        assert_eq!(subgraph.nodes.len(), 1);
        assert_eq!(subgraph.edges[0]["type"], "USES_MATERIAL");
    }
}
