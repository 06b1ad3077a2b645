//! Domain repository over the property-graph client
//!
//! Owns the Cypher for the construction knowledge graph: Document,
//! Component, Material, Specification and Dimension nodes plus the
//! BELONGS_TO / USES_MATERIAL / HAS_DIMENSION / REFERS_TO / CONNECTED_TO
//! edges. Entity writes are idempotent per (doc_id, entity key) via
//! MERGE, so re-processing a drawing never duplicates nodes.

use crate::error::Result;
use crate::graph::client::{GraphClient, Row, WriteSummary};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// A component with its related entities, as returned by
/// [`GraphRepository::get_component_with_relations`]
#[derive(Debug, Clone, Default)]
pub struct ComponentContext {
    pub component: Option<Value>,
    pub materials: Vec<Value>,
    pub dimensions: Vec<Value>,
    pub specifications: Vec<Value>,
    pub connected_components: Vec<Value>,
}

/// Graph repository for construction-drawing knowledge
pub struct GraphRepository {
    client: Arc<dyn GraphClient>,
}

impl GraphRepository {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self { client }
    }

    /// Deterministic entity id so repeated extraction runs merge
    pub fn component_id(doc_id: &str, code: &str) -> String {
        format!("{}#comp:{}", doc_id, code)
    }

    pub fn material_id(doc_id: &str, grade: &str) -> String {
        format!("{}#mat:{}", doc_id, grade)
    }

    pub fn dimension_id(doc_id: &str, dim_type: &str, value: &str) -> String {
        format!("{}#dim:{}:{}", doc_id, dim_type, value)
    }

    pub fn specification_id(code: &str) -> String {
        format!("spec:{}", code)
    }

    pub fn document_node_id(doc_id: &str) -> String {
        format!("doc:{}", doc_id)
    }

    // ----- node creation -----

    pub async fn create_document_node(
        &self,
        doc_id: &str,
        name: &str,
        doc_type: &str,
        project_id: Option<&str>,
        properties: Value,
    ) -> Result<WriteSummary> {
        let cypher = "\
            MERGE (d:Document {id: $id}) \
            ON CREATE SET d.created_at = $created_at \
            SET d.name = $name, d.doc_type = $doc_type, \
                d.project_id = $project_id, d += $props";
        let params = json!({
            "id": Self::document_node_id(doc_id),
            "name": name,
            "doc_type": doc_type,
            "project_id": project_id,
            "props": properties,
            "created_at": Utc::now().to_rfc3339(),
        });
        let summary = self.client.execute_write(cypher, params).await?;
        debug!("Document node upserted: {}", doc_id);
        Ok(summary)
    }

    /// Create a component node and its BELONGS_TO edge to the owning
    /// document; returns the node id
    pub async fn create_component(
        &self,
        doc_id: &str,
        code: &str,
        component_type: &str,
        properties: Value,
    ) -> Result<String> {
        let id = Self::component_id(doc_id, code);
        let cypher = "\
            MERGE (c:Component {code: $code, doc_id: $doc_id}) \
            ON CREATE SET c.id = $id, c.created_at = $created_at \
            SET c.component_type = $component_type, c += $props \
            WITH c \
            MATCH (d:Document {id: $doc_node_id}) \
            MERGE (c)-[:BELONGS_TO]->(d)";
        let params = json!({
            "id": id,
            "code": code,
            "doc_id": doc_id,
            "component_type": component_type,
            "props": properties,
            "doc_node_id": Self::document_node_id(doc_id),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.client.execute_write(cypher, params).await?;
        Ok(id)
    }

    pub async fn create_material(
        &self,
        doc_id: &str,
        material_type: &str,
        grade: &str,
        properties: Value,
    ) -> Result<String> {
        let id = Self::material_id(doc_id, grade);
        let cypher = "\
            MERGE (m:Material {grade: $grade, doc_id: $doc_id}) \
            ON CREATE SET m.id = $id, m.created_at = $created_at \
            SET m.material_type = $material_type, m += $props \
            WITH m \
            MATCH (d:Document {id: $doc_node_id}) \
            MERGE (m)-[:BELONGS_TO]->(d)";
        let params = json!({
            "id": id,
            "grade": grade,
            "doc_id": doc_id,
            "material_type": material_type,
            "props": properties,
            "doc_node_id": Self::document_node_id(doc_id),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.client.execute_write(cypher, params).await?;
        Ok(id)
    }

    /// Specifications are shared across documents; MERGE by code and
    /// attach a BELONGS_TO edge for the current document
    pub async fn create_specification(&self, doc_id: &str, code: &str) -> Result<String> {
        let id = Self::specification_id(code);
        let cypher = "\
            MERGE (s:Specification {code: $code}) \
            ON CREATE SET s.id = $id, s.created_at = $created_at \
            WITH s \
            MATCH (d:Document {id: $doc_node_id}) \
            MERGE (s)-[:BELONGS_TO]->(d)";
        let params = json!({
            "id": id,
            "code": code,
            "doc_node_id": Self::document_node_id(doc_id),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.client.execute_write(cypher, params).await?;
        Ok(id)
    }

    /// Find a specification node by code, creating it if missing;
    /// returns the node id
    pub async fn find_or_create_specification(&self, doc_id: &str, code: &str) -> Result<String> {
        let rows = self
            .client
            .execute_query(
                "MATCH (s:Specification {code: $code}) RETURN s.id AS id LIMIT 1",
                json!({ "code": code }),
            )
            .await?;
        if let Some(row) = rows.first() {
            if let Some(id) = row.get("id").and_then(|v| v.as_str()) {
                return Ok(id.to_string());
            }
        }
        self.create_specification(doc_id, code).await
    }

    pub async fn create_dimension(
        &self,
        doc_id: &str,
        dim_type: &str,
        value: &str,
        unit: &str,
        properties: Value,
    ) -> Result<String> {
        let id = Self::dimension_id(doc_id, dim_type, value);
        let cypher = "\
            MERGE (dim:Dimension {dim_type: $dim_type, value: $value, doc_id: $doc_id}) \
            ON CREATE SET dim.id = $id, dim.created_at = $created_at \
            SET dim.unit = $unit, dim += $props \
            WITH dim \
            MATCH (d:Document {id: $doc_node_id}) \
            MERGE (dim)-[:BELONGS_TO]->(d)";
        let params = json!({
            "id": id,
            "dim_type": dim_type,
            "value": value,
            "unit": unit,
            "doc_id": doc_id,
            "props": properties,
            "doc_node_id": Self::document_node_id(doc_id),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.client.execute_write(cypher, params).await?;
        Ok(id)
    }

    // ----- relation creation -----

    pub async fn create_uses_material_relation(
        &self,
        component_id: &str,
        material_id: &str,
        properties: Value,
    ) -> Result<WriteSummary> {
        self.create_relation(component_id, material_id, "USES_MATERIAL", properties)
            .await
    }

    pub async fn create_has_dimension_relation(
        &self,
        component_id: &str,
        dimension_id: &str,
        properties: Value,
    ) -> Result<WriteSummary> {
        self.create_relation(component_id, dimension_id, "HAS_DIMENSION", properties)
            .await
    }

    pub async fn create_refers_to_relation(
        &self,
        doc_id: &str,
        spec_id: &str,
        properties: Value,
    ) -> Result<WriteSummary> {
        self.create_relation(
            &Self::document_node_id(doc_id),
            spec_id,
            "REFERS_TO",
            properties,
        )
        .await
    }

    pub async fn create_connected_to_relation(
        &self,
        from_component_id: &str,
        to_component_id: &str,
        properties: Value,
    ) -> Result<WriteSummary> {
        self.create_relation(from_component_id, to_component_id, "CONNECTED_TO", properties)
            .await
    }

    async fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        rel_type: &str,
        properties: Value,
    ) -> Result<WriteSummary> {
        // Relationship type cannot be parameterized in Cypher; the type
        // comes from the closed set above, never from user input.
        let cypher = format!(
            "MATCH (a {{id: $from_id}}) MATCH (b {{id: $to_id}}) \
             MERGE (a)-[r:{}]->(b) SET r += $props",
            rel_type
        );
        let params = json!({
            "from_id": from_id,
            "to_id": to_id,
            "props": properties,
        });
        self.client.execute_write(&cypher, params).await
    }

    // ----- lookups -----

    pub async fn find_component_by_code(
        &self,
        code: &str,
        doc_id: Option<&str>,
    ) -> Result<Option<Value>> {
        let (cypher, params) = match doc_id {
            Some(doc_id) => (
                "MATCH (c:Component {code: $code, doc_id: $doc_id}) RETURN c LIMIT 1",
                json!({ "code": code, "doc_id": doc_id }),
            ),
            None => (
                "MATCH (c:Component {code: $code}) RETURN c LIMIT 1",
                json!({ "code": code }),
            ),
        };
        let rows = self.client.execute_query(cypher, params).await?;
        Ok(rows.into_iter().next().and_then(|mut r| r.remove("c")))
    }

    pub async fn find_components_by_type(
        &self,
        component_type: &str,
        doc_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let (cypher, params) = match doc_id {
            Some(doc_id) => (
                "MATCH (c:Component {component_type: $type, doc_id: $doc_id}) \
                 RETURN c LIMIT $limit",
                json!({ "type": component_type, "doc_id": doc_id, "limit": limit }),
            ),
            None => (
                "MATCH (c:Component {component_type: $type}) RETURN c LIMIT $limit",
                json!({ "type": component_type, "limit": limit }),
            ),
        };
        let rows = self.client.execute_query(cypher, params).await?;
        Ok(rows.into_iter().filter_map(|mut r| r.remove("c")).collect())
    }

    /// Center component plus its materials, dimensions, referenced
    /// specifications and connected components
    pub async fn get_component_with_relations(
        &self,
        component_id: &str,
    ) -> Result<ComponentContext> {
        let cypher = "\
            MATCH (c:Component {id: $id}) \
            OPTIONAL MATCH (c)-[:USES_MATERIAL]->(m:Material) \
            OPTIONAL MATCH (c)-[:HAS_DIMENSION]->(dim:Dimension) \
            OPTIONAL MATCH (c)-[:BELONGS_TO]->(:Document)-[:REFERS_TO]->(s:Specification) \
            OPTIONAL MATCH (c)-[:CONNECTED_TO]-(other:Component) \
            RETURN c, \
                   collect(DISTINCT m) AS materials, \
                   collect(DISTINCT dim) AS dimensions, \
                   collect(DISTINCT s) AS specifications, \
                   collect(DISTINCT other) AS connected";
        let rows = self
            .client
            .execute_query(cypher, json!({ "id": component_id }))
            .await?;

        let Some(mut row) = rows.into_iter().next() else {
            return Ok(ComponentContext::default());
        };

        let take_list = |row: &mut Row, key: &str| -> Vec<Value> {
            match row.remove(key) {
                Some(Value::Array(items)) => {
                    items.into_iter().filter(|v| !v.is_null()).collect()
                }
                _ => Vec::new(),
            }
        };

        Ok(ComponentContext {
            component: row.remove("c"),
            materials: take_list(&mut row, "materials"),
            dimensions: take_list(&mut row, "dimensions"),
            specifications: take_list(&mut row, "specifications"),
            connected_components: take_list(&mut row, "connected"),
        })
    }

    // ----- cascade delete -----

    /// Delete a document and every entity owned via BELONGS_TO, along
    /// with their edges. Shared specifications survive as long as they
    /// still belong to some other document.
    pub async fn delete_document_and_relations(&self, doc_id: &str) -> Result<WriteSummary> {
        let doc_node_id = Self::document_node_id(doc_id);

        let cypher = "\
            MATCH (d:Document {id: $doc_node_id}) \
            OPTIONAL MATCH (n)-[:BELONGS_TO]->(d) \
            WHERE n:Component OR n:Material OR n:Dimension \
            DETACH DELETE n, d";
        let mut summary = self
            .client
            .execute_write(cypher, json!({ "doc_node_id": doc_node_id }))
            .await?;

        // Specifications orphaned by the delete violate the
        // no-orphan invariant and are removed too
        let orphan_cypher = "\
            MATCH (s:Specification) \
            WHERE NOT (s)-[:BELONGS_TO]->(:Document) \
            DETACH DELETE s";
        let orphan_summary = self
            .client
            .execute_write(orphan_cypher, Value::Null)
            .await?;

        summary.nodes_deleted += orphan_summary.nodes_deleted;
        summary.relationships_deleted += orphan_summary.relationships_deleted;

        info!(
            "Deleted document {} and {} owned nodes",
            doc_id, summary.nodes_deleted
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingClient {
        writes: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl GraphClient for CapturingClient {
        async fn execute_query(&self, _cypher: &str, _params: Value) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute_write(&self, cypher: &str, params: Value) -> Result<WriteSummary> {
            self.writes.lock().unwrap().push((cypher.to_string(), params));
            Ok(WriteSummary {
                nodes_deleted: 1,
                ..Default::default()
            })
        }

        async fn verify_connectivity(&self) -> Result<()> {
            Ok(())
        }
    }

    fn repo() -> (GraphRepository, Arc<CapturingClient>) {
        let client = Arc::new(CapturingClient::default());
        (GraphRepository::new(client.clone()), client)
    }

    #[test]
    fn test_entity_ids_are_deterministic() {
        assert_eq!(GraphRepository::component_id("d1", "KL-1"), "d1#comp:KL-1");
        assert_eq!(GraphRepository::material_id("d1", "C30"), "d1#mat:C30");
        assert_eq!(
            GraphRepository::dimension_id("d1", "section", "300x500"),
            "d1#dim:section:300x500"
        );
        assert_eq!(
            GraphRepository::specification_id("GB50010-2010"),
            "spec:GB50010-2010"
        );
    }

    #[tokio::test]
    async fn test_component_write_merges_and_owns() {
        let (repo, client) = repo();
        let id = repo
            .create_component("d1", "KL-1", "beam", json!({}))
            .await
            .unwrap();
        assert_eq!(id, "d1#comp:KL-1");

        let writes = client.writes.lock().unwrap();
        let (cypher, params) = &writes[0];
        assert!(cypher.contains("MERGE (c:Component {code: $code, doc_id: $doc_id})"));
        assert!(cypher.contains("MERGE (c)-[:BELONGS_TO]->(d)"));
        assert_eq!(params["code"], "KL-1");
        assert_eq!(params["doc_node_id"], "doc:d1");
    }

    #[tokio::test]
    async fn test_cascade_delete_sweeps_owned_and_orphans() {
        let (repo, client) = repo();
        repo.delete_document_and_relations("d1").await.unwrap();

        let writes = client.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);

        // Owned Component / Material / Dimension nodes go with the
        // document
        let (cascade, params) = &writes[0];
        assert!(cascade.contains("(n)-[:BELONGS_TO]->(d)"));
        assert!(cascade.contains("n:Component OR n:Material OR n:Dimension"));
        assert!(cascade.contains("DETACH DELETE n, d"));
        assert_eq!(params["doc_node_id"], "doc:d1");

        // Specifications with no remaining owner are removed too
        let (orphans, _) = &writes[1];
        assert!(orphans.contains("NOT (s)-[:BELONGS_TO]->(:Document)"));
        assert!(orphans.contains("DETACH DELETE s"));
    }

    #[tokio::test]
    async fn test_relation_types_are_closed_set() {
        let (repo, client) = repo();
        repo.create_uses_material_relation("a", "b", json!({}))
            .await
            .unwrap();
        repo.create_has_dimension_relation("a", "b", json!({}))
            .await
            .unwrap();
        repo.create_refers_to_relation("d1", "spec:GB1", json!({}))
            .await
            .unwrap();
        repo.create_connected_to_relation("a", "b", json!({}))
            .await
            .unwrap();

        let writes = client.writes.lock().unwrap();
        assert!(writes[0].0.contains("[r:USES_MATERIAL]"));
        assert!(writes[1].0.contains("[r:HAS_DIMENSION]"));
        assert!(writes[2].0.contains("[r:REFERS_TO]"));
        assert!(writes[2].1["from_id"] == "doc:d1");
        assert!(writes[3].0.contains("[r:CONNECTED_TO]"));
    }
}
