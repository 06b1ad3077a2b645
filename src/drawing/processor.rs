//! Drawing processing pipeline
//!
//! Linear state machine over one drawing:
//! pending → processing → {completed | partial | failed}.
//! Each step checkpoints into the processing record; a failed step is
//! recorded and later steps continue, except basic extraction, without
//! which the run fails outright.

use crate::drawing::extractor::{EntityExtractor, ExtractedEntities};
use crate::drawing::relations::{InferredRelation, RelationExtractor, RelationType};
use crate::drawing::{DrawingProcessingRecord, ParsedDrawing, ProcessingStatus};
use crate::graph::GraphRepository;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Orchestrates extraction, relation inference and graph writes for one
/// drawing
pub struct DrawingProcessor {
    repository: Arc<GraphRepository>,
    extractor: EntityExtractor,
    relations: RelationExtractor,
}

impl DrawingProcessor {
    pub fn new(repository: Arc<GraphRepository>, extractor: EntityExtractor) -> Self {
        Self {
            repository,
            extractor,
            relations: RelationExtractor::new(),
        }
    }

    /// Process one parsed drawing into the knowledge graph
    pub async fn process(
        &self,
        document_id: &str,
        document_name: &str,
        project_id: Option<&str>,
        parsed: &ParsedDrawing,
    ) -> DrawingProcessingRecord {
        let mut record = DrawingProcessingRecord::new(document_id);
        record.status = ProcessingStatus::Processing;
        record.advance_progress(5);

        info!("Processing drawing {} ({})", document_id, document_name);

        // Step 1: basic extraction. Nothing downstream works without it.
        let step_started = Utc::now();
        let mut entities = self.extractor.extract_from_pages(parsed);
        if entities.total() == 0 && parsed.full_text().trim().is_empty() {
            record.record_step(
                "basic_extraction",
                step_started,
                Some("drawing has no extractable text".to_string()),
            );
            record.status = ProcessingStatus::Failed;
            record.error = Some("drawing has no extractable text".to_string());
            record.finished_at = Some(Utc::now());
            return record;
        }
        record.record_step("basic_extraction", step_started, None);
        record.advance_progress(30);

        // Step 2: table extraction
        let step_started = Utc::now();
        let table_entities = self.extractor.extract_from_tables(&parsed.tables);
        entities.merge(table_entities);
        record.record_step("table_extraction", step_started, None);
        record.advance_progress(45);

        // Step 3: optional LLM enrichment; a failure here never stops
        // the run
        let step_started = Utc::now();
        match self.extractor.enrich_with_llm(&parsed.full_text()).await {
            Ok(llm_entities) => {
                entities.merge(llm_entities);
                record.record_step("llm_enrichment", step_started, None);
            }
            Err(e) => {
                warn!("LLM enrichment failed: {}", e);
                record.record_step("llm_enrichment", step_started, Some(e.to_string()));
            }
        }

        // Step 4: dedup by entity key
        let step_started = Utc::now();
        entities.deduplicate();
        record.entity_count = entities.total();
        record.record_step("deduplicate", step_started, None);
        record.advance_progress(50);

        // Step 5: relation inference
        let step_started = Utc::now();
        let relations = self.relations.extract(&entities, document_id);
        record.relation_count = relations.len();
        record.record_step("relation_inference", step_started, None);
        record.advance_progress(70);

        // Step 6: graph write
        let step_started = Utc::now();
        match self
            .write_graph(document_id, document_name, project_id, &entities, &relations)
            .await
        {
            Ok(()) => {
                record.graph_synced = true;
                record.record_step("graph_write", step_started, None);
            }
            Err(e) => {
                warn!("Graph write failed: {}", e);
                record.record_step("graph_write", step_started, Some(e.to_string()));
            }
        }

        record.advance_progress(100);
        record.status = if record.has_failed_steps() {
            ProcessingStatus::Partial
        } else {
            ProcessingStatus::Completed
        };
        record.finished_at = Some(Utc::now());

        info!(
            "Drawing {} processed | status: {:?} | entities: {} | relations: {}",
            document_id, record.status, record.entity_count, record.relation_count
        );
        record
    }

    /// Write nodes then edges. Node writes are idempotent per
    /// (doc_id, entity key); a failing edge is logged and skipped so one
    /// bad row cannot abort the sync.
    async fn write_graph(
        &self,
        document_id: &str,
        document_name: &str,
        project_id: Option<&str>,
        entities: &ExtractedEntities,
        relations: &[InferredRelation],
    ) -> crate::error::Result<()> {
        self.repository
            .create_document_node(
                document_id,
                document_name,
                "drawing",
                project_id,
                json!({}),
            )
            .await?;

        for comp in &entities.components {
            let props = json!({
                "source": comp.source,
                "floor": comp.floor,
                "page_num": comp.page_num,
            });
            self.repository
                .create_component(document_id, &comp.code, &comp.component_type, props)
                .await?;
        }

        for mat in &entities.materials {
            let props = json!({ "source": mat.source });
            self.repository
                .create_material(document_id, &mat.material_type, &mat.grade, props)
                .await?;
        }

        for spec in &entities.specifications {
            self.repository
                .create_specification(document_id, &spec.code)
                .await?;
        }

        for dim in &entities.dimensions {
            let props = json!({ "source": dim.source });
            self.repository
                .create_dimension(document_id, &dim.dim_type, &dim.value, &dim.unit, props)
                .await?;
        }

        for relation in relations {
            let props = json!({
                "source": relation.source,
                "confidence": relation.confidence,
            });
            let result = match relation.rel_type {
                RelationType::UsesMaterial => {
                    self.repository
                        .create_uses_material_relation(&relation.from_id, &relation.to_id, props)
                        .await
                }
                RelationType::HasDimension => {
                    self.repository
                        .create_has_dimension_relation(&relation.from_id, &relation.to_id, props)
                        .await
                }
                RelationType::RefersTo => {
                    self.repository
                        .create_refers_to_relation(document_id, &relation.to_id, props)
                        .await
                }
                RelationType::ConnectedTo => {
                    self.repository
                        .create_connected_to_relation(&relation.from_id, &relation.to_id, props)
                        .await
                }
            };
            if let Err(e) = result {
                warn!(
                    "Edge write failed ({:?} {} -> {}): {}",
                    relation.rel_type, relation.from_id, relation.to_id, e
                );
            }
        }

        Ok(())
    }
}
