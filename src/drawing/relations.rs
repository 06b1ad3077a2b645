//! Relation inference between extracted entities
//!
//! Rule-driven: a static component/material compatibility table,
//! dimension applicability by component type, document-level REFERS_TO
//! for every specification, and CONNECTED_TO inference within one floor
//! (beam-column, slab-beam).

use crate::drawing::extractor::{ComponentEntity, ExtractedEntities};
use crate::graph::GraphRepository;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Edge label in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    UsesMaterial,
    HasDimension,
    RefersTo,
    ConnectedTo,
}

/// An inferred edge between two entity node ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredRelation {
    pub from_id: String,
    pub to_id: String,
    pub rel_type: RelationType,
    pub confidence: f64,
    pub source: String,
}

/// Materials each component type can plausibly use
const COMPONENT_MATERIAL_RULES: &[(&str, &[&str])] = &[
    ("beam", &["concrete", "rebar"]),
    ("column", &["concrete", "rebar"]),
    ("slab", &["concrete", "rebar"]),
    ("wall", &["concrete", "rebar"]),
    ("foundation", &["concrete", "rebar"]),
    ("steel_beam", &["steel"]),
    ("steel_column", &["steel"]),
];

/// Dimension types applicable to each component type
const COMPONENT_DIMENSION_RULES: &[(&str, &[&str])] = &[
    ("beam", &["section", "span", "height", "width", "spacing"]),
    ("column", &["section", "height"]),
    ("slab", &["thickness", "span"]),
    ("wall", &["thickness", "height", "width"]),
    ("foundation", &["thickness", "width", "span"]),
];

/// Relation extractor over one drawing's entity set
pub struct RelationExtractor;

impl RelationExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Infer all relations for one document's entities
    pub fn extract(&self, entities: &ExtractedEntities, doc_id: &str) -> Vec<InferredRelation> {
        let mut relations = Vec::new();

        self.component_material_relations(entities, doc_id, &mut relations);
        self.component_dimension_relations(entities, doc_id, &mut relations);
        self.document_spec_relations(entities, doc_id, &mut relations);
        self.connected_relations(entities, doc_id, &mut relations);

        info!("Relation inference complete | total: {}", relations.len());
        relations
    }

    fn component_material_relations(
        &self,
        entities: &ExtractedEntities,
        doc_id: &str,
        out: &mut Vec<InferredRelation>,
    ) {
        for comp in &entities.components {
            let allowed = COMPONENT_MATERIAL_RULES
                .iter()
                .find(|(t, _)| *t == comp.component_type)
                .map(|(_, m)| *m)
                .unwrap_or(&[]);

            for mat in &entities.materials {
                if allowed.contains(&mat.material_type.as_str()) {
                    out.push(InferredRelation {
                        from_id: GraphRepository::component_id(doc_id, &comp.code),
                        to_id: GraphRepository::material_id(doc_id, &mat.grade),
                        rel_type: RelationType::UsesMaterial,
                        confidence: 0.8,
                        source: "rule_inference".to_string(),
                    });
                }
            }
        }
    }

    fn component_dimension_relations(
        &self,
        entities: &ExtractedEntities,
        doc_id: &str,
        out: &mut Vec<InferredRelation>,
    ) {
        for comp in &entities.components {
            let applicable = COMPONENT_DIMENSION_RULES
                .iter()
                .find(|(t, _)| *t == comp.component_type)
                .map(|(_, d)| *d)
                .unwrap_or(&[]);

            for dim in &entities.dimensions {
                if applicable.contains(&dim.dim_type.as_str()) {
                    out.push(InferredRelation {
                        from_id: GraphRepository::component_id(doc_id, &comp.code),
                        to_id: GraphRepository::dimension_id(doc_id, &dim.dim_type, &dim.value),
                        rel_type: RelationType::HasDimension,
                        confidence: 0.7,
                        source: "co_occurrence".to_string(),
                    });
                }
            }
        }
    }

    fn document_spec_relations(
        &self,
        entities: &ExtractedEntities,
        doc_id: &str,
        out: &mut Vec<InferredRelation>,
    ) {
        for spec in &entities.specifications {
            out.push(InferredRelation {
                from_id: GraphRepository::document_node_id(doc_id),
                to_id: GraphRepository::specification_id(&spec.code),
                rel_type: RelationType::RefersTo,
                confidence: 0.95,
                source: "extraction".to_string(),
            });
        }
    }

    /// CONNECTED_TO within the same floor: beam-column and slab-beam
    fn connected_relations(
        &self,
        entities: &ExtractedEntities,
        doc_id: &str,
        out: &mut Vec<InferredRelation>,
    ) {
        fn by_type<'a>(
            entities: &'a ExtractedEntities,
            t: &'a str,
        ) -> impl Iterator<Item = &'a ComponentEntity> {
            entities
                .components
                .iter()
                .filter(move |c| c.component_type == t && c.floor.is_some())
        }

        for beam in by_type(entities, "beam") {
            for column in by_type(entities, "column") {
                if beam.floor == column.floor {
                    out.push(InferredRelation {
                        from_id: GraphRepository::component_id(doc_id, &beam.code),
                        to_id: GraphRepository::component_id(doc_id, &column.code),
                        rel_type: RelationType::ConnectedTo,
                        confidence: 0.6,
                        source: "floor_inference".to_string(),
                    });
                }
            }
        }

        for slab in by_type(entities, "slab") {
            for beam in by_type(entities, "beam") {
                if slab.floor == beam.floor {
                    out.push(InferredRelation {
                        from_id: GraphRepository::component_id(doc_id, &slab.code),
                        to_id: GraphRepository::component_id(doc_id, &beam.code),
                        rel_type: RelationType::ConnectedTo,
                        confidence: 0.6,
                        source: "floor_inference".to_string(),
                    });
                }
            }
        }
    }
}

impl Default for RelationExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrawingConfig;
    use crate::drawing::extractor::EntityExtractor;
    use crate::drawing::{DrawingPage, ParsedDrawing};

    fn extract(text: &str) -> ExtractedEntities {
        let extractor = EntityExtractor::new(DrawingConfig::default(), None);
        let mut entities = extractor.extract_from_pages(&ParsedDrawing {
            pages: vec![DrawingPage {
                page_num: 1,
                text: text.to_string(),
            }],
            tables: vec![],
            ocr_text: None,
        });
        entities.deduplicate();
        entities
    }

    #[test]
    fn test_component_material_rule_table() {
        let entities = extract("KL-1 C30 HRB400");
        let relations = RelationExtractor::new().extract(&entities, "doc-1");

        let uses: Vec<&InferredRelation> = relations
            .iter()
            .filter(|r| r.rel_type == RelationType::UsesMaterial)
            .collect();
        // Beam uses both concrete and rebar
        assert_eq!(uses.len(), 2);
        assert!(uses.iter().all(|r| r.from_id.ends_with("comp:KL-1")));
    }

    #[test]
    fn test_dimension_applicability() {
        let entities = extract("KL-1 截面300x500 板厚120");
        let relations = RelationExtractor::new().extract(&entities, "doc-1");

        let dims: Vec<&InferredRelation> = relations
            .iter()
            .filter(|r| r.rel_type == RelationType::HasDimension)
            .collect();
        // A beam takes the section, but not the slab thickness
        assert_eq!(dims.len(), 1);
        assert!(dims[0].to_id.contains("dim:section"));
    }

    #[test]
    fn test_document_refers_to_every_spec() {
        let entities = extract("依据GB50010-2010与JGJ 18-2012");
        let relations = RelationExtractor::new().extract(&entities, "doc-1");
        let refers: Vec<&InferredRelation> = relations
            .iter()
            .filter(|r| r.rel_type == RelationType::RefersTo)
            .collect();
        assert_eq!(refers.len(), 2);
        assert!(refers.iter().all(|r| r.from_id == "doc:doc-1"));
    }

    #[test]
    fn test_connected_to_same_floor_only() {
        let entities = extract("3层 KL-1 KZ-1 LB-1");
        let relations = RelationExtractor::new().extract(&entities, "doc-1");
        let connected: Vec<&InferredRelation> = relations
            .iter()
            .filter(|r| r.rel_type == RelationType::ConnectedTo)
            .collect();
        // beam-column and slab-beam on the same floor
        assert_eq!(connected.len(), 2);

        // Without floor information no connection is inferred
        let entities = extract("KL-1 KZ-1");
        let relations = RelationExtractor::new().extract(&entities, "doc-1");
        assert!(relations
            .iter()
            .all(|r| r.rel_type != RelationType::ConnectedTo));
    }
}
