//! Entity extraction from parsed drawings
//!
//! Rule-driven extraction over per-page text and table cells, with an
//! optional LLM enrichment pass. All sources merge into one entity set
//! which is deduplicated by entity key before graph writes.

use crate::config::DrawingConfig;
use crate::drawing::patterns;
use crate::drawing::{DrawingTable, ParsedDrawing};
use crate::error::Result;
use crate::llm::{system_message, user_message, LlmClient};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A component entity (beam, column, slab, wall, foundation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEntity {
    pub code: String,
    pub component_type: String,
    pub floor: Option<String>,
    pub source: String,
    pub page_num: Option<i64>,
}

/// A material entity keyed by grade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialEntity {
    pub material_type: String,
    pub grade: String,
    pub source: String,
}

/// A standard/specification reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecificationEntity {
    pub code: String,
    pub source: String,
}

/// A dimension entity keyed by (type, value)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionEntity {
    pub dim_type: String,
    pub value: String,
    pub unit: String,
    pub source: String,
}

/// All entities extracted from one drawing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub components: Vec<ComponentEntity>,
    pub materials: Vec<MaterialEntity>,
    pub specifications: Vec<SpecificationEntity>,
    pub dimensions: Vec<DimensionEntity>,
}

impl ExtractedEntities {
    pub fn total(&self) -> usize {
        self.components.len()
            + self.materials.len()
            + self.specifications.len()
            + self.dimensions.len()
    }

    pub fn merge(&mut self, other: ExtractedEntities) {
        self.components.extend(other.components);
        self.materials.extend(other.materials);
        self.specifications.extend(other.specifications);
        self.dimensions.extend(other.dimensions);
    }

    /// Deduplicate per entity variant: component by code, material by
    /// grade, specification by code, dimension by (type, value)
    pub fn deduplicate(&mut self) {
        let mut seen = HashSet::new();
        self.components
            .retain(|c| seen.insert(format!("comp:{}", c.code)));

        let mut seen = HashSet::new();
        self.materials
            .retain(|m| seen.insert(format!("mat:{}", m.grade)));

        let mut seen = HashSet::new();
        self.specifications
            .retain(|s| seen.insert(format!("spec:{}", s.code)));

        let mut seen = HashSet::new();
        self.dimensions
            .retain(|d| seen.insert(format!("dim:{}:{}", d.dim_type, d.value)));
    }
}

/// JSON schema for the LLM enrichment response
#[derive(Debug, Default, Deserialize)]
struct LlmEntityPayload {
    #[serde(default)]
    components: Vec<LlmComponent>,
    #[serde(default)]
    materials: Vec<LlmMaterial>,
    #[serde(default)]
    specifications: Vec<LlmSpecification>,
}

#[derive(Debug, Deserialize)]
struct LlmComponent {
    #[serde(default, rename = "type")]
    component_type: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct LlmMaterial {
    #[serde(default, rename = "type")]
    material_type: String,
    #[serde(default)]
    grade: String,
}

#[derive(Debug, Deserialize)]
struct LlmSpecification {
    #[serde(default)]
    code: String,
}

/// Rule + optional-LLM entity extractor
pub struct EntityExtractor {
    config: DrawingConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl EntityExtractor {
    pub fn new(config: DrawingConfig, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { config, llm }
    }

    /// Basic extraction: regex pass over every page's text
    pub fn extract_from_pages(&self, parsed: &ParsedDrawing) -> ExtractedEntities {
        let mut entities = ExtractedEntities::default();

        for page in &parsed.pages {
            let floor = extract_floor(&page.text);
            self.extract_from_text(
                &page.text,
                "text",
                Some(page.page_num),
                floor.as_deref(),
                &mut entities,
            );
        }

        if entities.total() == 0 {
            if let Some(ocr) = &parsed.ocr_text {
                debug!("Page text yielded nothing, falling back to OCR text");
                self.extract_from_text(ocr, "ocr", None, None, &mut entities);
            }
        }

        info!(
            "Basic extraction | components: {} | materials: {} | specs: {} | dimensions: {}",
            entities.components.len(),
            entities.materials.len(),
            entities.specifications.len(),
            entities.dimensions.len()
        );
        entities
    }

    /// Table extraction: the same pattern set over cell concatenations
    pub fn extract_from_tables(&self, tables: &[DrawingTable]) -> ExtractedEntities {
        let mut entities = ExtractedEntities::default();
        for table in tables {
            for row in &table.rows {
                let row_text = row.join(" ");
                self.extract_from_text(&row_text, "table", Some(table.page_num), None, &mut entities);
            }
        }
        debug!("Table extraction | entities: {}", entities.total());
        entities
    }

    fn extract_from_text(
        &self,
        text: &str,
        source: &str,
        page_num: Option<i64>,
        floor: Option<&str>,
        entities: &mut ExtractedEntities,
    ) {
        for (pattern, kind) in patterns::component_patterns() {
            for m in pattern.find_iter(text) {
                entities.components.push(ComponentEntity {
                    code: m.as_str().to_uppercase().replace(' ', ""),
                    component_type: kind.as_str().to_string(),
                    floor: floor.map(|f| f.to_string()),
                    source: source.to_string(),
                    page_num,
                });
            }
        }

        for (pattern, kind) in patterns::material_patterns() {
            for m in pattern.find_iter(text) {
                entities.materials.push(MaterialEntity {
                    material_type: kind.as_str().to_string(),
                    grade: m.as_str().to_uppercase(),
                    source: source.to_string(),
                });
            }
        }

        for pattern in patterns::spec_patterns() {
            for m in pattern.find_iter(text) {
                entities.specifications.push(SpecificationEntity {
                    code: m.as_str().replace(' ', ""),
                    source: source.to_string(),
                });
            }
        }

        for (pattern, dim_type) in patterns::dimension_patterns() {
            for caps in pattern.captures_iter(text) {
                if let Some(value) = caps.iter().skip(1).flatten().next() {
                    entities.dimensions.push(DimensionEntity {
                        dim_type: dim_type.to_string(),
                        value: value.as_str().replace('×', "x"),
                        unit: "mm".to_string(),
                        source: source.to_string(),
                    });
                }
            }
        }
    }

    /// Optional LLM enrichment. Sends a bounded text sample with a fixed
    /// instruction and parses the JSON reply into the same entity
    /// schema. Disabled unless configured.
    pub async fn enrich_with_llm(&self, text: &str) -> Result<ExtractedEntities> {
        let Some(llm) = &self.llm else {
            return Ok(ExtractedEntities::default());
        };
        if !self.config.use_llm || text.len() < 100 {
            return Ok(ExtractedEntities::default());
        }

        let sample: String = text.chars().take(self.config.llm_sample_chars).collect();
        let prompt = format!(
            "请从以下施工图文本中提取实体信息，仅返回JSON，不要其他内容。\n\
             \n文本：\n{}\n\n\
             返回格式：\n\
             {{\"components\": [{{\"type\": \"beam\", \"code\": \"KL-1\"}}], \
             \"materials\": [{{\"type\": \"concrete\", \"grade\": \"C30\"}}], \
             \"specifications\": [{{\"code\": \"GB50010-2010\"}}]}}",
            sample
        );

        let messages = vec![
            system_message("你是施工图信息抽取助手，只输出JSON。"),
            user_message(prompt),
        ];
        let response = llm.generate(&messages).await?;
        let payload = parse_llm_entities(&response.text)?;

        let mut entities = ExtractedEntities::default();
        for c in payload.components {
            if !c.code.is_empty() {
                entities.components.push(ComponentEntity {
                    code: c.code.to_uppercase(),
                    component_type: if c.component_type.is_empty() {
                        "other".to_string()
                    } else {
                        c.component_type
                    },
                    floor: None,
                    source: "llm".to_string(),
                    page_num: None,
                });
            }
        }
        for m in payload.materials {
            if !m.grade.is_empty() {
                entities.materials.push(MaterialEntity {
                    material_type: if m.material_type.is_empty() {
                        "other".to_string()
                    } else {
                        m.material_type
                    },
                    grade: m.grade.to_uppercase(),
                    source: "llm".to_string(),
                });
            }
        }
        for s in payload.specifications {
            if !s.code.is_empty() {
                entities.specifications.push(SpecificationEntity {
                    code: s.code,
                    source: "llm".to_string(),
                });
            }
        }

        info!("LLM enrichment produced {} entities", entities.total());
        Ok(entities)
    }
}

/// Parse the enrichment reply, tolerating markdown code fences
fn parse_llm_entities(text: &str) -> Result<LlmEntityPayload> {
    let trimmed = text.trim();
    let json_str = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}').map(|i| i + 1).unwrap_or(trimmed.len());
        &trimmed[start..end]
    } else {
        trimmed
    };
    match serde_json::from_str(json_str) {
        Ok(payload) => Ok(payload),
        Err(e) => {
            warn!("LLM entity payload did not parse: {}", e);
            Ok(LlmEntityPayload::default())
        }
    }
}

fn extract_floor(text: &str) -> Option<String> {
    patterns::floor_pattern().captures(text).map(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawing::DrawingPage;

    fn extractor() -> EntityExtractor {
        EntityExtractor::new(DrawingConfig::default(), None)
    }

    fn drawing(text: &str) -> ParsedDrawing {
        ParsedDrawing {
            pages: vec![DrawingPage {
                page_num: 1,
                text: text.to_string(),
            }],
            tables: vec![],
            ocr_text: None,
        }
    }

    #[test]
    fn test_basic_extraction() {
        let entities = extractor().extract_from_pages(&drawing("KL-1 C30 HRB400 300x500 GB50010-2010"));

        assert_eq!(entities.components.len(), 1);
        assert_eq!(entities.components[0].code, "KL-1");
        assert_eq!(entities.components[0].component_type, "beam");

        let grades: Vec<&str> = entities.materials.iter().map(|m| m.grade.as_str()).collect();
        assert!(grades.contains(&"C30"));
        assert!(grades.contains(&"HRB400"));

        assert_eq!(entities.specifications.len(), 1);
        assert_eq!(entities.specifications[0].code, "GB50010-2010");

        assert_eq!(entities.dimensions.len(), 1);
        assert_eq!(entities.dimensions[0].dim_type, "section");
        assert_eq!(entities.dimensions[0].value, "300x500");
    }

    #[test]
    fn test_table_extraction_tags_source() {
        let tables = vec![DrawingTable {
            page_num: 2,
            rows: vec![
                vec!["构件".to_string(), "材料".to_string()],
                vec!["KZ-1".to_string(), "C35".to_string()],
            ],
        }];
        let entities = extractor().extract_from_tables(&tables);
        assert!(entities.components.iter().any(|c| c.code == "KZ-1" && c.source == "table"));
        assert!(entities.materials.iter().any(|m| m.grade == "C35" && m.source == "table"));
    }

    #[test]
    fn test_deduplication_keys() {
        let mut entities = extractor().extract_from_pages(&drawing("KL-1出现两次 KL-1，C30与C30，300x500和300x500"));
        entities.deduplicate();
        assert_eq!(entities.components.len(), 1);
        assert_eq!(entities.materials.len(), 1);
        assert_eq!(entities.dimensions.len(), 1);
    }

    #[test]
    fn test_floor_assignment() {
        let entities = extractor().extract_from_pages(&drawing("3层平面图 KL-1 KZ-2"));
        assert!(entities.components.iter().all(|c| c.floor.as_deref() == Some("3")));
    }

    #[test]
    fn test_ocr_fallback() {
        let parsed = ParsedDrawing {
            pages: vec![DrawingPage {
                page_num: 1,
                text: String::new(),
            }],
            tables: vec![],
            ocr_text: Some("LB-2 板厚120".to_string()),
        };
        let entities = extractor().extract_from_pages(&parsed);
        assert!(entities.components.iter().any(|c| c.code == "LB-2"));
        assert!(entities.dimensions.iter().any(|d| d.dim_type == "thickness"));
    }

    #[test]
    fn test_llm_payload_parsing() {
        let payload = parse_llm_entities(
            "```json\n{\"components\": [{\"type\": \"beam\", \"code\": \"KL-9\"}]}\n```",
        )
        .unwrap();
        assert_eq!(payload.components.len(), 1);
        assert_eq!(payload.components[0].code, "KL-9");

        // Garbage degrades to an empty payload instead of failing
        let payload = parse_llm_entities("not json at all").unwrap();
        assert!(payload.components.is_empty());
    }
}
