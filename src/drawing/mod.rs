//! Drawing knowledge extraction
//!
//! Turns parsed construction drawings into graph entities and relations
//! and keeps the knowledge graph in sync with the document store.

pub mod extractor;
pub mod patterns;
pub mod processor;
pub mod relations;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use extractor::{EntityExtractor, ExtractedEntities};
pub use processor::DrawingProcessor;
pub use relations::{InferredRelation, RelationExtractor, RelationType};

/// Text content of one drawing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingPage {
    pub page_num: i64,
    pub text: String,
}

/// A table lifted from a drawing, row-major
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingTable {
    pub page_num: i64,
    pub rows: Vec<Vec<String>>,
}

/// Parser output contract for one drawing: per-page text, tables and an
/// optional OCR fallback text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDrawing {
    pub pages: Vec<DrawingPage>,
    pub tables: Vec<DrawingTable>,
    pub ocr_text: Option<String>,
}

impl ParsedDrawing {
    /// All page text concatenated, falling back to OCR text when the
    /// pages are empty
    pub fn full_text(&self) -> String {
        let text: String = self
            .pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            self.ocr_text.clone().unwrap_or_default()
        } else {
            text
        }
    }
}

/// Processing state of one drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
}

/// Outcome of one processing step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub status: String,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of one drawing's trip through the extraction pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingProcessingRecord {
    pub document_id: String,
    pub status: ProcessingStatus,
    /// Percent complete; only ever moves forward
    pub progress: u8,
    pub steps: Vec<StepReport>,
    pub entity_count: usize,
    pub relation_count: usize,
    pub graph_synced: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DrawingProcessingRecord {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: ProcessingStatus::Pending,
            progress: 0,
            steps: Vec::new(),
            entity_count: 0,
            relation_count: 0,
            graph_synced: false,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Advance progress; regressions are ignored so the value is
    /// monotonically non-decreasing
    pub fn advance_progress(&mut self, percent: u8) {
        self.progress = self.progress.max(percent.min(100));
    }

    pub fn record_step(
        &mut self,
        step: &str,
        started: DateTime<Utc>,
        error: Option<String>,
    ) {
        let duration_ms = (Utc::now() - started).num_milliseconds();
        self.steps.push(StepReport {
            step: step.to_string(),
            status: if error.is_none() { "success" } else { "failed" }.to_string(),
            duration_ms,
            error,
        });
    }

    pub fn has_failed_steps(&self) -> bool {
        self.steps.iter().any(|s| s.status == "failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let mut record = DrawingProcessingRecord::new("doc-1");
        record.advance_progress(30);
        record.advance_progress(10);
        assert_eq!(record.progress, 30);
        record.advance_progress(120);
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn test_full_text_falls_back_to_ocr() {
        let drawing = ParsedDrawing {
            pages: vec![DrawingPage {
                page_num: 1,
                text: "  ".to_string(),
            }],
            tables: vec![],
            ocr_text: Some("KL-1 C30".to_string()),
        };
        assert_eq!(drawing.full_text(), "KL-1 C30");
    }
}
