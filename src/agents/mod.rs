//! Analytics agents
//!
//! Workflow orchestrators over the tool facades. Every agent run is
//! bracketed by a workflow-log record (`running` →
//! `completed`/`failed`), internal steps absorb their own failures
//! where the analysis can continue, and AI insights are strictly
//! optional: a RAG failure yields an empty insight list, never a
//! failed analysis.

pub mod cost;
pub mod progress;
pub mod risk;
pub mod safety;
pub mod weekly;

use crate::rag::{AskOptions, RagPipeline};
use crate::store::ProjectStore;
use crate::workflow_log::WorkflowLog;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::warn;

pub use cost::{CostAnalysisAgent, CostReport};
pub use progress::{ProgressAnalysisAgent, ProgressReport};
pub use risk::{QuickScan, RiskAnalysisAgent, RiskAnalysisResult, RiskItem, RiskLevel};
pub use safety::{SafetyAnalysisAgent, SafetyReport};
pub use weekly::{ReportFormat, WeeklyReport, WeeklyReportAgent, WeeklyReportOutput};

/// Shared dependencies handed to every agent
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn ProjectStore>,
    pub workflow_log: Arc<WorkflowLog>,
    pub rag: Option<Arc<RagPipeline>>,
    /// Reference date for windowed analytics; pinned in tests
    pub as_of: NaiveDate,
}

impl AgentContext {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        workflow_log: Arc<WorkflowLog>,
        rag: Option<Arc<RagPipeline>>,
    ) -> Self {
        Self {
            store,
            workflow_log,
            rag,
            as_of: Utc::now().date_naive(),
        }
    }

    pub fn with_reference_date(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }
}

/// Ask the RAG pipeline for insights with the structured result as
/// extra context. Failures log and yield an empty list.
pub(crate) async fn generate_ai_insights(
    rag: Option<&Arc<RagPipeline>>,
    project_id: &str,
    query: &str,
    context: String,
    max_chars: usize,
) -> Vec<String> {
    let Some(rag) = rag else {
        return Vec::new();
    };

    let options = AskOptions {
        top_k: 3,
        project_id: Some(project_id.to_string()),
        extra_context: Some(context),
        ..Default::default()
    };
    match rag.ask(query, &options).await {
        Ok(response) if !response.metadata.no_result => {
            let text: String = response.answer.chars().take(max_chars).collect();
            text.lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!("AI insight generation failed: {}", e);
            Vec::new()
        }
    }
}
