//! Safety analysis agent

use crate::agents::{generate_ai_insights, AgentContext};
use crate::error::Result;
use crate::tools::safety::{
    DefectDistribution, FrequentIssue, OpenDefect, RectificationPhase, SafetyOverview,
    SafetyTools, Urgency,
};
use crate::tools::TrafficLight;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Typed result of a safety analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyReport {
    pub project_id: String,
    pub overview: SafetyOverview,
    pub frequent_issues: Vec<FrequentIssue>,
    pub distribution: DefectDistribution,
    pub open_defects: Vec<OpenDefect>,
    pub urgent_defects: usize,
    pub rectification_plan: Vec<RectificationPhase>,
    pub risk_level: TrafficLight,
    pub suggestions: Vec<String>,
    pub ai_insights: Vec<String>,
}

/// The safety analysis agent
pub struct SafetyAnalysisAgent {
    context: AgentContext,
}

impl SafetyAnalysisAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    pub async fn analyze(
        &self,
        project_id: &str,
        window_days: i64,
        include_ai_insights: bool,
    ) -> Result<SafetyReport> {
        let run = self
            .context
            .workflow_log
            .start(
                project_id,
                "safety_analysis",
                &json!({ "project_id": project_id, "window_days": window_days }),
            )
            .await;

        match self
            .analyze_inner(project_id, window_days, include_ai_insights)
            .await
        {
            Ok(report) => {
                let summary = json!({
                    "risk_level": report.risk_level.as_str(),
                    "open_defects": report.open_defects.len(),
                    "urgent_defects": report.urgent_defects,
                });
                self.context.workflow_log.complete(run, &summary).await;
                Ok(report)
            }
            Err(e) => {
                self.context.workflow_log.fail(run, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn analyze_inner(
        &self,
        project_id: &str,
        window_days: i64,
        include_ai_insights: bool,
    ) -> Result<SafetyReport> {
        info!("Safety analysis started for {}", project_id);
        let tools =
            SafetyTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);

        let overview = tools.safety_overview(project_id, window_days).await?;
        let frequent_issues = tools
            .identify_frequent_issues(project_id, window_days * 2)
            .await?;
        let distribution = tools.defect_distribution(project_id, window_days).await?;
        let open_defects = tools.open_defects(project_id).await?;
        let rectification_plan = tools.rectification_plan(project_id).await?;

        let urgent_defects = open_defects
            .iter()
            .filter(|d| d.urgency == Urgency::Critical)
            .count();
        let risk_level = overview.risk_level;
        let suggestions = build_suggestions(&overview, urgent_defects, &frequent_issues);

        let mut report = SafetyReport {
            project_id: project_id.to_string(),
            overview,
            frequent_issues,
            distribution,
            open_defects,
            urgent_defects,
            rectification_plan,
            risk_level,
            suggestions,
            ai_insights: Vec::new(),
        };

        if include_ai_insights {
            let context = format!(
                "项目安全状态：合格率{:.1}%，高级别隐患{}个，未关闭{}个，紧急{}个。",
                report.overview.pass_rate,
                report.overview.high_level_defects,
                report.overview.open_defects,
                report.urgent_defects,
            );
            report.ai_insights = generate_ai_insights(
                self.context.rag.as_ref(),
                project_id,
                "施工现场安全隐患排查与整改",
                context,
                300,
            )
            .await;
        }

        Ok(report)
    }
}

fn build_suggestions(
    overview: &SafetyOverview,
    urgent: usize,
    frequent: &[FrequentIssue],
) -> Vec<String> {
    let mut suggestions = Vec::new();

    if urgent > 0 {
        suggestions.push(format!("{}项紧急隐患需在3天内闭环", urgent));
    }
    if overview.pass_rate < 90.0 {
        suggestions.push("合格率偏低，建议增加巡检频次并开展安全交底".to_string());
    }
    if let Some(top) = frequent.iter().find(|i| i.trend == "rising") {
        suggestions.push(format!("'{}'问题呈上升趋势，开展专项整治", top.defect_type));
    }
    if suggestions.is_empty() {
        suggestions.push("安全态势平稳，维持现有检查制度".to_string());
    }
    suggestions
}
