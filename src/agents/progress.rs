//! Progress analysis agent
//!
//! Runs the progress tool set, applies the shared thresholds, and
//! produces a typed progress report with suggestions and optional AI
//! insights.

use crate::agents::{generate_ai_insights, AgentContext};
use crate::error::Result;
use crate::tools::progress::{
    Bottleneck, CompletionPrediction, CriticalTask, DelayedTask, ProgressOverview,
    ProgressStatus, ProgressTrend, ProgressTools,
};
use crate::tools::TrafficLight;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Typed result of a progress analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub project_id: String,
    pub overview: ProgressOverview,
    pub status: ProgressStatus,
    pub delayed_tasks: Vec<DelayedTask>,
    pub critical_tasks: Vec<CriticalTask>,
    pub trend: Option<ProgressTrend>,
    pub prediction: Option<CompletionPrediction>,
    pub bottlenecks: Vec<Bottleneck>,
    pub risk_level: TrafficLight,
    pub suggestions: Vec<String>,
    pub ai_insights: Vec<String>,
}

/// The progress analysis agent
pub struct ProgressAnalysisAgent {
    context: AgentContext,
}

impl ProgressAnalysisAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    pub async fn analyze(
        &self,
        project_id: &str,
        include_ai_insights: bool,
    ) -> Result<ProgressReport> {
        let run = self
            .context
            .workflow_log
            .start(
                project_id,
                "progress_analysis",
                &json!({ "project_id": project_id }),
            )
            .await;

        match self.analyze_inner(project_id, include_ai_insights).await {
            Ok(report) => {
                let summary = json!({
                    "risk_level": report.risk_level.as_str(),
                    "delayed_tasks": report.delayed_tasks.len(),
                    "bottlenecks": report.bottlenecks.len(),
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
        include_ai_insights: bool,
    ) -> Result<ProgressReport> {
        info!("Progress analysis started for {}", project_id);
        let tools =
            ProgressTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);

        let overview = tools.project_overview(project_id).await?;
        let status = tools.progress_status(project_id).await?;
        let delayed_tasks = tools.delayed_tasks(project_id).await?;
        let critical_tasks = tools.critical_path_tasks(project_id).await?;
        let trend = tools.progress_trend(project_id, 30).await.ok();
        let prediction = tools.predict_completion(project_id).await.ok();
        let bottlenecks = tools.identify_bottlenecks(project_id).await?;

        let risk_level = status.risk_level;
        let suggestions = build_suggestions(&status, &delayed_tasks, &bottlenecks);

        let mut report = ProgressReport {
            project_id: project_id.to_string(),
            overview,
            status,
            delayed_tasks,
            critical_tasks,
            trend,
            prediction,
            bottlenecks,
            risk_level,
            suggestions,
            ai_insights: Vec::new(),
        };

        if include_ai_insights {
            let context = format!(
                "项目进度状态：SPI={}，延期任务{}个，瓶颈{}个。",
                report
                    .status
                    .overall_spi
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "未知".to_string()),
                report.delayed_tasks.len(),
                report.bottlenecks.len(),
            );
            report.ai_insights = generate_ai_insights(
                self.context.rag.as_ref(),
                project_id,
                "项目进度管理与赶工措施",
                context,
                300,
            )
            .await;
        }

        Ok(report)
    }
}

fn build_suggestions(
    status: &ProgressStatus,
    delayed: &[DelayedTask],
    bottlenecks: &[Bottleneck],
) -> Vec<String> {
    let mut suggestions = Vec::new();

    match status.risk_level {
        TrafficLight::Red => {
            suggestions.push("进度严重滞后，建议立即召开专题会并重排计划".to_string())
        }
        TrafficLight::Yellow => {
            suggestions.push("进度略有滞后，建议加密进度跟踪频次".to_string())
        }
        _ => {}
    }
    if delayed.iter().any(|t| t.is_critical_path) {
        suggestions.push("关键路径任务延期，优先倾斜资源".to_string());
    }
    if !bottlenecks.is_empty() {
        suggestions.push(format!("存在{}个瓶颈任务，逐项制定解决方案", bottlenecks.len()));
    }
    if suggestions.is_empty() {
        suggestions.push("进度整体可控，保持当前管理节奏".to_string());
    }
    suggestions
}
