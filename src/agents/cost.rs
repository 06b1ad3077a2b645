//! Cost analysis agent

use crate::agents::{generate_ai_insights, AgentContext};
use crate::error::Result;
use crate::tools::cost::{
    BenchmarkComparison, CostByCategory, CostOverrun, CostOverview, CostRisk, CostTools,
    CostTrend, FinalCostPrediction,
};
use crate::tools::TrafficLight;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Typed result of a cost analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostReport {
    pub project_id: String,
    pub overview: CostOverview,
    pub by_category: CostByCategory,
    pub overruns: Vec<CostOverrun>,
    pub prediction: Option<FinalCostPrediction>,
    pub benchmark: Option<BenchmarkComparison>,
    pub trend: Option<CostTrend>,
    pub risks: Vec<CostRisk>,
    pub risk_level: TrafficLight,
    pub suggestions: Vec<String>,
    pub ai_insights: Vec<String>,
}

/// The cost analysis agent
pub struct CostAnalysisAgent {
    context: AgentContext,
}

impl CostAnalysisAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    pub async fn analyze(
        &self,
        project_id: &str,
        include_ai_insights: bool,
    ) -> Result<CostReport> {
        let run = self
            .context
            .workflow_log
            .start(project_id, "cost_analysis", &json!({ "project_id": project_id }))
            .await;

        match self.analyze_inner(project_id, include_ai_insights).await {
            Ok(report) => {
                let summary = json!({
                    "risk_level": report.risk_level.as_str(),
                    "cpi": report.overview.cpi,
                    "overruns": report.overruns.len(),
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
    ) -> Result<CostReport> {
        info!("Cost analysis started for {}", project_id);
        let tools =
            CostTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);

        let overview = tools.cost_overview(project_id).await?;
        let by_category = tools.cost_by_category(project_id).await?;
        let overruns = tools.identify_overruns(project_id, 5.0).await?;
        let prediction = tools.predict_final_cost(project_id).await.ok();
        let benchmark = tools.compare_with_benchmark(project_id).await.ok();
        let trend = tools.cost_trend(project_id, 3).await.ok();
        let risks = tools.identify_risks(project_id).await?;
        let suggestions = tools.control_suggestions(project_id).await?;

        let risk_level = overview.risk_level;
        let mut report = CostReport {
            project_id: project_id.to_string(),
            overview,
            by_category,
            overruns,
            prediction,
            benchmark,
            trend,
            risks,
            risk_level,
            suggestions,
            ai_insights: Vec::new(),
        };

        if include_ai_insights {
            let context = format!(
                "项目成本状态：CPI={:.2}，偏差率{:.1}%，超支项{}个。",
                report.overview.cpi,
                report.overview.variance_rate,
                report.overruns.len(),
            );
            report.ai_insights = generate_ai_insights(
                self.context.rag.as_ref(),
                project_id,
                "工程项目成本控制与纠偏措施",
                context,
                300,
            )
            .await;
        }

        Ok(report)
    }
}
