//! Agent orchestration and workflow-log contract tests

mod common;

use chrono::NaiveDate;
use sitewise::agents::{
    AgentContext, ReportFormat, RiskAnalysisAgent, RiskLevel, WeeklyReportAgent,
};
use sitewise::store::{
    CostRecord, ProjectRecord, ProjectStore, SafetyRecord, SqliteProjectStore, TaskRecord,
};
use sitewise::tools::TrafficLight;
use sitewise::workflow_log::{WorkflowLog, WorkflowStatus};
use std::sync::Arc;

const AS_OF: fn() -> NaiveDate = || NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();

async fn seeded_context() -> (AgentContext, Arc<SqliteProjectStore>) {
    let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
    let workflow_log = Arc::new(WorkflowLog::new(store.pool()).await.unwrap());

    store
        .upsert_project(&ProjectRecord {
            project_id: "P001".to_string(),
            project_name: "示范项目".to_string(),
            project_type: "住宅".to_string(),
            project_manager: "王工".to_string(),
            status: "active".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1),
            planned_end_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            total_budget: 1_000_000.0,
            progress_rate: 40.0,
            cost_rate: 0.5,
        })
        .await
        .unwrap();

    let context = AgentContext::new(store.clone() as Arc<dyn ProjectStore>, workflow_log, None)
        .with_reference_date(AS_OF());
    (context, store)
}

fn task(id: &str, planned: f64, actual: f64, critical: bool) -> TaskRecord {
    TaskRecord {
        task_id: id.to_string(),
        project_id: "P001".to_string(),
        task_name: format!("任务{}", id),
        status: "in_progress".to_string(),
        planned_progress: planned,
        actual_progress: actual,
        is_critical_path: critical,
        planned_start: None,
        planned_end: None,
        updated_at: None,
    }
}

/// Seed so the scans produce two critical risks (progress) and at
/// least one high risk (cost)
async fn seed_risky_project(store: &Arc<SqliteProjectStore>) {
    // SPI 0.5 -> progress critical; two critical-path tasks delayed ->
    // second progress critical
    store.upsert_task(&task("T1", 80.0, 40.0, true)).await.unwrap();
    store.upsert_task(&task("T2", 80.0, 40.0, true)).await.unwrap();

    // Earned value 400k vs actual 500k -> CPI 0.8 -> cost high
    store
        .upsert_cost(&CostRecord {
            cost_id: "C1".to_string(),
            project_id: "P001".to_string(),
            cost_category: "material".to_string(),
            cost_item: "钢筋采购".to_string(),
            planned_amount: 500_000.0,
            actual_amount: 500_000.0,
            cost_date: NaiveDate::from_ymd_opt(2026, 7, 1),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_risk_aggregation_critical_overall() {
    let (context, store) = seeded_context().await;
    seed_risky_project(&store).await;

    let agent = RiskAnalysisAgent::new(context.clone());
    let result = agent.analyze("P001", false, 30).await.unwrap();

    assert!(result.critical_risks >= 2);
    assert_eq!(result.overall_risk_level, RiskLevel::Critical);
    assert!(result.overall_risk_score > 0.0);

    // Top risks ordered by score descending
    for pair in result.top_risks.windows(2) {
        assert!(pair[0].risk_score >= pair[1].risk_score);
    }

    // Critical items in the mitigation plan carry P0 and next-day
    // deadlines
    for item in result
        .mitigation_plan
        .iter()
        .filter(|m| m.priority == "P0")
    {
        assert_eq!(item.deadline, AS_OF() + chrono::Duration::days(1));
    }
    assert!(result
        .mitigation_plan
        .iter()
        .filter(|m| m.priority == "P0")
        .count()
        >= 2);

    // Alerts raised for every critical/high risk
    assert_eq!(
        result.alerts.len(),
        result.critical_risks + result.high_risks
    );
}

#[tokio::test]
async fn test_workflow_log_closes_on_success() {
    let (context, store) = seeded_context().await;
    seed_risky_project(&store).await;

    let agent = RiskAnalysisAgent::new(context.clone());
    agent.analyze("P001", false, 30).await.unwrap();

    let entries = context
        .workflow_log
        .query("P001", Some("risk_analysis"), None, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, WorkflowStatus::Completed);
    assert!(entries[0].end_time.is_some());
}

#[tokio::test]
async fn test_workflow_log_closes_failed_for_missing_project() {
    let (context, _store) = seeded_context().await;

    let agent = RiskAnalysisAgent::new(context.clone());
    let err = agent.analyze("NO_SUCH", false, 30).await.unwrap_err();
    assert_eq!(err.category(), "analytics");

    let entries = context
        .workflow_log
        .query("NO_SUCH", Some("risk_analysis"), None, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, WorkflowStatus::Failed);
    assert!(entries[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("NO_SUCH"));
}

#[tokio::test]
async fn test_quick_scan_levels_and_alerts() {
    let (context, store) = seeded_context().await;
    seed_risky_project(&store).await;

    let agent = RiskAnalysisAgent::new(context);
    let scan = agent.quick_scan("P001").await.unwrap();

    assert_eq!(scan.risk_levels["progress"], TrafficLight::Red);
    assert_eq!(scan.highest_risk_category, "progress");
    assert!(scan.alerts.iter().any(|a| a.contains("进度")));
    assert!(scan.spi.unwrap() < 0.85);
}

#[tokio::test]
async fn test_weekly_report_sections_and_overall() {
    let (context, store) = seeded_context().await;
    seed_risky_project(&store).await;
    // A recent open high defect so the safety section has content
    store
        .insert_safety_record(&SafetyRecord {
            record_id: "S1".to_string(),
            project_id: "P001".to_string(),
            check_date: AS_OF() - chrono::Duration::days(2),
            result: "fail".to_string(),
            defect_type: Some("临边防护缺失".to_string()),
            defect_level: Some("high".to_string()),
            status: "open".to_string(),
            closed_date: None,
            description: None,
        })
        .await
        .unwrap();

    let agent = WeeklyReportAgent::new(context.clone());
    let output = agent
        .generate("P001", ReportFormat::Markdown, false)
        .await
        .unwrap();

    let report = &output.report;
    assert_eq!(report.project_name, "示范项目");
    assert_eq!(report.progress.risk_level, TrafficLight::Red);
    // Progress red floors the overall below green
    assert_ne!(report.overall_risk_level, TrafficLight::Green);
    assert!(!report.key_risks.is_empty());
    assert!(!report.action_items.is_empty());
    assert!(!report.next_week_plans.is_empty());

    let markdown = output.markdown.as_deref().unwrap();
    assert!(markdown.contains("# 示范项目 项目周报"));
    assert!(markdown.contains("## 六、下周计划"));

    // The run closed its log record
    let entries = context
        .workflow_log
        .query("P001", Some("weekly_report"), None, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_weekly_report_json_format() {
    let (context, store) = seeded_context().await;
    seed_risky_project(&store).await;

    let agent = WeeklyReportAgent::new(context);
    let output = agent
        .generate("P001", ReportFormat::Json, false)
        .await
        .unwrap();
    assert!(output.markdown.is_none());
    assert_eq!(output.format, ReportFormat::Json);
    // Structured form serializes cleanly
    let value = serde_json::to_value(&output.report).unwrap();
    assert!(value.get("progress").is_some());
}
