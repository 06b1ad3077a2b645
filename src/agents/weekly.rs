//! Weekly report agent
//!
//! Collects progress, cost and safety sections concurrently, derives
//! highlights and issues against the shared thresholds, scores the
//! overall risk with weighted sections, and renders the report as
//! Markdown or a structured value.

use crate::agents::{generate_ai_insights, AgentContext};
use crate::error::Result;
use crate::tools::{CostTools, ProgressTools, SafetyTools, TrafficLight};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Section weights for the overall score
const SECTION_WEIGHTS: (f64, f64, f64) = (0.4, 0.35, 0.25);

/// Output format of the rendered report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Markdown,
    Json,
}

/// Progress section of the report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSection {
    pub overall_progress: f64,
    pub planned_progress: f64,
    pub variance: f64,
    pub spi: Option<f64>,
    pub risk_level: TrafficLight,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub delayed_tasks: usize,
    pub critical_delayed: usize,
    pub trend: String,
    pub highlights: Vec<String>,
    pub issues: Vec<String>,
}

/// Cost section of the report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSection {
    pub total_budget: f64,
    pub total_actual: f64,
    pub variance: f64,
    pub variance_rate: f64,
    pub cpi: f64,
    pub budget_usage_rate: f64,
    pub risk_level: TrafficLight,
    pub overrun_items: Vec<String>,
    pub trend: String,
    pub highlights: Vec<String>,
    pub issues: Vec<String>,
}

/// Safety section of the report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetySection {
    pub total_checks: usize,
    pub total_defects: usize,
    pub high_level_defects: usize,
    pub open_defects: usize,
    pub closure_rate: f64,
    pub pass_rate: f64,
    pub risk_level: TrafficLight,
    pub frequent_issues: Vec<String>,
    pub trend: String,
    pub highlights: Vec<String>,
    pub issues: Vec<String>,
}

/// One risk surfaced into the report summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRisk {
    pub category: String,
    pub level: TrafficLight,
    pub description: String,
    pub impact: String,
}

/// One action item with owner and deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub category: String,
    /// 高 | 中
    pub priority: String,
    pub action: String,
    pub owner: String,
    pub deadline: String,
}

/// The structured weekly report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub project_id: String,
    pub project_name: String,
    pub report_date: NaiveDate,
    pub report_period: String,

    pub progress: ProgressSection,
    pub cost: CostSection,
    pub safety: SafetySection,

    pub overall_risk_level: TrafficLight,
    pub overall_score: f64,

    pub key_risks: Vec<KeyRisk>,
    pub action_items: Vec<ActionItem>,
    pub next_week_plans: Vec<String>,
    pub ai_suggestions: Vec<String>,
}

/// Rendered output plus the structured report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyReportOutput {
    pub format: ReportFormat,
    /// Markdown text when format is markdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    pub report: WeeklyReport,
}

/// The weekly report agent
pub struct WeeklyReportAgent {
    context: AgentContext,
}

impl WeeklyReportAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    /// Generate the weekly report for a project
    pub async fn generate(
        &self,
        project_id: &str,
        format: ReportFormat,
        include_ai_suggestions: bool,
    ) -> Result<WeeklyReportOutput> {
        let run = self
            .context
            .workflow_log
            .start(
                project_id,
                "weekly_report",
                &json!({ "project_id": project_id, "format": format }),
            )
            .await;

        match self
            .generate_inner(project_id, format, include_ai_suggestions)
            .await
        {
            Ok(output) => {
                let summary = json!({
                    "overall_risk": output.report.overall_risk_level.as_str(),
                    "overall_score": output.report.overall_score,
                    "key_risks": output.report.key_risks.len(),
                });
                self.context.workflow_log.complete(run, &summary).await;
                Ok(output)
            }
            Err(e) => {
                self.context.workflow_log.fail(run, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn generate_inner(
        &self,
        project_id: &str,
        format: ReportFormat,
        include_ai_suggestions: bool,
    ) -> Result<WeeklyReportOutput> {
        info!("Weekly report generation started for {}", project_id);

        // Project existence gates the whole report
        let overview = ProgressTools::new(self.context.store.clone())
            .with_reference_date(self.context.as_of)
            .project_overview(project_id)
            .await?;

        // The three sections collect concurrently; results merge in
        // declaration order
        let (progress, cost, safety) = tokio::join!(
            self.collect_progress(project_id),
            self.collect_cost(project_id),
            self.collect_safety(project_id),
        );

        let (overall_risk_level, overall_score) =
            evaluate_overall(progress.risk_level, cost.risk_level, safety.risk_level);

        let key_risks = collect_key_risks(&progress, &cost, &safety);
        let action_items = self.generate_action_items(&progress, &cost, &safety);
        let next_week_plans = generate_next_week_plans(&progress, &cost, &safety);

        let mut report = WeeklyReport {
            project_id: project_id.to_string(),
            project_name: overview.project_name,
            report_date: self.context.as_of,
            report_period: format!(
                "{} ~ {}",
                self.context.as_of - Duration::days(7),
                self.context.as_of
            ),
            progress,
            cost,
            safety,
            overall_risk_level,
            overall_score,
            key_risks,
            action_items,
            next_week_plans,
            ai_suggestions: Vec::new(),
        };

        if include_ai_suggestions {
            report.ai_suggestions = self.collect_ai_suggestions(project_id, &report).await;
        }

        let markdown = match format {
            ReportFormat::Markdown => Some(render_markdown(&report)),
            ReportFormat::Json => None,
        };

        info!(
            "Weekly report for {} complete | score: {} | level: {}",
            project_id,
            report.overall_score,
            report.overall_risk_level.as_str()
        );
        Ok(WeeklyReportOutput {
            format,
            markdown,
            report,
        })
    }

    async fn collect_progress(&self, project_id: &str) -> ProgressSection {
        let tools =
            ProgressTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);
        let mut section = ProgressSection::default();

        match tools.project_overview(project_id).await {
            Ok(overview) => {
                section.total_tasks = overview.total_tasks;
                section.completed_tasks = overview.completed_tasks;
                section.delayed_tasks = overview.delayed_tasks;
                section.overall_progress = overview.overall_progress;
            }
            Err(e) => warn!("Progress overview collection failed: {}", e),
        }
        if let Ok(status) = tools.progress_status(project_id).await {
            section.spi = status.overall_spi;
            section.variance = status.variance;
            section.planned_progress = status.avg_planned_progress;
            section.risk_level = status.risk_level;
        }
        if let Ok(critical) = tools.critical_path_tasks(project_id).await {
            section.critical_delayed = critical.iter().filter(|t| t.is_delayed).count();
        }
        if let Ok(trend) = tools.progress_trend(project_id, 14).await {
            section.trend = trend.trend;
        }

        let (highlights, issues) = progress_highlights(&section);
        section.highlights = highlights;
        section.issues = issues;
        section
    }

    async fn collect_cost(&self, project_id: &str) -> CostSection {
        let tools =
            CostTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);
        let mut section = CostSection::default();

        match tools.cost_overview(project_id).await {
            Ok(overview) => {
                section.total_budget = overview.total_budget;
                section.total_actual = overview.total_actual;
                section.variance = overview.variance;
                section.variance_rate = overview.variance_rate;
                section.cpi = overview.cpi;
                section.budget_usage_rate = overview.budget_usage_rate;
                section.risk_level = overview.risk_level;
            }
            Err(e) => warn!("Cost overview collection failed: {}", e),
        }
        if let Ok(overruns) = tools.identify_overruns(project_id, 5.0).await {
            section.overrun_items = overruns
                .iter()
                .take(5)
                .map(|o| format!("{} (+{:.1}%)", o.item, o.variance_rate))
                .collect();
        }
        if let Ok(trend) = tools.cost_trend(project_id, 1).await {
            section.trend = trend.trend;
        }

        let (highlights, issues) = cost_highlights(&section);
        section.highlights = highlights;
        section.issues = issues;
        section
    }

    async fn collect_safety(&self, project_id: &str) -> SafetySection {
        let tools =
            SafetyTools::new(self.context.store.clone()).with_reference_date(self.context.as_of);
        let mut section = SafetySection::default();

        match tools.safety_overview(project_id, 7).await {
            Ok(overview) => {
                section.total_checks = overview.total_checks;
                section.total_defects = overview.total_defects;
                section.high_level_defects = overview.high_level_defects;
                section.open_defects = overview.open_defects;
                section.closure_rate = overview.closure_rate;
                section.pass_rate = overview.pass_rate;
                section.risk_level = overview.risk_level;
            }
            Err(e) => warn!("Safety overview collection failed: {}", e),
        }
        if let Ok(issues) = tools.identify_frequent_issues(project_id, 30).await {
            section.frequent_issues = issues
                .iter()
                .take(3)
                .map(|i| format!("{} ({}次)", i.defect_type, i.total_count))
                .collect();
            section.trend = if issues.iter().any(|i| i.trend == "rising") {
                "恶化".to_string()
            } else {
                "平稳".to_string()
            };
        }

        let (highlights, issues) = safety_highlights(&section);
        section.highlights = highlights;
        section.issues = issues;
        section
    }

    fn generate_action_items(
        &self,
        progress: &ProgressSection,
        cost: &CostSection,
        safety: &SafetySection,
    ) -> Vec<ActionItem> {
        let mut items = Vec::new();

        if progress.delayed_tasks > 0 {
            items.push(ActionItem {
                category: "进度".to_string(),
                priority: if progress.risk_level == TrafficLight::Red {
                    "高"
                } else {
                    "中"
                }
                .to_string(),
                action: "召开进度协调会，分析延期原因并制定赶工计划".to_string(),
                owner: "项目经理".to_string(),
                deadline: "本周内".to_string(),
            });
        }
        if progress.critical_delayed > 0 {
            items.push(ActionItem {
                category: "进度".to_string(),
                priority: "高".to_string(),
                action: "重点关注关键路径任务，增加资源投入".to_string(),
                owner: "项目经理".to_string(),
                deadline: "立即".to_string(),
            });
        }
        if cost.variance_rate > 5.0 {
            items.push(ActionItem {
                category: "成本".to_string(),
                priority: if cost.risk_level == TrafficLight::Red {
                    "高"
                } else {
                    "中"
                }
                .to_string(),
                action: "组织成本分析会，审查超支原因".to_string(),
                owner: "商务经理".to_string(),
                deadline: "本周内".to_string(),
            });
        }
        if safety.high_level_defects > 0 {
            items.push(ActionItem {
                category: "安全".to_string(),
                priority: "高".to_string(),
                action: "立即整改高级别安全隐患，暂停相关作业".to_string(),
                owner: "安全主管".to_string(),
                deadline: "立即".to_string(),
            });
        }
        if safety.open_defects > 5 {
            items.push(ActionItem {
                category: "安全".to_string(),
                priority: "中".to_string(),
                action: "制定整改计划，限期关闭未处理问题".to_string(),
                owner: "安全主管".to_string(),
                deadline: "3天内".to_string(),
            });
        }

        items
    }

    async fn collect_ai_suggestions(&self, project_id: &str, report: &WeeklyReport) -> Vec<String> {
        let context = format!(
            "项目当前状态：进度SPI={:.2}，{}个延期任务；成本CPI={:.2}，偏差率{:.1}%；安全{}个高级别隐患，{}个未关闭问题。",
            report.progress.spi.unwrap_or(1.0),
            report.progress.delayed_tasks,
            report.cost.cpi,
            report.cost.variance_rate,
            report.safety.high_level_defects,
            report.safety.open_defects,
        );

        let mut suggestions = Vec::new();
        let sections: [(&TrafficLight, &str, &str); 3] = [
            (
                &report.progress.risk_level,
                "项目进度延期如何赶工和加速",
                "进度建议",
            ),
            (&report.cost.risk_level, "项目成本超支控制措施", "成本建议"),
            (
                &report.safety.risk_level,
                "施工安全隐患整改措施",
                "安全建议",
            ),
        ];

        for (level, query, label) in sections {
            if *level == TrafficLight::Green {
                continue;
            }
            let lines = generate_ai_insights(
                self.context.rag.as_ref(),
                project_id,
                query,
                context.clone(),
                200,
            )
            .await;
            if let Some(first) = lines.first() {
                suggestions.push(format!("【{}】{}", label, first));
            }
        }
        suggestions
    }
}

/// Weighted section scoring: green 100, yellow 70, red 40, at weights
/// 0.4/0.35/0.25; any red section floors the overall at yellow
fn evaluate_overall(
    progress: TrafficLight,
    cost: TrafficLight,
    safety: TrafficLight,
) -> (TrafficLight, f64) {
    let level_score = |level: TrafficLight| match level {
        TrafficLight::Green => 100.0,
        TrafficLight::Yellow => 70.0,
        TrafficLight::Red => 40.0,
        TrafficLight::Unknown => 70.0,
    };
    let (wp, wc, ws) = SECTION_WEIGHTS;
    let score = level_score(progress) * wp + level_score(cost) * wc + level_score(safety) * ws;

    let mut overall = if score >= 85.0 {
        TrafficLight::Green
    } else if score >= 60.0 {
        TrafficLight::Yellow
    } else {
        TrafficLight::Red
    };

    let any_red = [progress, cost, safety]
        .iter()
        .any(|l| *l == TrafficLight::Red);
    if any_red && overall == TrafficLight::Green {
        overall = TrafficLight::Yellow;
    }

    (overall, (score * 10.0).round() / 10.0)
}

fn progress_highlights(section: &ProgressSection) -> (Vec<String>, Vec<String>) {
    let mut highlights = Vec::new();
    let mut issues = Vec::new();

    if let Some(spi) = section.spi {
        if spi >= 1.05 {
            highlights.push(format!("进度超前，SPI={:.2}", spi));
        }
        if spi < 0.85 {
            issues.push(format!("进度严重滞后，SPI={:.2}", spi));
        }
    }
    if section.total_tasks > 0 {
        let completion = section.completed_tasks as f64 / section.total_tasks as f64 * 100.0;
        if completion >= 80.0 {
            highlights.push(format!("任务完成率高达{:.1}%", completion));
        }
    }
    if section.delayed_tasks > 0 {
        issues.push(format!("存在{}个延期任务", section.delayed_tasks));
    }
    if section.critical_delayed > 0 {
        issues.push(format!(
            "关键路径有{}个任务延期，影响整体工期",
            section.critical_delayed
        ));
    }

    (highlights, issues)
}

fn cost_highlights(section: &CostSection) -> (Vec<String>, Vec<String>) {
    let mut highlights = Vec::new();
    let mut issues = Vec::new();

    if section.cpi >= 1.05 {
        highlights.push(format!("成本控制良好，CPI={:.2}", section.cpi));
    }
    if section.variance < 0.0 {
        highlights.push(format!("实际支出低于计划{:.1}%", section.variance_rate.abs()));
    }
    if section.cpi > 0.0 && section.cpi < 0.85 {
        issues.push(format!("成本严重超支，CPI={:.2}", section.cpi));
    }
    if section.variance_rate > 10.0 {
        issues.push(format!("成本偏差率{:.1}%，超出预警线", section.variance_rate));
    }
    if let Some(top) = section.overrun_items.first() {
        issues.push(format!("{}超支严重", top));
    }

    (highlights, issues)
}

fn safety_highlights(section: &SafetySection) -> (Vec<String>, Vec<String>) {
    let mut highlights = Vec::new();
    let mut issues = Vec::new();

    if section.pass_rate >= 95.0 {
        highlights.push(format!("安全检查合格率{:.1}%", section.pass_rate));
    }
    if section.closure_rate >= 90.0 {
        highlights.push(format!("问题整改及时，关闭率{:.1}%", section.closure_rate));
    }
    if section.high_level_defects == 0 {
        highlights.push("本周无高级别安全隐患".to_string());
    } else {
        issues.push(format!("发现{}个高级别安全隐患", section.high_level_defects));
    }
    if section.open_defects > 5 {
        issues.push(format!("存在{}个未关闭问题", section.open_defects));
    }
    if let Some(top) = section.frequent_issues.first() {
        issues.push(format!("'{}' 问题频发", top));
    }

    (highlights, issues)
}

fn collect_key_risks(
    progress: &ProgressSection,
    cost: &CostSection,
    safety: &SafetySection,
) -> Vec<KeyRisk> {
    let mut risks = Vec::new();

    if progress.risk_level != TrafficLight::Green {
        risks.push(KeyRisk {
            category: "进度".to_string(),
            level: progress.risk_level,
            description: format!(
                "SPI={:.2}，存在{}个延期任务",
                progress.spi.unwrap_or(0.0),
                progress.delayed_tasks
            ),
            impact: "可能影响项目整体工期".to_string(),
        });
    }
    if cost.risk_level != TrafficLight::Green {
        risks.push(KeyRisk {
            category: "成本".to_string(),
            level: cost.risk_level,
            description: format!(
                "CPI={:.2}，成本偏差{:.1}%",
                cost.cpi, cost.variance_rate
            ),
            impact: "可能导致预算超支".to_string(),
        });
    }
    if safety.risk_level != TrafficLight::Green {
        risks.push(KeyRisk {
            category: "安全".to_string(),
            level: safety.risk_level,
            description: format!(
                "存在{}个高级别隐患，{}个未关闭问题",
                safety.high_level_defects, safety.open_defects
            ),
            impact: "可能引发安全事故".to_string(),
        });
    }

    risks.sort_by_key(|r| r.level.severity_rank());
    risks
}

fn generate_next_week_plans(
    progress: &ProgressSection,
    cost: &CostSection,
    safety: &SafetySection,
) -> Vec<String> {
    let mut plans = vec!["继续推进各项施工任务".to_string()];

    if progress.delayed_tasks > 0 {
        plans.push(format!("重点赶工{}个延期任务", progress.delayed_tasks));
    }
    if cost.risk_level != TrafficLight::Green {
        plans.push("加强成本管控，控制非必要支出".to_string());
    }
    if safety.open_defects > 0 {
        plans.push(format!(
            "完成{}项安全整改",
            safety.open_defects.min(5)
        ));
    }
    plans.push("做好安全检查，确保施工安全".to_string());
    plans
}

fn risk_badge(level: TrafficLight) -> &'static str {
    match level {
        TrafficLight::Green => "🟢 正常",
        TrafficLight::Yellow => "🟡 关注",
        TrafficLight::Red => "🔴 预警",
        TrafficLight::Unknown => "⚪ 未知",
    }
}

/// Render the report to Markdown
fn render_markdown(report: &WeeklyReport) -> String {
    let mut md = String::new();

    md.push_str(&format!("# {} 项目周报\n\n", report.project_name));
    md.push_str(&format!("**报告日期**：{}\n\n", report.report_date));
    md.push_str(&format!("**报告周期**：{}\n\n", report.report_period));
    md.push_str(&format!(
        "**综合评分**：{}分 | 风险等级：{}\n\n",
        report.overall_score,
        risk_badge(report.overall_risk_level)
    ));

    md.push_str("## 一、进度情况\n\n");
    md.push_str(&format!(
        "- 整体进度：{:.1}%（计划 {:.1}%）\n- SPI：{}\n- 任务：{} total / {} 完成 / {} 延期\n- 风险等级：{}\n\n",
        report.progress.overall_progress,
        report.progress.planned_progress,
        report
            .progress
            .spi
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "N/A".to_string()),
        report.progress.total_tasks,
        report.progress.completed_tasks,
        report.progress.delayed_tasks,
        risk_badge(report.progress.risk_level)
    ));
    push_list(&mut md, "亮点", &report.progress.highlights);
    push_list(&mut md, "问题", &report.progress.issues);

    md.push_str("## 二、成本情况\n\n");
    md.push_str(&format!(
        "- 预算：{:.0} | 实际支出：{:.0}\n- CPI：{:.2} | 偏差率：{:.1}%\n- 风险等级：{}\n\n",
        report.cost.total_budget,
        report.cost.total_actual,
        report.cost.cpi,
        report.cost.variance_rate,
        risk_badge(report.cost.risk_level)
    ));
    push_list(&mut md, "亮点", &report.cost.highlights);
    push_list(&mut md, "问题", &report.cost.issues);

    md.push_str("## 三、安全情况\n\n");
    md.push_str(&format!(
        "- 检查：{} 次 | 合格率：{:.1}%\n- 隐患：{}（高级别 {}）| 未关闭：{}\n- 风险等级：{}\n\n",
        report.safety.total_checks,
        report.safety.pass_rate,
        report.safety.total_defects,
        report.safety.high_level_defects,
        report.safety.open_defects,
        risk_badge(report.safety.risk_level)
    ));
    push_list(&mut md, "亮点", &report.safety.highlights);
    push_list(&mut md, "问题", &report.safety.issues);

    if !report.key_risks.is_empty() {
        md.push_str("## 四、重点关注\n\n");
        for risk in &report.key_risks {
            md.push_str(&format!(
                "- **{}** [{}]：{}（{}）\n",
                risk.category,
                risk_badge(risk.level),
                risk.description,
                risk.impact
            ));
        }
        md.push('\n');
    }

    if !report.action_items.is_empty() {
        md.push_str("## 五、行动项\n\n");
        md.push_str("| 类别 | 优先级 | 行动 | 责任人 | 期限 |\n|---|---|---|---|---|\n");
        for item in &report.action_items {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                item.category, item.priority, item.action, item.owner, item.deadline
            ));
        }
        md.push('\n');
    }

    md.push_str("## 六、下周计划\n\n");
    for plan in &report.next_week_plans {
        md.push_str(&format!("- {}\n", plan));
    }
    md.push('\n');

    if !report.ai_suggestions.is_empty() {
        md.push_str("## 七、AI建议\n\n");
        for suggestion in &report.ai_suggestions {
            md.push_str(&format!("- {}\n", suggestion));
        }
    }

    md
}

fn push_list(md: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    md.push_str(&format!("**{}**：\n", title));
    for item in items {
        md.push_str(&format!("- {}\n", item));
    }
    md.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_scoring() {
        let (level, score) = evaluate_overall(
            TrafficLight::Green,
            TrafficLight::Green,
            TrafficLight::Green,
        );
        assert_eq!(level, TrafficLight::Green);
        assert_eq!(score, 100.0);

        // 100*0.4 + 70*0.35 + 40*0.25 = 74.5 -> yellow
        let (level, score) = evaluate_overall(
            TrafficLight::Green,
            TrafficLight::Yellow,
            TrafficLight::Red,
        );
        assert_eq!(level, TrafficLight::Yellow);
        assert!((score - 74.5).abs() < 1e-9);
    }

    #[test]
    fn test_red_section_floors_overall_at_yellow() {
        // A single red in the lightest-weighted section: score stays
        // high but the overall can never be green
        let (level, score) = evaluate_overall(
            TrafficLight::Green,
            TrafficLight::Green,
            TrafficLight::Red,
        );
        assert!(score >= 85.0);
        assert_eq!(level, TrafficLight::Yellow);
    }

    #[test]
    fn test_highlights_and_issues() {
        let section = ProgressSection {
            spi: Some(0.8),
            delayed_tasks: 3,
            critical_delayed: 1,
            total_tasks: 10,
            completed_tasks: 9,
            ..Default::default()
        };
        let (highlights, issues) = progress_highlights(&section);
        assert!(highlights.iter().any(|h| h.contains("完成率")));
        assert!(issues.iter().any(|i| i.contains("SPI=0.80")));
        assert!(issues.iter().any(|i| i.contains("关键路径")));
    }

    #[test]
    fn test_markdown_rendering() {
        let report = WeeklyReport {
            project_id: "P001".to_string(),
            project_name: "示范项目".to_string(),
            report_date: NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            report_period: "2026-07-24 ~ 2026-07-31".to_string(),
            progress: ProgressSection {
                spi: Some(0.9),
                delayed_tasks: 2,
                risk_level: TrafficLight::Yellow,
                ..Default::default()
            },
            cost: CostSection {
                cpi: 1.02,
                risk_level: TrafficLight::Green,
                ..Default::default()
            },
            safety: SafetySection {
                pass_rate: 96.0,
                risk_level: TrafficLight::Green,
                ..Default::default()
            },
            overall_risk_level: TrafficLight::Yellow,
            overall_score: 88.0,
            key_risks: vec![],
            action_items: vec![ActionItem {
                category: "进度".to_string(),
                priority: "中".to_string(),
                action: "召开进度协调会".to_string(),
                owner: "项目经理".to_string(),
                deadline: "本周内".to_string(),
            }],
            next_week_plans: vec!["继续推进各项施工任务".to_string()],
            ai_suggestions: vec![],
        };

        let md = render_markdown(&report);
        assert!(md.contains("# 示范项目 项目周报"));
        assert!(md.contains("## 一、进度情况"));
        assert!(md.contains("| 进度 | 中 |"));
        assert!(md.contains("## 六、下周计划"));
    }

    #[test]
    fn test_key_risks_sorted_worst_first() {
        let progress = ProgressSection {
            risk_level: TrafficLight::Yellow,
            spi: Some(0.9),
            ..Default::default()
        };
        let cost = CostSection {
            risk_level: TrafficLight::Red,
            cpi: 0.7,
            ..Default::default()
        };
        let safety = SafetySection {
            risk_level: TrafficLight::Green,
            ..Default::default()
        };
        let risks = collect_key_risks(&progress, &cost, &safety);
        assert_eq!(risks.len(), 2);
        assert_eq!(risks[0].category, "成本");
    }
}
