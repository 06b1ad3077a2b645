//! Risk analysis agent
//!
//! Runs three scan passes (progress, cost, safety), quantifies each
//! finding as probability × impact, aggregates an overall level and
//! score, raises alerts for critical/high findings, ranks the top
//! risks and derives a mitigation plan with deadlines and owners.

use crate::agents::{generate_ai_insights, AgentContext};
use crate::error::Result;
use crate::tools::{CostTools, ProgressTools, SafetyTools, TrafficLight};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

/// Documented thresholds the scans apply
pub mod thresholds {
    pub const SPI_CRITICAL: f64 = 0.75;
    pub const SPI_HIGH: f64 = 0.85;
    pub const SPI_MEDIUM: f64 = 0.95;
    pub const DELAYED_TASKS_CRITICAL: usize = 10;
    pub const DELAYED_TASKS_HIGH: usize = 5;
    pub const CRITICAL_PATH_DELAYED: usize = 2;
    pub const PREDICTED_DELAY_DAYS_HIGH: i64 = 30;

    pub const CPI_CRITICAL: f64 = 0.75;
    pub const CPI_HIGH: f64 = 0.85;
    pub const CPI_MEDIUM: f64 = 0.95;
    pub const VARIANCE_RATE_CRITICAL: f64 = 15.0;
    pub const VARIANCE_RATE_HIGH: f64 = 10.0;
    pub const OVERRUN_RATE_HIGH: f64 = 10.0;

    pub const HIGH_DEFECTS_CRITICAL: usize = 5;
    pub const HIGH_DEFECTS_HIGH: usize = 3;
    pub const OPEN_DEFECTS_CRITICAL: usize = 15;
    pub const OPEN_DEFECTS_HIGH: usize = 10;
    pub const PASS_RATE_CRITICAL: f64 = 80.0;
    pub const PASS_RATE_HIGH: f64 = 90.0;
}

/// Risk severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }

    /// Weight used when aggregating the overall score
    pub fn weight(&self) -> f64 {
        match self {
            RiskLevel::Critical => 1.0,
            RiskLevel::High => 0.7,
            RiskLevel::Medium => 0.4,
            RiskLevel::Low => 0.1,
        }
    }

    /// Mitigation deadline in days
    fn deadline_days(&self) -> i64 {
        match self {
            RiskLevel::Critical => 1,
            RiskLevel::High => 3,
            RiskLevel::Medium => 7,
            RiskLevel::Low => 14,
        }
    }

    fn priority(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "P0",
            RiskLevel::High => "P1",
            RiskLevel::Medium => "P2",
            RiskLevel::Low => "P3",
        }
    }
}

/// One identified risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskItem {
    pub risk_id: String,
    /// progress | cost | safety
    pub category: String,
    pub level: RiskLevel,
    pub title: String,
    pub description: String,
    pub impact: String,
    /// Occurrence probability in [0, 1]
    pub probability: f64,
    /// Impact magnitude in [0, 1]
    pub impact_score: f64,
    /// probability × impact_score
    pub risk_score: f64,
    pub indicators: serde_json::Value,
    pub recommendations: Vec<String>,
}

/// A raised alert for a critical/high risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub alert_id: String,
    pub risk_id: String,
    pub level: RiskLevel,
    pub title: String,
    pub message: String,
}

/// Direction of a risk dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTrend {
    pub category: String,
    /// improving | stable | deteriorating | unknown
    pub trend: String,
    pub key_changes: Vec<String>,
}

/// One mitigation plan entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationItem {
    pub risk_id: String,
    pub risk_title: String,
    pub priority: String,
    pub owner: String,
    pub actions: Vec<String>,
    pub deadline: NaiveDate,
}

/// Full risk analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysisResult {
    pub project_id: String,
    pub project_name: String,
    pub analysis_date: NaiveDate,
    pub analysis_days: i64,

    pub total_risks: usize,
    pub critical_risks: usize,
    pub high_risks: usize,
    pub medium_risks: usize,
    pub low_risks: usize,

    pub overall_risk_level: RiskLevel,
    /// Normalized to [0, 100]
    pub overall_risk_score: f64,

    pub progress_risks: Vec<RiskItem>,
    pub cost_risks: Vec<RiskItem>,
    pub safety_risks: Vec<RiskItem>,

    pub alerts: Vec<RiskAlert>,
    pub trends: Vec<RiskTrend>,
    pub top_risks: Vec<RiskItem>,
    pub mitigation_plan: Vec<MitigationItem>,
    pub ai_insights: Vec<String>,
}

/// Lightweight per-dimension scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickScan {
    pub project_id: String,
    pub risk_levels: std::collections::BTreeMap<String, TrafficLight>,
    pub highest_risk_category: String,
    pub highest_risk_level: TrafficLight,
    pub alerts: Vec<String>,
    pub spi: Option<f64>,
    pub cpi: Option<f64>,
    pub safety_pass_rate: Option<f64>,
}

/// Draft of a risk before ids are assigned
struct RiskDraft {
    category: &'static str,
    level: RiskLevel,
    title: String,
    description: String,
    impact: String,
    probability: f64,
    impact_score: f64,
    indicators: serde_json::Value,
    recommendations: Vec<String>,
}

impl RiskDraft {
    fn into_item(self, seq: usize) -> RiskItem {
        let risk_score = (self.probability * self.impact_score * 100.0).round() / 100.0;
        RiskItem {
            risk_id: format!("RISK-{:04}", seq),
            category: self.category.to_string(),
            level: self.level,
            title: self.title,
            description: self.description,
            impact: self.impact,
            probability: self.probability,
            impact_score: self.impact_score,
            risk_score,
            indicators: self.indicators,
            recommendations: self.recommendations,
        }
    }
}

/// The risk analysis agent
pub struct RiskAnalysisAgent {
    context: AgentContext,
}

impl RiskAnalysisAgent {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    fn progress_tools(&self) -> ProgressTools {
        ProgressTools::new(self.context.store.clone()).with_reference_date(self.context.as_of)
    }

    fn cost_tools(&self) -> CostTools {
        CostTools::new(self.context.store.clone()).with_reference_date(self.context.as_of)
    }

    fn safety_tools(&self) -> SafetyTools {
        SafetyTools::new(self.context.store.clone()).with_reference_date(self.context.as_of)
    }

    /// Run the full risk analysis workflow
    pub async fn analyze(
        &self,
        project_id: &str,
        include_ai_insights: bool,
        historical_days: i64,
    ) -> Result<RiskAnalysisResult> {
        let run = self
            .context
            .workflow_log
            .start(project_id, "risk_analysis", &json!({ "project_id": project_id }))
            .await;

        match self
            .analyze_inner(project_id, include_ai_insights, historical_days)
            .await
        {
            Ok(result) => {
                let summary = json!({
                    "total_risks": result.total_risks,
                    "overall_level": result.overall_risk_level.as_str(),
                    "alerts_count": result.alerts.len(),
                });
                self.context.workflow_log.complete(run, &summary).await;
                Ok(result)
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
        historical_days: i64,
    ) -> Result<RiskAnalysisResult> {
        info!("Risk analysis started for {}", project_id);

        let overview = self.progress_tools().project_overview(project_id).await?;

        // Three scan passes in parallel; each absorbs tool failures
        let (progress_drafts, cost_drafts, safety_drafts) = tokio::join!(
            self.scan_progress(project_id),
            self.scan_cost(project_id),
            self.scan_safety(project_id),
        );

        // Ids are assigned in declaration order so the merged output is
        // deterministic regardless of scan completion order
        let mut seq = 0usize;
        let mut assign = |drafts: Vec<RiskDraft>| -> Vec<RiskItem> {
            drafts
                .into_iter()
                .map(|d| {
                    seq += 1;
                    d.into_item(seq)
                })
                .collect()
        };
        let progress_risks = assign(progress_drafts);
        let cost_risks = assign(cost_drafts);
        let safety_risks = assign(safety_drafts);

        let all: Vec<&RiskItem> = progress_risks
            .iter()
            .chain(&cost_risks)
            .chain(&safety_risks)
            .collect();

        let count_level = |level: RiskLevel| all.iter().filter(|r| r.level == level).count();
        let critical_count = count_level(RiskLevel::Critical);
        let high_count = count_level(RiskLevel::High);

        let (overall_risk_level, overall_risk_score) = aggregate_overall(&all);

        let alerts: Vec<RiskAlert> = all
            .iter()
            .filter(|r| matches!(r.level, RiskLevel::Critical | RiskLevel::High))
            .map(|r| RiskAlert {
                alert_id: format!("ALERT-{}", r.risk_id),
                risk_id: r.risk_id.clone(),
                level: r.level,
                title: format!("【{}】{}", r.level.as_str().to_uppercase(), r.title),
                message: r.description.clone(),
            })
            .collect();

        let trends = self.analyze_trends(project_id, historical_days).await;

        let mut top_risks: Vec<RiskItem> = all.iter().map(|r| (*r).clone()).collect();
        top_risks.sort_by(|a, b| {
            b.risk_score
                .partial_cmp(&a.risk_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.risk_id.cmp(&b.risk_id))
        });
        top_risks.truncate(5);

        let mitigation_plan = self.build_mitigation_plan(&top_risks);

        let mut result = RiskAnalysisResult {
            project_id: project_id.to_string(),
            project_name: overview.project_name,
            analysis_date: self.context.as_of,
            analysis_days: historical_days,
            total_risks: all.len(),
            critical_risks: critical_count,
            high_risks: high_count,
            medium_risks: count_level(RiskLevel::Medium),
            low_risks: count_level(RiskLevel::Low),
            overall_risk_level,
            overall_risk_score,
            progress_risks,
            cost_risks,
            safety_risks,
            alerts,
            trends,
            top_risks,
            mitigation_plan,
            ai_insights: Vec::new(),
        };

        if include_ai_insights {
            let context = format!(
                "项目风险概况：总风险数{}，紧急{}，高{}，综合等级{}。主要问题：{}",
                result.total_risks,
                result.critical_risks,
                result.high_risks,
                result.overall_risk_level.as_str(),
                result
                    .top_risks
                    .iter()
                    .take(3)
                    .map(|r| r.title.as_str())
                    .collect::<Vec<_>>()
                    .join("，"),
            );
            result.ai_insights = generate_ai_insights(
                self.context.rag.as_ref(),
                project_id,
                "项目风险管理最佳实践和应对措施",
                context,
                300,
            )
            .await;
        }

        info!(
            "Risk analysis complete for {} | risks: {} | level: {}",
            project_id,
            result.total_risks,
            result.overall_risk_level.as_str()
        );
        Ok(result)
    }

    async fn scan_progress(&self, project_id: &str) -> Vec<RiskDraft> {
        use thresholds::*;
        let tools = self.progress_tools();
        let mut risks = Vec::new();

        let status = match tools.progress_status(project_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Progress scan skipped: {}", e);
                return risks;
            }
        };

        if let Some(spi) = status.overall_spi {
            if spi < SPI_CRITICAL {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::Critical,
                    title: "进度严重滞后".to_string(),
                    description: format!("SPI={:.2}，远低于计划进度", spi),
                    impact: "项目可能无法按时完成，需要大幅调整计划".to_string(),
                    probability: 0.9,
                    impact_score: 0.9,
                    indicators: json!({ "spi": spi }),
                    recommendations: vec![
                        "立即召开进度协调会".to_string(),
                        "增加资源投入或调整计划".to_string(),
                        "考虑缩减范围或延期".to_string(),
                    ],
                });
            } else if spi < SPI_HIGH {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::High,
                    title: "进度明显落后".to_string(),
                    description: format!("SPI={:.2}，进度落后于计划", spi),
                    impact: "可能导致项目延期".to_string(),
                    probability: 0.7,
                    impact_score: 0.7,
                    indicators: json!({ "spi": spi }),
                    recommendations: vec![
                        "分析延期原因".to_string(),
                        "制定赶工计划".to_string(),
                        "优化资源配置".to_string(),
                    ],
                });
            } else if spi < SPI_MEDIUM {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::Medium,
                    title: "进度轻微落后".to_string(),
                    description: format!("SPI={:.2}，略低于计划", spi),
                    impact: "需要关注，防止进一步恶化".to_string(),
                    probability: 0.5,
                    impact_score: 0.5,
                    indicators: json!({ "spi": spi }),
                    recommendations: vec![
                        "持续监控进度".to_string(),
                        "及时处理延期任务".to_string(),
                    ],
                });
            }
        }

        if let Ok(overview) = tools.project_overview(project_id).await {
            let delayed = overview.delayed_tasks;
            if delayed >= DELAYED_TASKS_CRITICAL {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::Critical,
                    title: "大量任务延期".to_string(),
                    description: format!("共有{}个任务延期", delayed),
                    impact: "项目进度失控风险".to_string(),
                    probability: 0.85,
                    impact_score: 0.8,
                    indicators: json!({ "delayed_tasks": delayed }),
                    recommendations: vec![
                        "逐一分析延期原因".to_string(),
                        "重新评估任务优先级".to_string(),
                    ],
                });
            } else if delayed >= DELAYED_TASKS_HIGH {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::High,
                    title: "多个任务延期".to_string(),
                    description: format!("共有{}个任务延期", delayed),
                    impact: "可能影响后续任务".to_string(),
                    probability: 0.65,
                    impact_score: 0.6,
                    indicators: json!({ "delayed_tasks": delayed }),
                    recommendations: vec![
                        "重点关注延期任务".to_string(),
                        "加强进度跟踪".to_string(),
                    ],
                });
            }
        }

        if let Ok(critical_tasks) = tools.critical_path_tasks(project_id).await {
            let critical_delayed = critical_tasks.iter().filter(|t| t.is_delayed).count();
            if critical_delayed >= CRITICAL_PATH_DELAYED {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::Critical,
                    title: "关键路径任务延期".to_string(),
                    description: format!("关键路径上有{}个任务延期", critical_delayed),
                    impact: "直接影响项目完成日期".to_string(),
                    probability: 0.95,
                    impact_score: 0.95,
                    indicators: json!({ "critical_delayed": critical_delayed }),
                    recommendations: vec![
                        "优先保障关键路径资源".to_string(),
                        "考虑赶工或快速跟进".to_string(),
                    ],
                });
            }
        }

        if let Ok(prediction) = tools.predict_completion(project_id).await {
            if prediction.predicted_delay_days > PREDICTED_DELAY_DAYS_HIGH {
                risks.push(RiskDraft {
                    category: "progress",
                    level: RiskLevel::High,
                    title: "预计项目延期".to_string(),
                    description: format!(
                        "按当前进度预测将延期约{}天",
                        prediction.predicted_delay_days
                    ),
                    impact: "需要提前沟通和调整计划".to_string(),
                    probability: 0.7,
                    impact_score: 0.7,
                    indicators: json!({ "predicted_delay_days": prediction.predicted_delay_days }),
                    recommendations: vec![
                        "提前与相关方沟通".to_string(),
                        "评估加速可能性".to_string(),
                    ],
                });
            }
        }

        risks
    }

    async fn scan_cost(&self, project_id: &str) -> Vec<RiskDraft> {
        use thresholds::*;
        let tools = self.cost_tools();
        let mut risks = Vec::new();

        let overview = match tools.cost_overview(project_id).await {
            Ok(overview) => overview,
            Err(e) => {
                warn!("Cost scan skipped: {}", e);
                return risks;
            }
        };

        let cpi = overview.cpi;
        if cpi > 0.0 {
            if cpi < CPI_CRITICAL {
                risks.push(RiskDraft {
                    category: "cost",
                    level: RiskLevel::Critical,
                    title: "成本严重超支".to_string(),
                    description: format!("CPI={:.2}，成本控制失效", cpi),
                    impact: "项目预算可能大幅超支".to_string(),
                    probability: 0.9,
                    impact_score: 0.9,
                    indicators: json!({ "cpi": cpi, "variance_rate": overview.variance_rate }),
                    recommendations: vec![
                        "立即开展成本审计".to_string(),
                        "暂停非必要支出".to_string(),
                        "申请追加预算或调整范围".to_string(),
                    ],
                });
            } else if cpi < CPI_HIGH {
                risks.push(RiskDraft {
                    category: "cost",
                    level: RiskLevel::High,
                    title: "成本超支风险".to_string(),
                    description: format!("CPI={:.2}，成本超出计划", cpi),
                    impact: "预算可能不足".to_string(),
                    probability: 0.7,
                    impact_score: 0.7,
                    indicators: json!({ "cpi": cpi }),
                    recommendations: vec![
                        "分析超支原因".to_string(),
                        "加强成本控制".to_string(),
                    ],
                });
            } else if cpi < CPI_MEDIUM {
                risks.push(RiskDraft {
                    category: "cost",
                    level: RiskLevel::Medium,
                    title: "成本偏差".to_string(),
                    description: format!("CPI={:.2}，成本略有超支", cpi),
                    impact: "需要加强监控".to_string(),
                    probability: 0.5,
                    impact_score: 0.5,
                    indicators: json!({ "cpi": cpi }),
                    recommendations: vec!["加强成本监控".to_string(), "控制变更".to_string()],
                });
            }
        }

        let variance_rate = overview.variance_rate.abs();
        if variance_rate >= VARIANCE_RATE_CRITICAL {
            risks.push(RiskDraft {
                category: "cost",
                level: RiskLevel::Critical,
                title: "成本偏差严重".to_string(),
                description: format!("成本偏差率{:.1}%", variance_rate),
                impact: "预算控制失败风险".to_string(),
                probability: 0.85,
                impact_score: 0.85,
                indicators: json!({ "variance_rate": variance_rate }),
                recommendations: vec![
                    "深入分析偏差来源".to_string(),
                    "制定成本削减计划".to_string(),
                ],
            });
        } else if variance_rate >= VARIANCE_RATE_HIGH {
            risks.push(RiskDraft {
                category: "cost",
                level: RiskLevel::High,
                title: "成本偏差较大".to_string(),
                description: format!("成本偏差率{:.1}%", variance_rate),
                impact: "预算压力增大".to_string(),
                probability: 0.65,
                impact_score: 0.65,
                indicators: json!({ "variance_rate": variance_rate }),
                recommendations: vec![
                    "严格控制支出".to_string(),
                    "审查合同和变更".to_string(),
                ],
            });
        }

        if let Ok(prediction) = tools.predict_final_cost(project_id).await {
            if prediction.will_exceed_budget
                && prediction.predicted_overrun_rate > OVERRUN_RATE_HIGH
            {
                risks.push(RiskDraft {
                    category: "cost",
                    level: RiskLevel::High,
                    title: "预计预算超支".to_string(),
                    description: format!(
                        "预计最终超支{:.1}%",
                        prediction.predicted_overrun_rate
                    ),
                    impact: "需要提前申请追加预算".to_string(),
                    probability: 0.75,
                    impact_score: 0.7,
                    indicators: json!({ "predicted_overrun_rate": prediction.predicted_overrun_rate }),
                    recommendations: vec![
                        "提前申请预算调整".to_string(),
                        "评估范围缩减可能".to_string(),
                    ],
                });
            }
        }

        risks
    }

    async fn scan_safety(&self, project_id: &str) -> Vec<RiskDraft> {
        use thresholds::*;
        let tools = self.safety_tools();
        let mut risks = Vec::new();

        let overview = match tools.safety_overview(project_id, 30).await {
            Ok(overview) => overview,
            Err(e) => {
                warn!("Safety scan skipped: {}", e);
                return risks;
            }
        };

        let high = overview.high_level_defects;
        if high >= HIGH_DEFECTS_CRITICAL {
            risks.push(RiskDraft {
                category: "safety",
                level: RiskLevel::Critical,
                title: "高级别安全隐患严重".to_string(),
                description: format!("存在{}个高级别安全隐患", high),
                impact: "可能引发安全事故".to_string(),
                probability: 0.9,
                impact_score: 0.95,
                indicators: json!({ "high_defects": high }),
                recommendations: vec![
                    "立即停工整改高危隐患".to_string(),
                    "召开安全专题会议".to_string(),
                ],
            });
        } else if high >= HIGH_DEFECTS_HIGH {
            risks.push(RiskDraft {
                category: "safety",
                level: RiskLevel::High,
                title: "高级别安全隐患".to_string(),
                description: format!("存在{}个高级别安全隐患", high),
                impact: "安全风险较高".to_string(),
                probability: 0.7,
                impact_score: 0.8,
                indicators: json!({ "high_defects": high }),
                recommendations: vec![
                    "优先整改高级别隐患".to_string(),
                    "加强安全教育培训".to_string(),
                ],
            });
        }

        let open = overview.open_defects;
        if open >= OPEN_DEFECTS_CRITICAL {
            risks.push(RiskDraft {
                category: "safety",
                level: RiskLevel::Critical,
                title: "安全问题积压严重".to_string(),
                description: format!("有{}个安全问题未关闭", open),
                impact: "安全管理失控风险".to_string(),
                probability: 0.8,
                impact_score: 0.8,
                indicators: json!({ "open_defects": open }),
                recommendations: vec![
                    "制定整改攻坚计划".to_string(),
                    "落实整改责任人".to_string(),
                ],
            });
        } else if open >= OPEN_DEFECTS_HIGH {
            risks.push(RiskDraft {
                category: "safety",
                level: RiskLevel::High,
                title: "安全问题积压".to_string(),
                description: format!("有{}个安全问题未关闭", open),
                impact: "需要加快整改进度".to_string(),
                probability: 0.65,
                impact_score: 0.65,
                indicators: json!({ "open_defects": open }),
                recommendations: vec![
                    "加快整改进度".to_string(),
                    "增加整改资源".to_string(),
                ],
            });
        }

        let pass_rate = overview.pass_rate;
        if overview.total_checks > 0 {
            if pass_rate < PASS_RATE_CRITICAL {
                risks.push(RiskDraft {
                    category: "safety",
                    level: RiskLevel::Critical,
                    title: "安全合格率过低".to_string(),
                    description: format!("安全检查合格率仅{:.1}%", pass_rate),
                    impact: "现场安全管理严重不足".to_string(),
                    probability: 0.85,
                    impact_score: 0.85,
                    indicators: json!({ "pass_rate": pass_rate }),
                    recommendations: vec![
                        "开展全面安全整治".to_string(),
                        "追究安全责任".to_string(),
                    ],
                });
            } else if pass_rate < PASS_RATE_HIGH {
                risks.push(RiskDraft {
                    category: "safety",
                    level: RiskLevel::High,
                    title: "安全合格率偏低".to_string(),
                    description: format!("安全检查合格率{:.1}%", pass_rate),
                    impact: "安全管理需要加强".to_string(),
                    probability: 0.6,
                    impact_score: 0.6,
                    indicators: json!({ "pass_rate": pass_rate }),
                    recommendations: vec![
                        "加强现场安全管理".to_string(),
                        "完善安全制度".to_string(),
                    ],
                });
            }
        }

        if let Ok(frequent) = tools.identify_frequent_issues(project_id, 60).await {
            for issue in frequent.iter().take(2) {
                if issue.trend == "rising" && issue.total_count > 5 {
                    risks.push(RiskDraft {
                        category: "safety",
                        level: RiskLevel::High,
                        title: format!("'{}'问题频发", issue.defect_type),
                        description: format!(
                            "该类问题出现{}次且呈上升趋势",
                            issue.total_count
                        ),
                        impact: "系统性安全管理漏洞".to_string(),
                        probability: 0.7,
                        impact_score: 0.65,
                        indicators: json!({
                            "defect_type": issue.defect_type,
                            "count": issue.total_count,
                        }),
                        recommendations: vec![
                            format!("专项整治'{}'问题", issue.defect_type),
                            "分析根本原因".to_string(),
                        ],
                    });
                }
            }
        }

        risks
    }

    async fn analyze_trends(&self, project_id: &str, days: i64) -> Vec<RiskTrend> {
        let mut trends = Vec::new();

        if let Ok(trend) = self.progress_tools().progress_trend(project_id, days).await {
            trends.push(RiskTrend {
                category: "progress".to_string(),
                trend: trend.trend.clone(),
                key_changes: vec![format!("高风险任务数: {}", trend.high_risk_tasks)],
            });
        }
        if let Ok(trend) = self.cost_tools().cost_trend(project_id, 1).await {
            trends.push(RiskTrend {
                category: "cost".to_string(),
                trend: match trend.trend.as_str() {
                    "rising" => "deteriorating",
                    "falling" => "improving",
                    "stable" => "stable",
                    _ => "unknown",
                }
                .to_string(),
                key_changes: vec![format!("成本增长率: {:.1}%", trend.growth_rate)],
            });
        }
        if let Ok(issues) = self
            .safety_tools()
            .identify_frequent_issues(project_id, days)
            .await
        {
            let rising = issues.iter().filter(|i| i.trend == "rising").count();
            trends.push(RiskTrend {
                category: "safety".to_string(),
                trend: if rising > 0 { "deteriorating" } else { "stable" }.to_string(),
                key_changes: vec![format!("上升趋势的隐患类型: {}", rising)],
            });
        }

        trends
    }

    fn build_mitigation_plan(&self, top_risks: &[RiskItem]) -> Vec<MitigationItem> {
        top_risks
            .iter()
            .map(|risk| MitigationItem {
                risk_id: risk.risk_id.clone(),
                risk_title: risk.title.clone(),
                priority: risk.level.priority().to_string(),
                owner: owner_for_category(&risk.category).to_string(),
                actions: risk.recommendations.clone(),
                deadline: self.context.as_of + Duration::days(risk.level.deadline_days()),
            })
            .collect()
    }

    /// Lightweight scan: per-dimension traffic lights, alerts and the
    /// headline metrics only
    pub async fn quick_scan(&self, project_id: &str) -> Result<QuickScan> {
        let progress_tools = self.progress_tools();
        let cost_tools = self.cost_tools();
        let safety_tools = self.safety_tools();
        let (progress, cost, safety) = tokio::join!(
            progress_tools.progress_status(project_id),
            cost_tools.cost_overview(project_id),
            safety_tools.safety_overview(project_id, 7),
        );

        let progress_level = progress
            .as_ref()
            .map(|p| p.risk_level)
            .unwrap_or(TrafficLight::Unknown);
        let cost_level = cost
            .as_ref()
            .map(|c| c.risk_level)
            .unwrap_or(TrafficLight::Unknown);
        let safety_level = safety
            .as_ref()
            .map(|s| s.risk_level)
            .unwrap_or(TrafficLight::Unknown);

        let mut risk_levels = std::collections::BTreeMap::new();
        risk_levels.insert("progress".to_string(), progress_level);
        risk_levels.insert("cost".to_string(), cost_level);
        risk_levels.insert("safety".to_string(), safety_level);

        let (highest_category, highest_level) = [
            ("progress", progress_level),
            ("cost", cost_level),
            ("safety", safety_level),
        ]
        .into_iter()
        .min_by_key(|(_, level)| level.severity_rank())
        .unwrap_or(("progress", TrafficLight::Unknown));

        let mut alerts = Vec::new();
        if progress_level == TrafficLight::Red {
            alerts.push("进度严重滞后".to_string());
        }
        if cost_level == TrafficLight::Red {
            alerts.push("成本严重超支".to_string());
        }
        if safety_level == TrafficLight::Red {
            alerts.push("安全隐患严重".to_string());
        }

        Ok(QuickScan {
            project_id: project_id.to_string(),
            risk_levels,
            highest_risk_category: highest_category.to_string(),
            highest_risk_level: highest_level,
            alerts,
            spi: progress.ok().and_then(|p| p.overall_spi),
            cpi: cost.ok().map(|c| c.cpi),
            safety_pass_rate: safety.ok().map(|s| s.pass_rate),
        })
    }
}

fn owner_for_category(category: &str) -> &'static str {
    match category {
        "progress" => "项目经理",
        "cost" => "商务经理",
        "safety" => "安全主管",
        _ => "项目经理",
    }
}

/// Weighted contributions that saturate the 0-100 scale: five
/// full-weight critical risks. A fixed capacity keeps the score
/// monotone under adding risks, which a per-count average would not be.
const RISK_SCORE_CAPACITY: f64 = 5.0;

/// Overall level and normalized score from the full risk set.
///
/// Score = Σ risk_score × level_weight, normalized to [0, 100]. Level
/// escalates with critical/high counts.
fn aggregate_overall(risks: &[&RiskItem]) -> (RiskLevel, f64) {
    if risks.is_empty() {
        return (RiskLevel::Low, 0.0);
    }

    let total: f64 = risks.iter().map(|r| r.risk_score * r.level.weight()).sum();
    let normalized = (total / RISK_SCORE_CAPACITY).min(1.0);
    let score = (normalized * 1000.0).round() / 10.0;

    let critical = risks
        .iter()
        .filter(|r| r.level == RiskLevel::Critical)
        .count();
    let high = risks.iter().filter(|r| r.level == RiskLevel::High).count();

    let level = if critical >= 2 || (critical >= 1 && high >= 2) {
        RiskLevel::Critical
    } else if critical >= 1 || high >= 3 {
        RiskLevel::High
    } else if high >= 1 || normalized > 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    (level, score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk(level: RiskLevel, score: f64) -> RiskItem {
        RiskItem {
            risk_id: format!("RISK-{:.2}", score),
            category: "progress".to_string(),
            level,
            title: "t".to_string(),
            description: "d".to_string(),
            impact: "i".to_string(),
            probability: score.sqrt(),
            impact_score: score.sqrt(),
            risk_score: score,
            indicators: json!({}),
            recommendations: vec![],
        }
    }

    #[test]
    fn test_overall_level_rules() {
        let risks = vec![
            risk(RiskLevel::Critical, 0.81),
            risk(RiskLevel::Critical, 0.81),
            risk(RiskLevel::High, 0.49),
        ];
        let refs: Vec<&RiskItem> = risks.iter().collect();
        let (level, score) = aggregate_overall(&refs);
        assert_eq!(level, RiskLevel::Critical);
        assert!(score > 0.0 && score <= 100.0);

        let risks = vec![risk(RiskLevel::Critical, 0.81), risk(RiskLevel::Low, 0.05)];
        let refs: Vec<&RiskItem> = risks.iter().collect();
        assert_eq!(aggregate_overall(&refs).0, RiskLevel::High);

        let risks = vec![risk(RiskLevel::High, 0.49)];
        let refs: Vec<&RiskItem> = risks.iter().collect();
        assert_eq!(aggregate_overall(&refs).0, RiskLevel::Medium);

        let risks = vec![risk(RiskLevel::Low, 0.05)];
        let refs: Vec<&RiskItem> = risks.iter().collect();
        assert_eq!(aggregate_overall(&refs).0, RiskLevel::Low);
    }

    #[test]
    fn test_adding_critical_risk_is_monotonic() {
        let base = vec![risk(RiskLevel::High, 0.49), risk(RiskLevel::Medium, 0.25)];
        let refs: Vec<&RiskItem> = base.iter().collect();
        let (level_before, score_before) = aggregate_overall(&refs);

        let mut grown = base.clone();
        grown.push(risk(RiskLevel::Critical, 0.9));
        let refs: Vec<&RiskItem> = grown.iter().collect();
        let (level_after, score_after) = aggregate_overall(&refs);

        let rank = |level: RiskLevel| match level {
            RiskLevel::Critical => 3,
            RiskLevel::High => 2,
            RiskLevel::Medium => 1,
            RiskLevel::Low => 0,
        };
        assert!(rank(level_after) >= rank(level_before));
        assert!(score_after >= score_before);
    }

    #[test]
    fn test_empty_set_is_low() {
        assert_eq!(aggregate_overall(&[]), (RiskLevel::Low, 0.0));
    }

    #[test]
    fn test_priority_and_deadline_mapping() {
        assert_eq!(RiskLevel::Critical.priority(), "P0");
        assert_eq!(RiskLevel::Critical.deadline_days(), 1);
        assert_eq!(RiskLevel::High.priority(), "P1");
        assert_eq!(RiskLevel::High.deadline_days(), 3);
        assert_eq!(RiskLevel::Medium.deadline_days(), 7);
        assert_eq!(RiskLevel::Low.deadline_days(), 14);
    }
}
