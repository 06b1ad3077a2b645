//! Cost analysis tools
//!
//! Earned-value analytics over cost line items: CPI, category
//! breakdown, overrun identification, EAC prediction, peer
//! benchmarking, monthly trend, risk identification and control
//! suggestions.

use crate::error::{AnalyticsError, Result};
use crate::store::ProjectStore;
use crate::tools::TrafficLight;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The four tracked cost categories
pub const COST_CATEGORIES: [&str; 4] = ["material", "labor", "equipment", "subcontract"];

/// Overall cost posture with CPI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostOverview {
    pub project_id: String,
    pub project_name: String,
    pub total_budget: f64,
    pub total_planned: f64,
    pub total_actual: f64,
    pub variance: f64,
    pub variance_rate: f64,
    pub budget_usage_rate: f64,
    pub progress_rate: f64,
    pub earned_value: f64,
    pub cpi: f64,
    pub risk_level: TrafficLight,
    pub risk_description: String,
}

/// Per-category totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryStats {
    pub planned: f64,
    pub actual: f64,
    pub variance: f64,
    pub variance_rate: f64,
    pub count: usize,
    pub over_budget: bool,
}

/// Category breakdown with the worst offender highlighted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostByCategory {
    pub categories: BTreeMap<String, CategoryStats>,
    pub max_overrun_category: Option<String>,
    pub max_overrun_rate: f64,
}

/// One overrun line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostOverrun {
    pub cost_id: String,
    pub category: String,
    pub item: String,
    pub planned: f64,
    pub actual: f64,
    pub variance: f64,
    pub variance_rate: f64,
    /// severe | moderate | slight
    pub severity: String,
}

/// EAC-based final-cost prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalCostPrediction {
    pub current_budget: f64,
    pub cpi: f64,
    pub progress_rate: f64,
    pub predicted_final_cost: f64,
    pub predicted_overrun: f64,
    pub predicted_overrun_rate: f64,
    pub will_exceed_budget: bool,
    /// medium | low
    pub confidence: String,
}

/// Comparison against peer projects of the same type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub benchmark_available: bool,
    pub similar_projects_count: usize,
    pub benchmark_avg_cost_rate: f64,
    pub current_cost_rate: f64,
    /// better | average | worse
    pub performance: String,
}

/// Monthly actual-cost trend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTrend {
    pub months: i64,
    pub monthly_actual: BTreeMap<String, f64>,
    pub growth_rate: f64,
    /// rising | stable | falling | insufficient
    pub trend: String,
}

/// One identified cost risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRisk {
    pub risk_type: String,
    /// high | medium
    pub severity: String,
    pub description: String,
    pub recommendation: String,
}

/// Cost tool facade
pub struct CostTools {
    store: Arc<dyn ProjectStore>,
    as_of: NaiveDate,
}

impl CostTools {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store,
            as_of: Utc::now().date_naive(),
        }
    }

    pub fn with_reference_date(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    /// Tool 1: cost overview.
    ///
    /// CPI = earned value / actual cost, with
    /// earned value = budget × progress / 100.
    pub async fn cost_overview(&self, project_id: &str) -> Result<CostOverview> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AnalyticsError::ProjectNotFound(project_id.to_string()))?;
        let costs = self.store.costs_by_project(project_id, None, None).await?;

        let total_planned: f64 = costs.iter().map(|c| c.planned_amount).sum();
        let total_actual: f64 = costs.iter().map(|c| c.actual_amount).sum();
        let variance = total_actual - total_planned;
        let variance_rate = if total_planned > 0.0 {
            variance / total_planned * 100.0
        } else {
            0.0
        };

        let budget = project.total_budget;
        let budget_usage_rate = if budget > 0.0 {
            total_actual / budget * 100.0
        } else {
            0.0
        };
        let earned_value = budget * project.progress_rate / 100.0;
        let cpi = if total_actual > 0.0 {
            earned_value / total_actual
        } else {
            0.0
        };

        let (risk_level, risk_description) = if cpi >= 1.05 {
            (TrafficLight::Green, "成本控制良好，低于预算")
        } else if cpi >= 0.95 {
            (TrafficLight::Green, "成本基本符合预算")
        } else if cpi >= 0.85 {
            (TrafficLight::Yellow, "成本有超支风险，需关注")
        } else {
            (TrafficLight::Red, "成本严重超支，需立即采取措施")
        };

        Ok(CostOverview {
            project_id: project_id.to_string(),
            project_name: project.project_name,
            total_budget: budget,
            total_planned,
            total_actual,
            variance,
            variance_rate: round2(variance_rate),
            budget_usage_rate: round2(budget_usage_rate),
            progress_rate: project.progress_rate,
            earned_value,
            cpi: round3(cpi),
            risk_level,
            risk_description: risk_description.to_string(),
        })
    }

    /// Tool 2: per-category totals across material/labor/equipment/
    /// subcontract
    pub async fn cost_by_category(&self, project_id: &str) -> Result<CostByCategory> {
        let costs = self.store.costs_by_project(project_id, None, None).await?;

        let mut categories = BTreeMap::new();
        for category in COST_CATEGORIES {
            let items: Vec<_> = costs
                .iter()
                .filter(|c| c.cost_category == category)
                .collect();
            if items.is_empty() {
                continue;
            }
            let planned: f64 = items.iter().map(|c| c.planned_amount).sum();
            let actual: f64 = items.iter().map(|c| c.actual_amount).sum();
            let variance = actual - planned;
            let variance_rate = if planned > 0.0 {
                variance / planned * 100.0
            } else {
                0.0
            };
            categories.insert(
                category.to_string(),
                CategoryStats {
                    planned,
                    actual,
                    variance,
                    variance_rate: round2(variance_rate),
                    count: items.len(),
                    over_budget: variance > 0.0,
                },
            );
        }

        let (max_overrun_category, max_overrun_rate) = categories
            .iter()
            .filter(|(_, stats)| stats.variance_rate > 0.0)
            .max_by(|a, b| {
                a.1.variance_rate
                    .partial_cmp(&b.1.variance_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(name, stats)| (Some(name.clone()), stats.variance_rate))
            .unwrap_or((None, 0.0));

        Ok(CostByCategory {
            categories,
            max_overrun_category,
            max_overrun_rate,
        })
    }

    /// Tool 3: overruns above `threshold` percent, sorted worst first.
    /// Severity: severe > 20%, moderate > 10%, otherwise slight.
    pub async fn identify_overruns(
        &self,
        project_id: &str,
        threshold: f64,
    ) -> Result<Vec<CostOverrun>> {
        let costs = self.store.costs_by_project(project_id, None, None).await?;

        let mut overruns: Vec<CostOverrun> = costs
            .iter()
            .filter(|c| c.planned_amount > 0.0 && c.variance_rate() > threshold)
            .map(|c| {
                let rate = c.variance_rate();
                CostOverrun {
                    cost_id: c.cost_id.clone(),
                    category: c.cost_category.clone(),
                    item: c.cost_item.clone(),
                    planned: c.planned_amount,
                    actual: c.actual_amount,
                    variance: c.variance(),
                    variance_rate: round2(rate),
                    severity: if rate > 20.0 {
                        "severe"
                    } else if rate > 10.0 {
                        "moderate"
                    } else {
                        "slight"
                    }
                    .to_string(),
                }
            })
            .collect();

        overruns.sort_by(|a, b| {
            b.variance_rate
                .partial_cmp(&a.variance_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(overruns)
    }

    /// Tool 4: EAC = BAC / CPI
    pub async fn predict_final_cost(&self, project_id: &str) -> Result<FinalCostPrediction> {
        let overview = self.cost_overview(project_id).await?;
        if overview.cpi <= 0.0 || overview.progress_rate <= 0.0 {
            return Err(
                AnalyticsError::InsufficientData("进度或成本数据不足，无法预测".to_string())
                    .into(),
            );
        }

        let predicted_final_cost = overview.total_budget / overview.cpi;
        let predicted_overrun = predicted_final_cost - overview.total_budget;
        let predicted_overrun_rate = if overview.total_budget > 0.0 {
            predicted_overrun / overview.total_budget * 100.0
        } else {
            0.0
        };

        Ok(FinalCostPrediction {
            current_budget: overview.total_budget,
            cpi: overview.cpi,
            progress_rate: overview.progress_rate,
            predicted_final_cost: round2(predicted_final_cost),
            predicted_overrun: round2(predicted_overrun),
            predicted_overrun_rate: round2(predicted_overrun_rate),
            will_exceed_budget: predicted_overrun > 0.0,
            confidence: if overview.progress_rate > 30.0 {
                "medium"
            } else {
                "low"
            }
            .to_string(),
        })
    }

    /// Tool 5: compare against historical peers of the same type
    pub async fn compare_with_benchmark(&self, project_id: &str) -> Result<BenchmarkComparison> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AnalyticsError::ProjectNotFound(project_id.to_string()))?;

        let peers = self
            .store
            .similar_projects(&project.project_type, project_id)
            .await?;
        let rates: Vec<f64> = peers.iter().map(|p| p.cost_rate).filter(|r| *r > 0.0).collect();

        if rates.is_empty() {
            return Ok(BenchmarkComparison {
                benchmark_available: false,
                similar_projects_count: peers.len(),
                benchmark_avg_cost_rate: 0.0,
                current_cost_rate: project.cost_rate,
                performance: "unknown".to_string(),
            });
        }

        let avg = rates.iter().sum::<f64>() / rates.len() as f64;
        let performance = if project.cost_rate < avg * 0.95 {
            "better"
        } else if project.cost_rate < avg * 1.05 {
            "average"
        } else {
            "worse"
        };

        Ok(BenchmarkComparison {
            benchmark_available: true,
            similar_projects_count: peers.len(),
            benchmark_avg_cost_rate: round4(avg),
            current_cost_rate: round4(project.cost_rate),
            performance: performance.to_string(),
        })
    }

    /// Tool 6: monthly actual-cost trend over the last N months
    pub async fn cost_trend(&self, project_id: &str, months: i64) -> Result<CostTrend> {
        let since = self.as_of - Duration::days(months * 30);
        let costs = self
            .store
            .costs_by_project(project_id, Some(since), Some(self.as_of))
            .await?;

        let mut monthly: BTreeMap<String, f64> = BTreeMap::new();
        for cost in &costs {
            if let Some(date) = cost.cost_date {
                let key = format!("{:04}-{:02}", date.year(), date.month());
                *monthly.entry(key).or_insert(0.0) += cost.actual_amount;
            }
        }

        let (growth_rate, trend) = if monthly.len() >= 2 {
            let first = *monthly.values().next().unwrap_or(&0.0);
            let last = *monthly.values().last().unwrap_or(&0.0);
            let growth = if first > 0.0 {
                (last - first) / first * 100.0
            } else {
                0.0
            };
            let trend = if growth > 10.0 {
                "rising"
            } else if growth > -10.0 {
                "stable"
            } else {
                "falling"
            };
            (round2(growth), trend)
        } else {
            (0.0, "insufficient")
        };

        Ok(CostTrend {
            months,
            monthly_actual: monthly,
            growth_rate,
            trend: trend.to_string(),
        })
    }

    /// Tool 7: identify cost risks across CPI, burn rate and EAC
    pub async fn identify_risks(&self, project_id: &str) -> Result<Vec<CostRisk>> {
        let overview = self.cost_overview(project_id).await?;
        let mut risks = Vec::new();

        if overview.cpi > 0.0 && overview.cpi < 0.85 {
            risks.push(CostRisk {
                risk_type: "成本绩效差".to_string(),
                severity: "high".to_string(),
                description: format!("CPI为{:.2}，远低于1.0", overview.cpi),
                recommendation: "立即审查成本明细，识别超支原因".to_string(),
            });
        }

        if overview.progress_rate > 0.0
            && overview.budget_usage_rate > overview.progress_rate * 1.1
        {
            risks.push(CostRisk {
                risk_type: "预算消耗过快".to_string(),
                severity: "high".to_string(),
                description: format!(
                    "预算消耗{:.1}%，但进度仅{:.1}%",
                    overview.budget_usage_rate, overview.progress_rate
                ),
                recommendation: "严格控制后续支出".to_string(),
            });
        }

        if let Ok(prediction) = self.predict_final_cost(project_id).await {
            if prediction.will_exceed_budget {
                let rate = prediction.predicted_overrun_rate;
                risks.push(CostRisk {
                    risk_type: "预计总成本超支".to_string(),
                    severity: if rate > 10.0 { "high" } else { "medium" }.to_string(),
                    description: format!("预计最终超支{:.1}%", rate),
                    recommendation: if rate > 10.0 {
                        "调整后续采购计划"
                    } else {
                        "监控成本趋势"
                    }
                    .to_string(),
                });
            }
        }

        Ok(risks)
    }

    /// Tool 8: actionable control suggestions from the analyses above
    pub async fn control_suggestions(&self, project_id: &str) -> Result<Vec<String>> {
        let overview = self.cost_overview(project_id).await?;
        let by_category = self.cost_by_category(project_id).await?;
        let mut suggestions = Vec::new();

        if overview.cpi > 0.0 && overview.cpi < 0.9 {
            suggestions.push("优先级1：CPI过低，建议立即召开成本分析会".to_string());
            suggestions.push("重点审查材料采购和分包合同".to_string());
        }

        if let Some(category) = &by_category.max_overrun_category {
            if by_category.max_overrun_rate > 10.0 {
                suggestions.push(format!(
                    "优先级2：{}成本超支{:.1}%",
                    category_zh(category),
                    by_category.max_overrun_rate
                ));
                match category.as_str() {
                    "material" => {
                        suggestions.push("检查材料市场价格变化，优化采购策略".to_string())
                    }
                    "labor" => suggestions.push("评估人工效率，优化施工组织".to_string()),
                    "equipment" => suggestions.push("核查机械台班利用率".to_string()),
                    "subcontract" => suggestions.push("复核分包合同计量与变更".to_string()),
                    _ => {}
                }
            }
        }

        if suggestions.is_empty() {
            suggestions.push("当前成本控制良好，建议继续保持".to_string());
        }
        Ok(suggestions)
    }
}

fn category_zh(category: &str) -> &str {
    match category {
        "material" => "材料",
        "labor" => "人工",
        "equipment" => "机械",
        "subcontract" => "分包",
        other => other,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CostRecord, ProjectRecord, SqliteProjectStore};

    async fn seeded_store(progress: f64, budget: f64) -> Arc<SqliteProjectStore> {
        let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
        store
            .upsert_project(&ProjectRecord {
                project_id: "P001".to_string(),
                project_name: "示范项目".to_string(),
                project_type: "住宅".to_string(),
                project_manager: "王工".to_string(),
                status: "active".to_string(),
                start_date: None,
                planned_end_date: None,
                total_budget: budget,
                progress_rate: progress,
                cost_rate: 0.52,
            })
            .await
            .unwrap();
        store
    }

    fn cost(id: &str, category: &str, planned: f64, actual: f64) -> CostRecord {
        CostRecord {
            cost_id: id.to_string(),
            project_id: "P001".to_string(),
            cost_category: category.to_string(),
            cost_item: format!("项目{}", id),
            planned_amount: planned,
            actual_amount: actual,
            cost_date: NaiveDate::from_ymd_opt(2026, 6, 15),
        }
    }

    #[tokio::test]
    async fn test_eac_scenario() {
        // Budget 1,000,000; progress 40%; actual 500,000
        let store = seeded_store(40.0, 1_000_000.0).await;
        store
            .upsert_cost(&cost("C1", "material", 450_000.0, 500_000.0))
            .await
            .unwrap();

        let tools = CostTools::new(store);
        let overview = tools.cost_overview("P001").await.unwrap();
        assert_eq!(overview.earned_value, 400_000.0);
        assert!((overview.cpi - 0.8).abs() < 1e-9);

        let prediction = tools.predict_final_cost("P001").await.unwrap();
        assert!((prediction.predicted_final_cost - 1_250_000.0).abs() < 1e-6);
        assert!((prediction.predicted_overrun_rate - 25.0).abs() < 1e-6);
        assert!(prediction.will_exceed_budget);
        assert_eq!(prediction.confidence, "medium");
    }

    #[tokio::test]
    async fn test_category_breakdown_flags_worst() {
        let store = seeded_store(50.0, 1_000_000.0).await;
        store.upsert_cost(&cost("C1", "material", 100.0, 130.0)).await.unwrap();
        store.upsert_cost(&cost("C2", "labor", 100.0, 105.0)).await.unwrap();
        store.upsert_cost(&cost("C3", "equipment", 100.0, 90.0)).await.unwrap();

        let tools = CostTools::new(store);
        let breakdown = tools.cost_by_category("P001").await.unwrap();
        assert_eq!(breakdown.max_overrun_category.as_deref(), Some("material"));
        assert!((breakdown.max_overrun_rate - 30.0).abs() < 1e-9);
        assert!(!breakdown.categories["equipment"].over_budget);
    }

    #[tokio::test]
    async fn test_overrun_severity_and_order() {
        let store = seeded_store(50.0, 1_000_000.0).await;
        store.upsert_cost(&cost("C1", "material", 100.0, 125.0)).await.unwrap(); // 25% severe
        store.upsert_cost(&cost("C2", "labor", 100.0, 112.0)).await.unwrap(); // 12% moderate
        store.upsert_cost(&cost("C3", "labor", 100.0, 107.0)).await.unwrap(); // 7% slight

        let tools = CostTools::new(store);
        let overruns = tools.identify_overruns("P001", 5.0).await.unwrap();
        assert_eq!(overruns.len(), 3);
        assert_eq!(overruns[0].cost_id, "C1");
        assert_eq!(overruns[0].severity, "severe");
        assert_eq!(overruns[1].severity, "moderate");
        assert_eq!(overruns[2].severity, "slight");
    }

    #[tokio::test]
    async fn test_benchmark_against_peers() {
        let store = seeded_store(50.0, 1_000_000.0).await;
        for (id, rate) in [("P002", 0.50), ("P003", 0.46)] {
            store
                .upsert_project(&ProjectRecord {
                    project_id: id.to_string(),
                    project_name: id.to_string(),
                    project_type: "住宅".to_string(),
                    project_manager: String::new(),
                    status: "completed".to_string(),
                    start_date: None,
                    planned_end_date: None,
                    total_budget: 0.0,
                    progress_rate: 100.0,
                    cost_rate: rate,
                })
                .await
                .unwrap();
        }

        let tools = CostTools::new(store);
        let benchmark = tools.compare_with_benchmark("P001").await.unwrap();
        assert!(benchmark.benchmark_available);
        assert_eq!(benchmark.similar_projects_count, 2);
        // 0.52 vs avg 0.48: more than 5% above average
        assert_eq!(benchmark.performance, "worse");
    }

    #[tokio::test]
    async fn test_risks_for_overspending_project() {
        let store = seeded_store(40.0, 1_000_000.0).await;
        store
            .upsert_cost(&cost("C1", "material", 400_000.0, 600_000.0))
            .await
            .unwrap();

        let tools = CostTools::new(store);
        let risks = tools.identify_risks("P001").await.unwrap();
        // CPI = 400k/600k = 0.67 -> performance + burn + EAC risks
        assert!(risks.len() >= 2);
        assert!(risks.iter().any(|r| r.risk_type == "成本绩效差"));
    }

    #[tokio::test]
    async fn test_suggestions_when_healthy() {
        let store = seeded_store(50.0, 1_000_000.0).await;
        store
            .upsert_cost(&cost("C1", "material", 500_000.0, 480_000.0))
            .await
            .unwrap();

        let tools = CostTools::new(store);
        let suggestions = tools.control_suggestions("P001").await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].contains("良好"));
    }
}
