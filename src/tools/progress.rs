//! Progress analysis tools
//!
//! Eight read-only tools over project schedule data: overview, SPI
//! status, delayed-task identification, critical-path listing, trend,
//! completion prediction, bottleneck identification and resource
//! allocation.

use crate::error::{AnalyticsError, Result};
use crate::store::{ProjectStore, TaskRecord};
use crate::tools::TrafficLight;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Project schedule overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressOverview {
    pub project_id: String,
    pub project_name: String,
    pub project_type: String,
    pub project_manager: String,
    pub start_date: Option<NaiveDate>,
    pub planned_end_date: Option<NaiveDate>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub in_progress_tasks: usize,
    pub delayed_tasks: usize,
    pub not_started_tasks: usize,
    pub overall_progress: f64,
    pub average_spi: Option<f64>,
}

/// SPI-based schedule status with a traffic-light risk level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressStatus {
    pub total_tasks: usize,
    pub avg_planned_progress: f64,
    pub avg_actual_progress: f64,
    pub variance: f64,
    pub variance_rate: f64,
    pub overall_spi: Option<f64>,
    pub risk_level: TrafficLight,
    pub risk_description: String,
}

/// One delayed task with severity and reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedTask {
    pub task_id: String,
    pub task_name: String,
    pub planned_progress: f64,
    pub actual_progress: f64,
    pub variance: f64,
    pub spi: Option<f64>,
    pub severity: String,
    pub reason: String,
    pub is_critical_path: bool,
}

/// One critical-path task with delay flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalTask {
    pub task_id: String,
    pub task_name: String,
    pub planned_progress: f64,
    pub actual_progress: f64,
    pub spi: Option<f64>,
    pub status: String,
    pub planned_start: Option<NaiveDate>,
    pub planned_end: Option<NaiveDate>,
    pub is_delayed: bool,
}

/// Trend over the recent task-update window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressTrend {
    pub analysis_days: i64,
    pub updated_tasks: usize,
    pub high_risk_tasks: usize,
    pub medium_risk_tasks: usize,
    /// deteriorating | stable | unknown
    pub trend: String,
}

/// SPI-adjusted completion prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionPrediction {
    pub current_progress: f64,
    pub remaining_progress: f64,
    pub average_spi: f64,
    pub planned_end_date: Option<NaiveDate>,
    pub predicted_delay_days: i64,
    /// high | medium | low
    pub prediction_confidence: String,
}

/// A bottleneck on the critical path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub task_id: String,
    pub task_name: String,
    pub spi: Option<f64>,
    pub actual_progress: f64,
    /// high | medium
    pub impact: String,
    pub reason: String,
    pub recommendation: String,
}

/// Parallel-load assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub parallel_tasks: usize,
    /// overloaded | normal | spare
    pub load_status: String,
    pub suggestion: String,
    pub critical_tasks_in_progress: usize,
}

/// Progress tool facade
pub struct ProgressTools {
    store: Arc<dyn ProjectStore>,
    as_of: NaiveDate,
}

impl ProgressTools {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store,
            as_of: Utc::now().date_naive(),
        }
    }

    /// Pin the reference date, making every tool deterministic for tests
    pub fn with_reference_date(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    /// Tool 1: project overview with task-status distribution
    pub async fn project_overview(&self, project_id: &str) -> Result<ProgressOverview> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AnalyticsError::ProjectNotFound(project_id.to_string()))?;
        let tasks = self.store.tasks_by_project(project_id).await?;

        let count_status = |status: &str| tasks.iter().filter(|t| t.status == status).count();
        let spi_values: Vec<f64> = tasks.iter().filter_map(|t| t.spi()).collect();
        let average_spi = if spi_values.is_empty() {
            None
        } else {
            Some(round3(spi_values.iter().sum::<f64>() / spi_values.len() as f64))
        };

        Ok(ProgressOverview {
            project_id: project_id.to_string(),
            project_name: project.project_name,
            project_type: project.project_type,
            project_manager: project.project_manager,
            start_date: project.start_date,
            planned_end_date: project.planned_end_date,
            total_tasks: tasks.len(),
            completed_tasks: count_status("completed"),
            in_progress_tasks: count_status("in_progress"),
            delayed_tasks: count_status("delayed"),
            not_started_tasks: count_status("not_started"),
            overall_progress: project.progress_rate,
            average_spi,
        })
    }

    /// Tool 2: overall SPI and traffic-light status.
    ///
    /// Green: SPI ≥ 0.95, Yellow: 0.85 ≤ SPI < 0.95, Red: SPI < 0.85.
    pub async fn progress_status(&self, project_id: &str) -> Result<ProgressStatus> {
        let tasks = self.store.tasks_by_project(project_id).await?;
        if tasks.is_empty() {
            return Ok(ProgressStatus {
                total_tasks: 0,
                avg_planned_progress: 0.0,
                avg_actual_progress: 0.0,
                variance: 0.0,
                variance_rate: 0.0,
                overall_spi: None,
                risk_level: TrafficLight::Unknown,
                risk_description: "无任务数据，无法计算SPI".to_string(),
            });
        }

        let total_planned: f64 = tasks.iter().map(|t| t.planned_progress).sum();
        let total_actual: f64 = tasks.iter().map(|t| t.actual_progress).sum();
        let n = tasks.len() as f64;
        let avg_planned = total_planned / n;
        let avg_actual = total_actual / n;

        // Overall SPI is the mean of per-task SPIs, so one large task
        // cannot mask several badly slipping small ones
        let spi_values: Vec<f64> = tasks.iter().filter_map(|t| t.spi()).collect();
        let overall_spi = if spi_values.is_empty() {
            None
        } else {
            Some(spi_values.iter().sum::<f64>() / spi_values.len() as f64)
        };
        let variance = avg_actual - avg_planned;
        let variance_rate = if avg_planned > 0.0 {
            variance / avg_planned * 100.0
        } else {
            0.0
        };

        let (risk_level, risk_description) = match overall_spi {
            None => (
                TrafficLight::Unknown,
                "无法计算SPI，缺少有效数据".to_string(),
            ),
            Some(spi) if spi >= 0.95 => (
                TrafficLight::Green,
                "进度正常，基本按计划执行".to_string(),
            ),
            Some(spi) if spi >= 0.85 => (
                TrafficLight::Yellow,
                "进度略有延期，需要关注并采取措施".to_string(),
            ),
            Some(_) => (
                TrafficLight::Red,
                "进度严重延期，需要立即采取纠正措施".to_string(),
            ),
        };

        Ok(ProgressStatus {
            total_tasks: tasks.len(),
            avg_planned_progress: round2(avg_planned),
            avg_actual_progress: round2(avg_actual),
            variance: round2(variance),
            variance_rate: round2(variance_rate),
            overall_spi: overall_spi.map(round3),
            risk_level,
            risk_description,
        })
    }

    /// Tool 3: delayed tasks.
    ///
    /// A task is delayed when its status says so, its SPI is below
    /// 0.95, or its variance is worse than -5 points. Sorted by
    /// severity, then critical path, then variance.
    pub async fn delayed_tasks(&self, project_id: &str) -> Result<Vec<DelayedTask>> {
        let tasks = self.store.tasks_by_project(project_id).await?;
        let mut delayed = Vec::new();

        for task in &tasks {
            let spi = task.spi();
            let (is_delayed, reason) = if task.status == "delayed" {
                (true, "任务已标记为延期状态".to_string())
            } else if let Some(spi) = spi.filter(|s| *s < 0.95) {
                (true, format!("SPI={:.2}，进度落后于计划", spi))
            } else if task.variance() < -5.0 {
                (true, format!("进度偏差{:.1}%，明显落后", task.variance()))
            } else {
                (false, String::new())
            };

            if !is_delayed {
                continue;
            }

            let severity = match spi {
                Some(s) if s < 0.8 => "严重",
                Some(s) if s < 0.9 => "中等",
                _ => "轻微",
            };

            delayed.push(DelayedTask {
                task_id: task.task_id.clone(),
                task_name: task.task_name.clone(),
                planned_progress: task.planned_progress,
                actual_progress: task.actual_progress,
                variance: task.variance(),
                spi,
                severity: severity.to_string(),
                reason,
                is_critical_path: task.is_critical_path,
            });
        }

        let severity_order = |s: &str| match s {
            "严重" => 0,
            "中等" => 1,
            _ => 2,
        };
        delayed.sort_by(|a, b| {
            severity_order(&a.severity)
                .cmp(&severity_order(&b.severity))
                .then_with(|| b.is_critical_path.cmp(&a.is_critical_path))
                .then_with(|| {
                    a.variance
                        .partial_cmp(&b.variance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        Ok(delayed)
    }

    /// Tool 4: critical-path tasks with delay flags (SPI < 0.95)
    pub async fn critical_path_tasks(&self, project_id: &str) -> Result<Vec<CriticalTask>> {
        let tasks = self.store.critical_tasks(project_id).await?;
        Ok(tasks
            .iter()
            .map(|task| CriticalTask {
                task_id: task.task_id.clone(),
                task_name: task.task_name.clone(),
                planned_progress: task.planned_progress,
                actual_progress: task.actual_progress,
                spi: task.spi(),
                status: task.status.clone(),
                planned_start: task.planned_start,
                planned_end: task.planned_end,
                is_delayed: task.spi().map(|s| s < 0.95).unwrap_or(false),
            })
            .collect())
    }

    /// Tool 5: recent trend. Deteriorating when more than three tasks
    /// updated in the window sit below SPI 0.85.
    pub async fn progress_trend(&self, project_id: &str, days: i64) -> Result<ProgressTrend> {
        let tasks = self.store.tasks_by_project(project_id).await?;
        let cutoff = self.as_of - Duration::days(days);

        let recent: Vec<&TaskRecord> = tasks
            .iter()
            .filter(|t| {
                t.updated_at
                    .map(|u| u.date_naive() >= cutoff)
                    .unwrap_or(false)
            })
            .collect();

        if recent.is_empty() {
            return Ok(ProgressTrend {
                analysis_days: days,
                updated_tasks: 0,
                high_risk_tasks: 0,
                medium_risk_tasks: 0,
                trend: "unknown".to_string(),
            });
        }

        let high_risk = recent
            .iter()
            .filter(|t| t.spi().map(|s| s < 0.85).unwrap_or(false))
            .count();
        let medium_risk = recent
            .iter()
            .filter(|t| t.spi().map(|s| (0.85..0.95).contains(&s)).unwrap_or(false))
            .count();

        Ok(ProgressTrend {
            analysis_days: days,
            updated_tasks: recent.len(),
            high_risk_tasks: high_risk,
            medium_risk_tasks: medium_risk,
            trend: if high_risk > 3 { "deteriorating" } else { "stable" }.to_string(),
        })
    }

    /// Tool 6: completion prediction.
    ///
    /// Remaining calendar days scale by 1/SPI; confidence rises with
    /// the number of valid SPI samples.
    pub async fn predict_completion(&self, project_id: &str) -> Result<CompletionPrediction> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AnalyticsError::ProjectNotFound(project_id.to_string()))?;
        let tasks = self.store.tasks_by_project(project_id).await?;

        let spi_values: Vec<f64> = tasks
            .iter()
            .filter_map(|t| t.spi())
            .filter(|s| *s > 0.0)
            .collect();
        if spi_values.is_empty() {
            return Err(
                AnalyticsError::InsufficientData("无有效SPI数据，无法预测".to_string()).into(),
            );
        }
        let avg_spi = spi_values.iter().sum::<f64>() / spi_values.len() as f64;
        let adjustment = 1.0 / avg_spi;

        let predicted_delay_days = match project.planned_end_date {
            Some(end) => {
                let planned_remaining = (end - self.as_of).num_days();
                if planned_remaining > 0 {
                    let predicted = (planned_remaining as f64 * adjustment) as i64;
                    predicted - planned_remaining
                } else {
                    0
                }
            }
            None => 0,
        };

        let confidence = if spi_values.len() > 10 {
            "high"
        } else if spi_values.len() > 5 {
            "medium"
        } else {
            "low"
        };

        Ok(CompletionPrediction {
            current_progress: project.progress_rate,
            remaining_progress: 100.0 - project.progress_rate,
            average_spi: round3(avg_spi),
            planned_end_date: project.planned_end_date,
            predicted_delay_days,
            prediction_confidence: confidence.to_string(),
        })
    }

    /// Tool 7: bottlenecks, meaning incomplete critical-path tasks
    /// with SPI < 0.95
    pub async fn identify_bottlenecks(&self, project_id: &str) -> Result<Vec<Bottleneck>> {
        let critical = self.store.critical_tasks(project_id).await?;
        let mut bottlenecks = Vec::new();

        for task in &critical {
            if task.status == "completed" {
                continue;
            }
            let Some(spi) = task.spi() else { continue };

            let (impact, recommendation) = if spi < 0.85 {
                (
                    "high",
                    "立即增加资源投入，优先解决该任务，避免影响整体工期",
                )
            } else if spi < 0.95 {
                (
                    "medium",
                    "密切关注任务进展，适当增加资源，确保不进一步延期",
                )
            } else {
                continue;
            };

            bottlenecks.push(Bottleneck {
                task_id: task.task_id.clone(),
                task_name: task.task_name.clone(),
                spi: Some(spi),
                actual_progress: task.actual_progress,
                impact: impact.to_string(),
                reason: format!("关键路径任务，当前SPI={:.2}，进度落后", spi),
                recommendation: recommendation.to_string(),
            });
        }
        Ok(bottlenecks)
    }

    /// Tool 8: resource allocation from the count of parallel
    /// in-progress tasks
    pub async fn resource_allocation(&self, project_id: &str) -> Result<ResourceAllocation> {
        let tasks = self.store.tasks_by_project(project_id).await?;
        let in_progress: Vec<&TaskRecord> = tasks
            .iter()
            .filter(|t| t.status == "in_progress")
            .collect();
        let parallel = in_progress.len();

        let (load_status, suggestion) = if parallel > 10 {
            (
                "overloaded",
                "并行任务过多，建议优先完成关键路径任务，暂停部分非关键任务，或考虑增加人员",
            )
        } else if parallel > 5 {
            ("normal", "资源配置合理，继续保持当前节奏")
        } else {
            (
                "spare",
                "资源充足，可以适当增加并行任务或提前启动后续任务",
            )
        };

        Ok(ResourceAllocation {
            parallel_tasks: parallel,
            load_status: load_status.to_string(),
            suggestion: suggestion.to_string(),
            critical_tasks_in_progress: in_progress.iter().filter(|t| t.is_critical_path).count(),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::store::{ProjectRecord, SqliteProjectStore};

    async fn seeded_store() -> Arc<SqliteProjectStore> {
        let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
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
        store
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
            updated_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_average_spi_and_red_status() {
        let store = seeded_store().await;
        // (50, 40), (100, 100), (30, 15) -> SPI mean 0.7667
        store.upsert_task(&task("T1", 50.0, 40.0, false)).await.unwrap();
        store.upsert_task(&task("T2", 100.0, 100.0, false)).await.unwrap();
        store.upsert_task(&task("T3", 30.0, 15.0, false)).await.unwrap();

        let tools = ProgressTools::new(store.clone());

        let overview = tools.project_overview("P001").await.unwrap();
        assert_eq!(overview.total_tasks, 3);
        assert!((overview.average_spi.unwrap() - 0.767).abs() < 1e-9);

        let status = tools.progress_status("P001").await.unwrap();
        assert!((status.overall_spi.unwrap() - 0.767).abs() < 1e-3);
        assert_eq!(status.risk_level, TrafficLight::Red);
    }

    #[tokio::test]
    async fn test_delayed_tasks_rule() {
        let store = seeded_store().await;
        store.upsert_task(&task("T1", 50.0, 30.0, true)).await.unwrap(); // spi 0.6
        store.upsert_task(&task("T2", 50.0, 49.0, false)).await.unwrap(); // spi 0.98, variance -1
        let mut marked = task("T3", 10.0, 10.0, false);
        marked.status = "delayed".to_string();
        store.upsert_task(&marked).await.unwrap();

        let tools = ProgressTools::new(store);
        let delayed = tools.delayed_tasks("P001").await.unwrap();
        let ids: Vec<&str> = delayed.iter().map(|t| t.task_id.as_str()).collect();
        assert!(ids.contains(&"T1"));
        assert!(ids.contains(&"T3"));
        assert!(!ids.contains(&"T2"));
        // Severe first
        assert_eq!(delayed[0].task_id, "T1");
        assert_eq!(delayed[0].severity, "严重");
    }

    #[tokio::test]
    async fn test_missing_project_is_structured_error() {
        let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
        let tools = ProgressTools::new(store);
        let err = tools.project_overview("missing").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Analytics(AnalyticsError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bottlenecks_require_critical_and_behind() {
        let store = seeded_store().await;
        store.upsert_task(&task("T1", 50.0, 30.0, true)).await.unwrap(); // critical, spi 0.6
        store.upsert_task(&task("T2", 50.0, 30.0, false)).await.unwrap(); // behind, not critical
        store.upsert_task(&task("T3", 50.0, 50.0, true)).await.unwrap(); // critical, on time

        let tools = ProgressTools::new(store);
        let bottlenecks = tools.identify_bottlenecks("P001").await.unwrap();
        assert_eq!(bottlenecks.len(), 1);
        assert_eq!(bottlenecks[0].task_id, "T1");
        assert_eq!(bottlenecks[0].impact, "high");
    }

    #[tokio::test]
    async fn test_prediction_insufficient_without_spi() {
        let store = seeded_store().await;
        store.upsert_task(&task("T1", 0.0, 0.0, false)).await.unwrap();
        let tools = ProgressTools::new(store);
        let err = tools.predict_completion("P001").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Analytics(AnalyticsError::InsufficientData(_))
        ));
    }

    #[tokio::test]
    async fn test_prediction_scales_by_inverse_spi() {
        let store = seeded_store().await;
        store.upsert_task(&task("T1", 50.0, 25.0, false)).await.unwrap(); // spi 0.5

        let as_of = NaiveDate::from_ymd_opt(2026, 12, 21).unwrap(); // 10 days left
        let tools = ProgressTools::new(store).with_reference_date(as_of);
        let prediction = tools.predict_completion("P001").await.unwrap();
        assert_eq!(prediction.average_spi, 0.5);
        // 10 planned days at SPI 0.5 -> 20 predicted -> 10 late
        assert_eq!(prediction.predicted_delay_days, 10);
        assert_eq!(prediction.prediction_confidence, "low");
    }

    #[tokio::test]
    async fn test_resource_allocation_bands() {
        let store = seeded_store().await;
        for i in 0..12 {
            store
                .upsert_task(&task(&format!("T{}", i), 50.0, 50.0, i == 0))
                .await
                .unwrap();
        }
        let tools = ProgressTools::new(store);
        let allocation = tools.resource_allocation("P001").await.unwrap();
        assert_eq!(allocation.parallel_tasks, 12);
        assert_eq!(allocation.load_status, "overloaded");
        assert_eq!(allocation.critical_tasks_in_progress, 1);
    }
}
