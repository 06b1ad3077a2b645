//! Safety analysis tools
//!
//! Defect statistics over safety check records: windowed overview with
//! pass and closure rates, frequent-issue identification with a
//! half-window trend, defect distribution, open-defect urgency grading
//! and a three-phase rectification plan.

use crate::error::{AnalyticsError, Result};
use crate::store::{ProjectStore, SafetyRecord};
use crate::tools::TrafficLight;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Urgency grade for an open defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    /// 紧急: high level and open for more than 7 days
    Critical,
    /// 重要: high level, or open for more than 14 days
    Important,
    /// 一般
    Normal,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Critical => "紧急",
            Urgency::Important => "重要",
            Urgency::Normal => "一般",
        }
    }
}

/// Windowed safety overview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyOverview {
    pub window_days: i64,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub pass_rate: f64,
    pub total_defects: usize,
    pub high_level_defects: usize,
    pub medium_level_defects: usize,
    pub low_level_defects: usize,
    pub open_defects: usize,
    pub closed_defects: usize,
    pub closure_rate: f64,
    pub risk_level: TrafficLight,
}

/// One frequently occurring defect type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequentIssue {
    pub defect_type: String,
    pub total_count: usize,
    pub first_half_count: usize,
    pub second_half_count: usize,
    /// rising | stable | falling
    pub trend: String,
}

/// Defect counts by type and level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectDistribution {
    pub by_type: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
}

/// One open defect with urgency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDefect {
    pub record_id: String,
    pub defect_type: String,
    pub defect_level: String,
    pub days_open: i64,
    pub urgency: Urgency,
    pub description: Option<String>,
}

/// One rectification phase bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RectificationPhase {
    pub phase: String,
    pub priority: String,
    pub deadline: NaiveDate,
    pub items: Vec<OpenDefect>,
}

/// Safety tool facade
pub struct SafetyTools {
    store: Arc<dyn ProjectStore>,
    as_of: NaiveDate,
}

impl SafetyTools {
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

    async fn window_records(&self, project_id: &str, days: i64) -> Result<Vec<SafetyRecord>> {
        let since = self.as_of - Duration::days(days);
        self.store.safety_records(project_id, Some(since)).await
    }

    /// Tool 1: overview over the last `days` days.
    ///
    /// Red: pass rate < 80 or ≥ 5 high-level defects;
    /// Yellow: pass rate < 90 or ≥ 3 high-level defects or < 95;
    /// otherwise Green.
    pub async fn safety_overview(&self, project_id: &str, days: i64) -> Result<SafetyOverview> {
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AnalyticsError::ProjectNotFound(project_id.to_string()))?;
        let records = self.window_records(project_id, days).await?;

        let total_checks = records.len();
        let passed = records.iter().filter(|r| r.result == "pass").count();
        let pass_rate = if total_checks > 0 {
            passed as f64 / total_checks as f64 * 100.0
        } else {
            100.0
        };

        let defects: Vec<&SafetyRecord> =
            records.iter().filter(|r| r.result == "fail").collect();
        let level_count = |level: &str| {
            defects
                .iter()
                .filter(|r| r.defect_level.as_deref() == Some(level))
                .count()
        };
        let high = level_count("high");
        let open = defects.iter().filter(|r| r.status == "open").count();
        let closed = defects.len() - open;
        let closure_rate = if defects.is_empty() {
            100.0
        } else {
            closed as f64 / defects.len() as f64 * 100.0
        };

        let risk_level = if pass_rate < 80.0 || high >= 5 {
            TrafficLight::Red
        } else if pass_rate < 90.0 || high >= 3 {
            TrafficLight::Yellow
        } else if pass_rate < 95.0 {
            TrafficLight::Yellow
        } else {
            TrafficLight::Green
        };

        Ok(SafetyOverview {
            window_days: days,
            total_checks,
            passed_checks: passed,
            pass_rate: round2(pass_rate),
            total_defects: defects.len(),
            high_level_defects: high,
            medium_level_defects: level_count("medium"),
            low_level_defects: level_count("low"),
            open_defects: open,
            closed_defects: closed,
            closure_rate: round2(closure_rate),
            risk_level,
        })
    }

    /// Tool 2: frequent issues, with a trend from comparing the first
    /// and second half of the window
    pub async fn identify_frequent_issues(
        &self,
        project_id: &str,
        days: i64,
    ) -> Result<Vec<FrequentIssue>> {
        let records = self.window_records(project_id, days).await?;
        let midpoint = self.as_of - Duration::days(days / 2);

        let mut counter: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for record in records.iter().filter(|r| r.result == "fail") {
            let Some(defect_type) = &record.defect_type else {
                continue;
            };
            let entry = counter.entry(defect_type.clone()).or_insert((0, 0));
            if record.check_date < midpoint {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }

        let mut issues: Vec<FrequentIssue> = counter
            .into_iter()
            .map(|(defect_type, (first, second))| FrequentIssue {
                defect_type,
                total_count: first + second,
                first_half_count: first,
                second_half_count: second,
                trend: if second > first {
                    "rising"
                } else if second < first {
                    "falling"
                } else {
                    "stable"
                }
                .to_string(),
            })
            .collect();

        issues.sort_by(|a, b| {
            b.total_count
                .cmp(&a.total_count)
                .then_with(|| a.defect_type.cmp(&b.defect_type))
        });
        Ok(issues)
    }

    /// Tool 3: defect distribution by type and level
    pub async fn defect_distribution(
        &self,
        project_id: &str,
        days: i64,
    ) -> Result<DefectDistribution> {
        let records = self.window_records(project_id, days).await?;

        let mut by_type = BTreeMap::new();
        let mut by_level = BTreeMap::new();
        for record in records.iter().filter(|r| r.result == "fail") {
            if let Some(defect_type) = &record.defect_type {
                *by_type.entry(defect_type.clone()).or_insert(0) += 1;
            }
            if let Some(level) = &record.defect_level {
                *by_level.entry(level.clone()).or_insert(0) += 1;
            }
        }
        Ok(DefectDistribution { by_type, by_level })
    }

    /// Tool 4: open defects with urgency grading.
    ///
    /// 紧急: high level open more than 7 days;
    /// 重要: high level, or open more than 14 days; 一般 otherwise.
    pub async fn open_defects(&self, project_id: &str) -> Result<Vec<OpenDefect>> {
        let records = self.store.safety_records(project_id, None).await?;

        let mut defects: Vec<OpenDefect> = records
            .iter()
            .filter(|r| r.result == "fail" && r.status == "open")
            .map(|r| {
                let days_open = r.days_open(self.as_of);
                let is_high = r.defect_level.as_deref() == Some("high");
                let urgency = if is_high && days_open > 7 {
                    Urgency::Critical
                } else if is_high || days_open > 14 {
                    Urgency::Important
                } else {
                    Urgency::Normal
                };
                OpenDefect {
                    record_id: r.record_id.clone(),
                    defect_type: r.defect_type.clone().unwrap_or_default(),
                    defect_level: r.defect_level.clone().unwrap_or_default(),
                    days_open,
                    urgency,
                    description: r.description.clone(),
                }
            })
            .collect();

        let urgency_order = |u: Urgency| match u {
            Urgency::Critical => 0,
            Urgency::Important => 1,
            Urgency::Normal => 2,
        };
        defects.sort_by(|a, b| {
            urgency_order(a.urgency)
                .cmp(&urgency_order(b.urgency))
                .then_with(|| b.days_open.cmp(&a.days_open))
        });
        Ok(defects)
    }

    /// Tool 5: rectification plan bucketed into 3/7/14-day phases by
    /// urgency
    pub async fn rectification_plan(&self, project_id: &str) -> Result<Vec<RectificationPhase>> {
        let defects = self.open_defects(project_id).await?;

        let bucket = |urgency: Urgency| -> Vec<OpenDefect> {
            defects
                .iter()
                .filter(|d| d.urgency == urgency)
                .cloned()
                .collect()
        };

        Ok(vec![
            RectificationPhase {
                phase: "第一阶段：紧急整改".to_string(),
                priority: "P0".to_string(),
                deadline: self.as_of + Duration::days(3),
                items: bucket(Urgency::Critical),
            },
            RectificationPhase {
                phase: "第二阶段：重点整改".to_string(),
                priority: "P1".to_string(),
                deadline: self.as_of + Duration::days(7),
                items: bucket(Urgency::Important),
            },
            RectificationPhase {
                phase: "第三阶段：常规整改".to_string(),
                priority: "P2".to_string(),
                deadline: self.as_of + Duration::days(14),
                items: bucket(Urgency::Normal),
            },
        ])
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteProjectStore;

    const AS_OF: fn() -> NaiveDate = || NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();

    fn record(
        id: &str,
        days_ago: i64,
        result: &str,
        defect_type: Option<&str>,
        level: Option<&str>,
        status: &str,
    ) -> SafetyRecord {
        SafetyRecord {
            record_id: id.to_string(),
            project_id: "P001".to_string(),
            check_date: AS_OF() - Duration::days(days_ago),
            result: result.to_string(),
            defect_type: defect_type.map(|s| s.to_string()),
            defect_level: level.map(|s| s.to_string()),
            status: status.to_string(),
            closed_date: None,
            description: None,
        }
    }

    async fn seeded_store(records: &[SafetyRecord]) -> Arc<SqliteProjectStore> {
        let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
        store
            .upsert_project(&crate::store::ProjectRecord {
                project_id: "P001".to_string(),
                project_name: "示范项目".to_string(),
                project_type: "住宅".to_string(),
                project_manager: "王工".to_string(),
                status: "active".to_string(),
                start_date: None,
                planned_end_date: None,
                total_budget: 0.0,
                progress_rate: 0.0,
                cost_rate: 0.0,
            })
            .await
            .unwrap();
        for record in records {
            store.insert_safety_record(record).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_missing_project_is_structured_error() {
        let store = Arc::new(SqliteProjectStore::in_memory().await.unwrap());
        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let err = tools.safety_overview("missing", 7).await.unwrap_err();
        assert_eq!(err.category(), "analytics");
    }

    #[tokio::test]
    async fn test_overview_rates_and_risk() {
        let store = seeded_store(&[
            record("S1", 1, "pass", None, None, "closed"),
            record("S2", 2, "pass", None, None, "closed"),
            record("S3", 3, "fail", Some("临边防护缺失"), Some("high"), "open"),
            record("S4", 4, "fail", Some("动火作业违规"), Some("medium"), "closed"),
        ])
        .await;

        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let overview = tools.safety_overview("P001", 7).await.unwrap();

        assert_eq!(overview.total_checks, 4);
        assert_eq!(overview.pass_rate, 50.0);
        assert_eq!(overview.total_defects, 2);
        assert_eq!(overview.high_level_defects, 1);
        assert_eq!(overview.open_defects, 1);
        assert_eq!(overview.closure_rate, 50.0);
        assert_eq!(overview.risk_level, TrafficLight::Red);
    }

    #[tokio::test]
    async fn test_empty_window_is_green() {
        let store = seeded_store(&[]).await;
        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let overview = tools.safety_overview("P001", 7).await.unwrap();
        assert_eq!(overview.pass_rate, 100.0);
        assert_eq!(overview.risk_level, TrafficLight::Green);
    }

    #[tokio::test]
    async fn test_frequent_issue_trend_by_half_window() {
        let mut records = Vec::new();
        // 1 occurrence in the first half, 3 in the second half
        records.push(record("S1", 50, "fail", Some("临边防护缺失"), Some("medium"), "open"));
        for (i, days_ago) in [5i64, 10, 15].iter().enumerate() {
            records.push(record(
                &format!("S{}", i + 2),
                *days_ago,
                "fail",
                Some("临边防护缺失"),
                Some("medium"),
                "open",
            ));
        }
        let store = seeded_store(&records).await;

        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let issues = tools.identify_frequent_issues("P001", 60).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].total_count, 4);
        assert_eq!(issues[0].trend, "rising");
    }

    #[tokio::test]
    async fn test_open_defect_urgency_grading() {
        let store = seeded_store(&[
            // High level, 10 days open -> 紧急
            record("S1", 10, "fail", Some("深基坑支护"), Some("high"), "open"),
            // High level, 2 days open -> 重要
            record("S2", 2, "fail", Some("动火作业"), Some("high"), "open"),
            // Low level, 20 days open -> 重要
            record("S3", 20, "fail", Some("材料堆放"), Some("low"), "open"),
            // Low level, 3 days open -> 一般
            record("S4", 3, "fail", Some("标识缺失"), Some("low"), "open"),
        ])
        .await;

        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let defects = tools.open_defects("P001").await.unwrap();

        assert_eq!(defects[0].record_id, "S1");
        assert_eq!(defects[0].urgency, Urgency::Critical);
        let by_id = |id: &str| defects.iter().find(|d| d.record_id == id).unwrap().urgency;
        assert_eq!(by_id("S2"), Urgency::Important);
        assert_eq!(by_id("S3"), Urgency::Important);
        assert_eq!(by_id("S4"), Urgency::Normal);
    }

    #[tokio::test]
    async fn test_rectification_phases() {
        let store = seeded_store(&[
            record("S1", 10, "fail", Some("深基坑支护"), Some("high"), "open"),
            record("S2", 3, "fail", Some("标识缺失"), Some("low"), "open"),
        ])
        .await;

        let tools = SafetyTools::new(store).with_reference_date(AS_OF());
        let plan = tools.rectification_plan("P001").await.unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].deadline, AS_OF() + Duration::days(3));
        assert_eq!(plan[0].items.len(), 1);
        assert_eq!(plan[1].deadline, AS_OF() + Duration::days(7));
        assert_eq!(plan[2].deadline, AS_OF() + Duration::days(14));
        assert_eq!(plan[2].items.len(), 1);
    }
}
