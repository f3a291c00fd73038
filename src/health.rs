//! Test health heuristics
//!
//! Scans a test's recent history for two anomalies: failing too often across
//! the project's latest builds, and running slower than the other tests of its
//! own build. Nothing here writes to the history.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Build, TestCaseExecution};

pub const RECENT_BUILDS_AMOUNT: usize = 50;
pub const FAILS_OFTEN_THRESHOLD: f64 = 0.10;

/// Read access to stored builds. Builds are returned with their executions.
pub trait BuildHistory {
    fn find_build(&self, build_id: i64) -> Result<Option<Build>>;

    /// Builds of a project, newest (highest id) first, at most `limit`
    fn recent_builds(&self, project_id: i64, limit: usize) -> Result<Vec<Build>>;
}

/// Builds already in memory
impl BuildHistory for [Build] {
    fn find_build(&self, build_id: i64) -> Result<Option<Build>> {
        Ok(self.iter().find(|b| b.id == build_id).cloned())
    }

    fn recent_builds(&self, project_id: i64, limit: usize) -> Result<Vec<Build>> {
        let mut builds: Vec<Build> = self
            .iter()
            .filter(|b| b.project_id == project_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.id.cmp(&a.id));
        builds.truncate(limit);
        Ok(builds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_recent_builds")]
    pub recent_builds: usize,
    #[serde(default = "default_fails_often_threshold")]
    pub fails_often_threshold: f64,
}

fn default_recent_builds() -> usize {
    RECENT_BUILDS_AMOUNT
}

fn default_fails_often_threshold() -> f64 {
    FAILS_OFTEN_THRESHOLD
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recent_builds: RECENT_BUILDS_AMOUNT,
            fails_often_threshold: FAILS_OFTEN_THRESHOLD,
        }
    }
}

/// Serialized as `{"type": "fails_often", "value": 6}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HealthWarning {
    /// Number of failing runs among the recent builds
    FailsOften(usize),
    /// Average time of the tests in the same build
    SlowerThanAverage(f64),
}

impl HealthWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            HealthWarning::FailsOften(_) => "fails_often",
            HealthWarning::SlowerThanAverage(_) => "slower_than_average",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HealthWarning::FailsOften(failures) => {
                format!("failed in {} of the recent builds", failures)
            }
            HealthWarning::SlowerThanAverage(average) => {
                format!("slower than the build average of {:.3}s", average)
            }
        }
    }
}

pub struct TestHealthAnalyzer {
    config: HealthConfig,
}

impl TestHealthAnalyzer {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    /// Flakiness first, slowness second, each only when it applies
    pub fn investigate<H>(&self, execution: &TestCaseExecution, history: &H) -> Result<Vec<HealthWarning>>
    where
        H: BuildHistory + ?Sized,
    {
        let build = history
            .find_build(execution.build_id)?
            .ok_or_else(|| anyhow::anyhow!("Build {} not found", execution.build_id))?;

        let mut warnings = Vec::new();

        let recent_failures = self.count_recent_failures(execution, build.project_id, history)?;
        if recent_failures as f64 > self.config.fails_often_threshold * self.config.recent_builds as f64 {
            warnings.push(HealthWarning::FailsOften(recent_failures));
        }

        if let Some(average) = average_time(&build.test_case_executions) {
            if execution.time > average {
                warnings.push(HealthWarning::SlowerThanAverage(average));
            }
        }

        debug!(
            execution = execution.id,
            recent_failures,
            warnings = warnings.len(),
            "Investigated {}",
            execution.name
        );

        Ok(warnings)
    }

    fn count_recent_failures<H>(&self, execution: &TestCaseExecution, project_id: i64, history: &H) -> Result<usize>
    where
        H: BuildHistory + ?Sized,
    {
        let mut builds = history.recent_builds(project_id, self.config.recent_builds)?;
        // stable: equal ids keep the order the history returned them in
        builds.sort_by(|a, b| b.id.cmp(&a.id));
        builds.truncate(self.config.recent_builds);

        Ok(builds
            .iter()
            .filter_map(|build| build.find_execution(&execution.test_suite_name, &execution.name))
            .filter(|e| !e.passed)
            .count())
    }
}

impl Default for TestHealthAnalyzer {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

fn average_time(executions: &[TestCaseExecution]) -> Option<f64> {
    if executions.is_empty() {
        return None;
    }
    Some(executions.iter().map(|e| e.time).sum::<f64>() / executions.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BuildStatus, CoverageMap};
    use chrono::Utc;

    const SUITE: &str = "io.example.ReportsControllerTest";
    const NAME: &str = "A user can upload a report()";

    fn execution(id: i64, build_id: i64, name: &str, time: f64, passed: bool) -> TestCaseExecution {
        TestCaseExecution {
            id,
            build_id,
            test_suite_name: SUITE.to_string(),
            name: name.to_string(),
            class_name: SUITE.to_string(),
            time,
            passed,
            failure_message: None,
            failure_type: None,
            failure_content: None,
            covered_lines: CoverageMap::new(),
            created_at: Utc::now(),
        }
    }

    fn build(id: i64, project_id: i64, executions: Vec<TestCaseExecution>) -> Build {
        Build {
            id,
            project_id,
            branch: "new-feature".to_string(),
            commit: "a212a3".to_string(),
            slug: "org/project".to_string(),
            status: BuildStatus::Pending,
            created_at: Utc::now(),
            test_case_executions: executions,
        }
    }

    /// One build per outcome, oldest first, each holding the one execution
    fn history(outcomes: &[bool]) -> Vec<Build> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, &passed)| {
                let id = i as i64 + 1;
                build(id, 1, vec![execution(id, id, NAME, 0.043, passed)])
            })
            .collect()
    }

    fn fails_often(warnings: &[HealthWarning]) -> Option<usize> {
        warnings.iter().find_map(|w| match w {
            HealthWarning::FailsOften(n) => Some(*n),
            _ => None,
        })
    }

    #[test]
    fn test_detects_tests_that_fail_often() {
        let mut outcomes = vec![true; 44];
        outcomes.extend(vec![false; 6]);
        let builds = history(&outcomes);
        let latest = builds.last().unwrap().test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&latest, builds.as_slice()).unwrap();

        assert_eq!(warnings, vec![HealthWarning::FailsOften(6)]);
    }

    #[test]
    fn test_failure_count_at_threshold_is_not_flagged() {
        let mut outcomes = vec![true; 45];
        outcomes.extend(vec![false; 5]);
        let builds = history(&outcomes);
        let latest = builds.last().unwrap().test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&latest, builds.as_slice()).unwrap();

        assert!(warnings.is_empty());
    }

    #[test]
    fn test_only_the_most_recent_builds_count() {
        // 5 old failures fall outside the window of 50
        let mut outcomes = vec![false; 5];
        outcomes.extend(vec![true; 75]);
        outcomes.extend(vec![false; 5]);
        let builds = history(&outcomes);
        let latest = builds.last().unwrap().test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&latest, builds.as_slice()).unwrap();
        assert_eq!(fails_often(&warnings), None);

        let mut outcomes = vec![true; 75];
        outcomes.extend(vec![false; 6]);
        let builds = history(&outcomes);
        let latest = builds.last().unwrap().test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&latest, builds.as_slice()).unwrap();
        assert_eq!(fails_often(&warnings), Some(6));
    }

    #[test]
    fn test_builds_without_the_test_and_other_projects_are_ignored() {
        let mut builds = history(&[false; 6]);
        // newer builds that never ran the test
        for id in 7..=20 {
            builds.push(build(id, 1, vec![execution(id, id, "another test", 0.043, false)]));
        }
        // failures in another project
        for id in 21..=30 {
            builds.push(build(id, 2, vec![execution(id, id, NAME, 0.043, false)]));
        }
        let target = builds[5].test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&target, builds.as_slice()).unwrap();

        assert_eq!(fails_often(&warnings), Some(6));
    }

    #[test]
    fn test_detects_tests_slower_than_build_average() {
        let builds = vec![build(
            1,
            1,
            vec![
                execution(1, 1, "a", 0.1, true),
                execution(2, 1, "b", 0.2, true),
                execution(3, 1, "c", 0.4, true),
                execution(4, 1, "d", 0.3, true),
            ],
        )];
        let target = builds[0].test_case_executions[3].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&target, builds.as_slice()).unwrap();

        assert_eq!(warnings.len(), 1);
        match warnings[0] {
            HealthWarning::SlowerThanAverage(average) => assert!((average - 0.25).abs() < 1e-9),
            other => panic!("unexpected warning: {:?}", other),
        }
    }

    #[test]
    fn test_faster_than_average_is_not_flagged() {
        let builds = vec![build(
            1,
            1,
            vec![
                execution(1, 1, "a", 0.1, true),
                execution(2, 1, "b", 0.3, true),
                execution(3, 1, "c", 0.4, true),
            ],
        )];
        let mut target = builds[0].test_case_executions[0].clone();
        target.time = 0.2;

        let warnings = TestHealthAnalyzer::default().investigate(&target, builds.as_slice()).unwrap();

        assert!(warnings.is_empty());
    }

    #[test]
    fn test_both_warnings_flakiness_first() {
        let mut builds = history(&[false; 6]);
        let last = builds.last_mut().unwrap();
        last.test_case_executions[0].time = 1.0;
        last.test_case_executions.push(execution(100, last.id, "quick", 0.01, true));
        let target = last.test_case_executions[0].clone();

        let warnings = TestHealthAnalyzer::default().investigate(&target, builds.as_slice()).unwrap();

        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0], HealthWarning::FailsOften(6));
        assert_eq!(warnings[1].kind(), "slower_than_average");
    }

    #[test]
    fn test_custom_thresholds() {
        let builds = history(&[true, false, false, true]);
        let latest = builds.last().unwrap().test_case_executions[0].clone();
        let analyzer = TestHealthAnalyzer::new(HealthConfig {
            recent_builds: 4,
            fails_often_threshold: 0.25,
        });

        let warnings = analyzer.investigate(&latest, builds.as_slice()).unwrap();

        assert_eq!(warnings, vec![HealthWarning::FailsOften(2)]);
    }

    #[test]
    fn test_missing_build_is_an_error() {
        let builds: Vec<Build> = Vec::new();
        let orphan = execution(1, 99, NAME, 0.1, false);
        assert!(TestHealthAnalyzer::default().investigate(&orphan, builds.as_slice()).is_err());
    }

    #[test]
    fn test_warning_serialization() {
        let json = serde_json::to_string(&HealthWarning::FailsOften(6)).unwrap();
        assert_eq!(json, r#"{"type":"fails_often","value":6}"#);

        let json = serde_json::to_string(&HealthWarning::SlowerThanAverage(0.25)).unwrap();
        assert_eq!(json, r#"{"type":"slower_than_average","value":0.25}"#);
    }
}
