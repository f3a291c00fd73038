//! Persisted records
//!
//! Projects own builds, builds own the test case executions exploded from
//! their JUnit reports. Coverage reports later attach covered lines to those
//! executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// `"<package>/<sourcefile>"` -> covered line numbers
pub type CoverageMap = BTreeMap<String, Vec<u32>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

/// Outcome of a build, decided once its test reports are ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Pending,
    Success,
    TestsFailed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Success => "success",
            BuildStatus::TestsFailed => "tests_failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "success" => Ok(BuildStatus::Success),
            "tests_failed" => Ok(BuildStatus::TestsFailed),
            _ => anyhow::bail!("Unknown build status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub project_id: i64,
    pub branch: String,
    pub commit: String,
    pub slug: String,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    /// Loaded alongside the build when read from a history
    #[serde(default)]
    pub test_case_executions: Vec<TestCaseExecution>,
}

impl Build {
    /// First execution of `suite` / `name` in this build
    pub fn find_execution(&self, suite: &str, name: &str) -> Option<&TestCaseExecution> {
        self.test_case_executions
            .iter()
            .find(|e| e.test_suite_name == suite && e.name == name)
    }
}

/// Branch, commit and slug describing a build before it is stored
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub branch: String,
    pub commit: String,
    pub slug: String,
}

/// One test case as it ran in one build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseExecution {
    /// 0 until stored
    pub id: i64,
    pub build_id: i64,
    pub test_suite_name: String,
    pub name: String,
    pub class_name: String,
    pub time: f64,
    pub passed: bool,
    pub failure_message: Option<String>,
    pub failure_type: Option<String>,
    pub failure_content: Option<String>,
    #[serde(default)]
    pub covered_lines: CoverageMap,
    pub created_at: DateTime<Utc>,
}

impl TestCaseExecution {
    /// `class##method`, the form Jacoco session ids use
    pub fn session_id(&self) -> String {
        format!("{}##{}", self.class_name, self.name)
    }
}
