//! covtrack - test report and coverage tracker
//!
//! A library for ingesting CI test results with:
//! - JUnit XML parsing into suites and test cases
//! - Jacoco XML parsing of per-test coverage reports
//! - Merging covered lines into the test executions they measured
//! - Flakiness and slowness warnings over a test's build history

pub mod config;
pub mod coverage;
pub mod db;
pub mod error;
pub mod health;
pub mod ingest;
pub mod junit;
pub mod model;
pub mod xml;

pub use coverage::{merge_reports, CoverageReport, JacocoParser, MergeOutcome};
pub use error::{ParseError, SessionProblem};
pub use health::{BuildHistory, HealthConfig, HealthWarning, TestHealthAnalyzer};
pub use junit::{JUnitParser, TestCase, TestSuite};
pub use model::{Build, BuildStatus, CoverageMap, Project, TestCaseExecution};
pub use xml::{load_documents, Document, ReportParser};
