//! Ingestion of uploaded reports into the store
//!
//! Test reports create the executions of a build; coverage reports are merged
//! into executions that already exist.

use anyhow::{Context, Result};
use std::io::Read;
use tracing::{debug, info, warn};

use crate::coverage::{merge_reports, JacocoParser, MergeOutcome};
use crate::db::Database;
use crate::junit::{suites_to_executions, JUnitParser, TestSuite};
use crate::model::{Build, BuildStatus, TestCaseExecution};
use crate::xml::ReportParser;

/// What a test report upload produced
#[derive(Debug)]
pub struct TestReportIngest {
    pub suites: Vec<TestSuite>,
    pub executions: Vec<TestCaseExecution>,
    pub status: BuildStatus,
}

/// `Success` only when every execution passed
pub fn build_status(executions: &[TestCaseExecution]) -> BuildStatus {
    if executions.iter().all(|e| e.passed) {
        BuildStatus::Success
    } else {
        BuildStatus::TestsFailed
    }
}

/// Parses JUnit reports and stores one execution per test case under `build`.
/// A malformed report rejects the whole upload before anything is written.
pub fn ingest_test_reports<R: Read>(db: &Database, build: &Build, reports: Vec<R>) -> Result<TestReportIngest> {
    let suites = JUnitParser
        .parse_streams(reports)
        .context("Failed to parse test reports")?;
    debug!(build = build.id, suites = suites.len(), "Parsed test reports");

    let executions = db.insert_executions(&suites_to_executions(&suites, build.id))?;
    let status = build_status(&executions);
    db.set_build_status(build.id, status)?;

    info!(
        build = build.id,
        executions = executions.len(),
        status = %status,
        "Stored test executions"
    );

    Ok(TestReportIngest {
        suites,
        executions,
        status,
    })
}

/// Parses Jacoco reports and attaches their covered lines to the executions
/// of `build_id`. Only executions that changed are written back.
pub fn ingest_coverage_reports<R: Read>(db: &Database, build_id: i64, reports: Vec<R>) -> Result<MergeOutcome> {
    let build = db
        .get_build(build_id)?
        .ok_or_else(|| anyhow::anyhow!("Build {} not found", build_id))?;

    let reports = JacocoParser
        .parse_streams(reports)
        .context("Failed to parse coverage reports")?;
    debug!(build = build_id, reports = reports.len(), "Parsed coverage reports");

    let outcome = merge_reports(&build.test_case_executions, &reports);
    db.save_covered_lines(&outcome.updated)?;

    if !outcome.unmatched.is_empty() {
        warn!(
            build = build_id,
            unmatched = outcome.unmatched.len(),
            "Coverage reports without a matching test execution were dropped"
        );
    }

    Ok(outcome)
}
