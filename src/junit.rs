use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;

use crate::error::ParseError;
use crate::model::{CoverageMap, TestCaseExecution};
use crate::xml::{self, Document, Element, ReportParser};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestSuite {
    pub name: String,
    pub tests: i32,
    pub failures: i32,
    pub skipped: i32,
    pub errors: i32,
    pub time: f64,
    pub test_cases: Vec<TestCase>,
}

/// A test case is passed iff it has no `<failure>` child.
///
/// `<skipped/>` and `<error>` children are not inspected, such cases count as
/// passed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestCase {
    pub name: String,
    pub class_name: String,
    pub time: f64,
    pub passed: bool,
    pub failure_message: Option<String>,
    pub failure_type: Option<String>,
    pub failure_content: Option<String>,
}

/// Reads JUnit XML where each document's root is one `<testsuite>`
#[derive(Debug, Default, Clone, Copy)]
pub struct JUnitParser;

impl ReportParser for JUnitParser {
    type Output = TestSuite;

    fn parse_document(&self, document: &Document) -> Result<TestSuite, ParseError> {
        parse_test_suite(&document.root)
    }
}

fn parse_test_suite(element: &Element) -> Result<TestSuite, ParseError> {
    let test_cases = element
        .descendants_named("testcase")
        .into_iter()
        .map(parse_test_case)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TestSuite {
        name: element.required_attribute("name")?.to_string(),
        tests: element.parse_attribute("tests")?,
        failures: element.parse_attribute("failures")?,
        skipped: element.parse_attribute("skipped")?,
        errors: element.parse_attribute("errors")?,
        time: element.parse_attribute("time")?,
        test_cases,
    })
}

fn parse_test_case(element: &Element) -> Result<TestCase, ParseError> {
    let failure = element.first_descendant_named("failure");

    Ok(TestCase {
        name: element.required_attribute("name")?.to_string(),
        class_name: element.required_attribute("classname")?.to_string(),
        time: element.parse_attribute("time")?,
        passed: failure.is_none(),
        failure_message: failure.and_then(|f| f.attribute("message")).map(str::to_string),
        failure_type: failure.and_then(|f| f.attribute("type")).map(str::to_string),
        failure_content: failure.map(Element::text_content),
    })
}

pub fn parse_junit_xml(path: &Path) -> Result<TestSuite> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read JUnit report: {}", path.display()))?;
    parse_junit_string(&content).with_context(|| format!("Invalid JUnit report: {}", path.display()))
}

pub fn parse_junit_string(xml: &str) -> Result<TestSuite, ParseError> {
    JUnitParser.parse_document(&xml::load_str(xml)?)
}

/// Explodes parsed suites into executions of `build_id`, not yet stored
pub fn suites_to_executions(suites: &[TestSuite], build_id: i64) -> Vec<TestCaseExecution> {
    let now = Utc::now();

    suites
        .iter()
        .flat_map(|suite| {
            suite.test_cases.iter().map(move |tc| TestCaseExecution {
                id: 0,
                build_id,
                test_suite_name: suite.name.clone(),
                name: tc.name.clone(),
                class_name: tc.class_name.clone(),
                time: tc.time,
                passed: tc.passed,
                failure_message: tc.failure_message.clone(),
                failure_type: tc.failure_type.clone(),
                failure_content: tc.failure_content.clone(),
                covered_lines: CoverageMap::new(),
                created_at: now,
            })
        })
        .collect()
}
