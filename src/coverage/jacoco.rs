//! Jacoco XML format parser
//!
//! Each document is the coverage of exactly one test method. The method is
//! identified by the report's single `<sessioninfo>`, whose `id` is
//! `<test class>##<test method>`.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::{CoverageReport, LineStatistics, Package, SourceFile};
use crate::error::{ParseError, SessionProblem};
use crate::xml::{self, Document, Element, ReportParser};

const SESSION_ID_SEPARATOR: &str = "##";

#[derive(Debug, Default, Clone, Copy)]
pub struct JacocoParser;

impl ReportParser for JacocoParser {
    type Output = CoverageReport;

    fn parse_document(&self, document: &Document) -> Result<CoverageReport, ParseError> {
        parse_report(&document.root)
    }
}

/// Parse a Jacoco XML file
pub fn parse_jacoco(path: &Path) -> Result<CoverageReport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read coverage report: {}", path.display()))?;
    parse_jacoco_string(&content)
        .with_context(|| format!("Invalid coverage report: {}", path.display()))
}

/// Parse Jacoco XML content from a string
pub fn parse_jacoco_string(content: &str) -> Result<CoverageReport, ParseError> {
    JacocoParser.parse_document(&xml::load_str(content)?)
}

fn parse_report(root: &Element) -> Result<CoverageReport, ParseError> {
    let (test_class_name, test_method_name) = parse_session(root)?;

    let packages = root
        .descendants_named("package")
        .into_iter()
        .map(parse_package)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CoverageReport {
        test_class_name,
        test_method_name,
        packages,
    })
}

fn parse_session(root: &Element) -> Result<(String, String), ParseError> {
    let sessions = root.descendants_named("sessioninfo");
    let session = match sessions.as_slice() {
        [] => return Err(SessionProblem::Missing.into()),
        [session] => *session,
        many => return Err(SessionProblem::Multiple(many.len()).into()),
    };

    let id = session
        .attribute("id")
        .ok_or_else(|| SessionProblem::InvalidId(String::new()))?;
    split_session_id(id).ok_or_else(|| SessionProblem::InvalidId(id.to_string()).into())
}

/// Splits `class##method`; both halves must be present
pub fn split_session_id(id: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = id.split(SESSION_ID_SEPARATOR).collect();
    match parts.as_slice() {
        [class, method] if !class.is_empty() && !method.is_empty() => {
            Some((class.to_string(), method.to_string()))
        }
        _ => None,
    }
}

fn parse_package(element: &Element) -> Result<Package, ParseError> {
    let source_files = element
        .descendants_named("sourcefile")
        .into_iter()
        .map(parse_source_file)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Package {
        name: element.required_attribute("name")?.to_string(),
        source_files,
    })
}

fn parse_source_file(element: &Element) -> Result<SourceFile, ParseError> {
    let lines = element
        .descendants_named("line")
        .into_iter()
        .map(parse_line)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceFile {
        name: element.required_attribute("name")?.to_string(),
        lines,
    })
}

fn parse_line(element: &Element) -> Result<LineStatistics, ParseError> {
    Ok(LineStatistics {
        line_number: element.parse_attribute("nr")?,
        covered_instructions: element.parse_attribute("ci")?,
        missed_instructions: element.parse_attribute("mi")?,
        covered_branches: element.parse_attribute("cb")?,
        missed_branches: element.parse_attribute("mb")?,
    })
}
