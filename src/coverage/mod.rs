//! Coverage module
//!
//! Provides:
//! - Jacoco XML parsing, one report per test method
//! - Merging covered lines into test case executions

mod jacoco;
mod merge;

pub use jacoco::*;
pub use merge::*;

use serde::{Deserialize, Serialize};

/// Coverage recorded while a single test method ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub test_class_name: String,
    pub test_method_name: String,
    pub packages: Vec<Package>,
}

impl CoverageReport {
    /// The `class##method` session id the report was recorded under
    pub fn session_id(&self) -> String {
        format!("{}##{}", self.test_class_name, self.test_method_name)
    }
}

/// Classes and counters are not kept, only per-line statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub source_files: Vec<SourceFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub lines: Vec<LineStatistics>,
}

impl SourceFile {
    /// Line numbers with at least one covered instruction, in report order
    pub fn covered_line_numbers(&self) -> Vec<u32> {
        self.lines
            .iter()
            .filter(|line| line.is_covered())
            .map(|line| line.line_number)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStatistics {
    pub line_number: u32,
    pub covered_instructions: u32,
    pub missed_instructions: u32,
    pub covered_branches: u32,
    pub missed_branches: u32,
}

impl LineStatistics {
    pub fn is_covered(&self) -> bool {
        self.covered_instructions > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(nr: u32, ci: u32, mi: u32) -> LineStatistics {
        LineStatistics {
            line_number: nr,
            covered_instructions: ci,
            missed_instructions: mi,
            covered_branches: 0,
            missed_branches: 0,
        }
    }

    #[test]
    fn test_line_is_covered_by_covered_instructions() {
        assert!(line(6, 2, 0).is_covered());
        assert!(!line(17, 0, 6).is_covered());
        // partially covered lines still count
        assert!(line(20, 1, 3).is_covered());
    }

    #[test]
    fn test_covered_line_numbers_keep_report_order() {
        let file = SourceFile {
            name: "Calculator.java".to_string(),
            lines: vec![line(6, 2, 0), line(17, 0, 6), line(7, 3, 0)],
        };
        assert_eq!(file.covered_line_numbers(), vec![6, 7]);
    }
}
