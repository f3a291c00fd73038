//! Attaching coverage reports to the test case executions they measured

use tracing::{debug, warn};

use super::CoverageReport;
use crate::model::{CoverageMap, TestCaseExecution};

/// Result of merging a batch of reports into a build's executions
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Copies of every matched execution with the merged coverage applied,
    /// in order of first match
    pub updated: Vec<TestCaseExecution>,
    /// `class##method` ids of reports without a matching execution
    pub unmatched: Vec<String>,
}

/// Covered lines keyed by `"<package>/<sourcefile>"`.
/// Source files without a single covered line are left out.
pub fn covered_lines_by_file(report: &CoverageReport) -> CoverageMap {
    report
        .packages
        .iter()
        .flat_map(|package| {
            package.source_files.iter().filter_map(move |file| {
                let lines = file.covered_line_numbers();
                if lines.is_empty() {
                    None
                } else {
                    Some((format!("{}/{}", package.name, file.name), lines))
                }
            })
        })
        .collect()
}

/// Union of both maps. A key present in both takes the incoming lines.
pub fn merge_coverage(existing: &CoverageMap, incoming: CoverageMap) -> CoverageMap {
    let mut merged = existing.clone();
    merged.extend(incoming);
    merged
}

/// Matches every report to the first execution with the same class and test
/// name and returns the executions whose coverage changed.
///
/// `executions` is left untouched; persisting `MergeOutcome::updated` is up to
/// the caller, as is serializing concurrent merges into the same execution.
pub fn merge_reports(executions: &[TestCaseExecution], reports: &[CoverageReport]) -> MergeOutcome {
    // (index into executions, working copy)
    let mut touched: Vec<(usize, TestCaseExecution)> = Vec::new();
    let mut unmatched = Vec::new();

    for report in reports {
        let Some(index) = executions.iter().position(|e| {
            e.class_name == report.test_class_name && e.name == report.test_method_name
        }) else {
            warn!(
                session = %report.session_id(),
                "No test execution found for {}.{}",
                report.test_class_name,
                report.test_method_name
            );
            unmatched.push(report.session_id());
            continue;
        };

        let incoming = covered_lines_by_file(report);
        debug!(
            session = %report.session_id(),
            files = incoming.len(),
            "Merging coverage into execution {}",
            executions[index].id
        );

        match touched.iter_mut().find(|(i, _)| *i == index) {
            Some((_, working)) => {
                working.covered_lines = merge_coverage(&working.covered_lines, incoming);
            }
            None => {
                let mut working = executions[index].clone();
                working.covered_lines = merge_coverage(&working.covered_lines, incoming);
                touched.push((index, working));
            }
        }
    }

    MergeOutcome {
        updated: touched.into_iter().map(|(_, execution)| execution).collect(),
        unmatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{parse_jacoco_string, LineStatistics, Package, SourceFile};
    use chrono::Utc;

    const CALCULATOR_REPORT: &str = include_str!("../../demo/coverage/CalculatorTest-testAddsNumbers.xml");

    fn execution(id: i64, class_name: &str, name: &str) -> TestCaseExecution {
        TestCaseExecution {
            id,
            build_id: 1,
            test_suite_name: class_name.to_string(),
            name: name.to_string(),
            class_name: class_name.to_string(),
            time: 0.01,
            passed: true,
            failure_message: None,
            failure_type: None,
            failure_content: None,
            covered_lines: CoverageMap::new(),
            created_at: Utc::now(),
        }
    }

    fn report(class_name: &str, method: &str, file: &str, covered: &[u32]) -> CoverageReport {
        CoverageReport {
            test_class_name: class_name.to_string(),
            test_method_name: method.to_string(),
            packages: vec![Package {
                name: "com/example".to_string(),
                source_files: vec![SourceFile {
                    name: file.to_string(),
                    lines: covered
                        .iter()
                        .map(|&nr| LineStatistics {
                            line_number: nr,
                            covered_instructions: 1,
                            missed_instructions: 0,
                            covered_branches: 0,
                            missed_branches: 0,
                        })
                        .collect(),
                }],
            }],
        }
    }

    #[test]
    fn test_merges_calculator_report() {
        let executions = vec![
            execution(1, "com.example.CalculatorTest", "testSubtractsNumbers"),
            execution(2, "com.example.CalculatorTest", "testAddsNumbers"),
        ];
        let reports = vec![parse_jacoco_string(CALCULATOR_REPORT).unwrap()];

        let outcome = merge_reports(&executions, &reports);

        assert!(outcome.unmatched.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        let updated = &outcome.updated[0];
        assert_eq!(updated.id, 2);

        let mut expected = CoverageMap::new();
        expected.insert("com/example/Calculator.java".to_string(), vec![6, 7, 8, 11, 13]);
        assert_eq!(updated.covered_lines, expected);
        assert!(!updated.covered_lines.contains_key("com/example/Counter.java"));

        // input executions are untouched
        assert!(executions[1].covered_lines.is_empty());
    }

    #[test]
    fn test_unmatched_reports_are_skipped() {
        let executions = vec![execution(1, "com.example.CalculatorTest", "testAddsNumbers")];
        let reports = vec![report("com.example.RemovedTest", "testGone", "Gone.java", &[1])];

        let outcome = merge_reports(&executions, &reports);

        assert!(outcome.updated.is_empty());
        assert_eq!(outcome.unmatched, vec!["com.example.RemovedTest##testGone".to_string()]);
    }

    #[test]
    fn test_existing_entries_survive_and_same_file_is_replaced() {
        let mut existing = execution(1, "com.example.CounterTest", "testIncreases");
        existing
            .covered_lines
            .insert("com/example/Calculator.java".to_string(), vec![6]);
        existing
            .covered_lines
            .insert("com/example/Counter.java".to_string(), vec![1, 2, 3]);

        let reports = vec![report("com.example.CounterTest", "testIncreases", "Counter.java", &[6, 7])];
        let outcome = merge_reports(&[existing], &reports);

        let lines = &outcome.updated[0].covered_lines;
        assert_eq!(lines["com/example/Calculator.java"], vec![6]);
        assert_eq!(lines["com/example/Counter.java"], vec![6, 7]);
    }

    #[test]
    fn test_several_reports_for_one_execution_accumulate() {
        let executions = vec![execution(1, "A", "t")];
        let reports = vec![
            report("A", "t", "One.java", &[1, 2]),
            report("A", "t", "Two.java", &[3]),
            report("A", "t", "One.java", &[5]),
        ];

        let outcome = merge_reports(&executions, &reports);

        assert_eq!(outcome.updated.len(), 1);
        let lines = &outcome.updated[0].covered_lines;
        assert_eq!(lines["com/example/One.java"], vec![5]);
        assert_eq!(lines["com/example/Two.java"], vec![3]);
    }

    #[test]
    fn test_merging_the_same_report_twice_is_idempotent() {
        let executions = vec![execution(2, "com.example.CalculatorTest", "testAddsNumbers")];
        let reports = vec![parse_jacoco_string(CALCULATOR_REPORT).unwrap()];

        let once = merge_reports(&executions, &reports).updated;
        let twice = merge_reports(&once, &reports).updated;

        assert_eq!(once[0].covered_lines, twice[0].covered_lines);
    }

    #[test]
    fn test_first_matching_execution_wins() {
        let executions = vec![execution(1, "A", "t"), execution(2, "A", "t")];
        let outcome = merge_reports(&executions, &[report("A", "t", "X.java", &[1])]);

        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].id, 1);
    }
}
