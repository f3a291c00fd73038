//! Parse errors shared by the XML loader and the report parsers

use thiserror::Error;

/// Why a Jacoco `<sessioninfo>` could not identify the test it measured
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionProblem {
    #[error("session info missing")]
    Missing,
    #[error("report cannot contain more than one session (found {0})")]
    Multiple(usize),
    #[error("session info id `{0}` invalid, should contain the test class and method name separated by `##`")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    /// The input is not well-formed XML. Aborts the whole batch.
    #[error("malformed XML document #{index}: {reason}")]
    MalformedDocument { index: usize, reason: String },

    /// A required attribute is absent or does not hold the expected type.
    #[error("<{element}> attribute `{attribute}` {problem}")]
    ReportAttribute {
        element: String,
        attribute: String,
        problem: String,
    },

    #[error("invalid coverage session: {0}")]
    CoverageSession(#[from] SessionProblem),
}

impl ParseError {
    pub(crate) fn missing_attribute(element: &str, attribute: &str) -> Self {
        ParseError::ReportAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
            problem: "is missing".to_string(),
        }
    }

    pub(crate) fn invalid_attribute(element: &str, attribute: &str, value: &str) -> Self {
        ParseError::ReportAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
            problem: format!("has invalid value `{}`", value),
        }
    }
}
