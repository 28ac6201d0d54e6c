//! AST-quality violation model, produced by `VerifierTools::check_ast` and
//! its heuristic implementation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// One structural/quality finding against a source file.
///
/// `rule = "stub-detected"` is blocking; `rule = "mock-only-test"` is
/// warning-only (shadow mode), per spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstViolation {
    pub severity: Severity,
    pub rule: String,
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl AstViolation {
    pub fn new(severity: Severity, rule: impl Into<String>, file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            severity,
            rule: rule.into(),
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_severity_is_blocking() {
        let v = AstViolation::new(Severity::Error, "stub-detected", "pkg/mod.py", 10, "bare pass body");
        assert!(v.is_blocking());
    }

    #[test]
    fn warning_severity_is_not_blocking() {
        let v = AstViolation::new(Severity::Warning, "mock-only-test", "tests/test_mod.py", 3, "no real assertions");
        assert!(!v.is_blocking());
    }
}
