//! Structural heuristics standing in for a real Python AST parser.
//!
//! No crate in this workspace's dependency stack parses Python source, so
//! `check_ast` and `check_needs_refactor` work line-by-line over Python's
//! significant indentation instead of building a real syntax tree. This is
//! an explicit, documented simplification (see DESIGN.md) — good enough to
//! catch stub bodies, mock-only tests, and oversized files/functions/classes,
//! not a substitute for `ruff`/`mypy` themselves.

use crate::domain::models::{AstViolation, Severity};

const MAX_FILE_LINES_WARN: usize = 400;
const MAX_FILE_LINES_SPLIT: usize = 800;
const MAX_FUNCTION_LINES: usize = 50;
const MAX_CLASS_METHODS: usize = 15;

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_def_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("def ") || t.starts_with("async def ")
}

fn is_class_line(line: &str) -> bool {
    line.trim_start().starts_with("class ")
}

fn def_name(line: &str) -> Option<&str> {
    let t = line.trim_start();
    let t = t.strip_prefix("async def ").or_else(|| t.strip_prefix("def "))?;
    t.split(['(', ':']).next().map(str::trim)
}

/// Finds the end line index (exclusive) of the block starting at `start`,
/// i.e. the first subsequent line whose indentation is <= the block's own
/// indentation (blank lines are skipped when determining the boundary).
fn block_end(lines: &[&str], start: usize, own_indent: usize) -> usize {
    for (offset, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= own_indent {
            return offset;
        }
    }
    lines.len()
}

/// AST-shaped quality violations: stub detector (blocking) and
/// mock-only-test detector (warning-only, shadow mode per spec §6).
pub fn check_ast(file: &str, contents: &str) -> Vec<AstViolation> {
    let mut violations = Vec::new();
    let lines: Vec<&str> = contents.lines().collect();
    let is_test_file = file.contains("test_") || file.ends_with("_test.py") || file.contains("/tests/");

    violations.extend(stub_violations(file, &lines));
    if is_test_file {
        if let Some(v) = mock_only_violation(file, contents) {
            violations.push(v);
        }
    }
    violations
}

fn stub_violations(file: &str, lines: &[&str]) -> Vec<AstViolation> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !is_def_line(line) {
            continue;
        }
        let own_indent = indent_of(line);
        let body_start = match lines.iter().enumerate().skip(i + 1).find(|(_, l)| !l.trim().is_empty()) {
            Some((idx, _)) => idx,
            None => continue,
        };
        if indent_of(lines[body_start]) <= own_indent {
            continue; // empty/abstract signature with no body at all
        }
        let body_text = lines[body_start].trim();
        let is_stub = body_text == "pass"
            || body_text == "..."
            || body_text.starts_with("raise NotImplementedError")
            || (body_text.starts_with('#') && block_end(lines, i, own_indent) == body_start + 1);
        if is_stub {
            out.push(AstViolation::new(
                Severity::Error,
                "stub-detected",
                file,
                (body_start + 1) as u32,
                format!("function `{}` has a stub body", def_name(line).unwrap_or("<unknown>")),
            ));
        }
    }
    out
}

fn mock_only_violation(file: &str, contents: &str) -> Option<AstViolation> {
    let mock_markers = ["Mock(", "MagicMock(", "@patch", "unittest.mock"];
    let mock_count = contents.lines().filter(|l| mock_markers.iter().any(|m| l.contains(m))).count();
    let assert_count = contents.lines().filter(|l| l.trim_start().starts_with("assert ") || l.contains(".assert")).count();

    if mock_count > 0 && assert_count == 0 {
        Some(AstViolation::new(
            Severity::Warning,
            "mock-only-test",
            file,
            1,
            "test file mocks collaborators but asserts nothing observable",
        ))
    } else {
        None
    }
}

/// Human-readable refactor reasons per spec §4.5 `check_needs_refactor`:
/// file > 400 lines (warn) / > 800 lines (must-split), any function > 50
/// lines, any class > 15 methods. No duplicate-code heuristic.
pub fn check_needs_refactor(file: &str, contents: &str) -> Vec<String> {
    let mut reasons = Vec::new();
    let lines: Vec<&str> = contents.lines().collect();

    if lines.len() > MAX_FILE_LINES_SPLIT {
        reasons.push(format!("{file}: {} lines exceeds {MAX_FILE_LINES_SPLIT}, must split", lines.len()));
    } else if lines.len() > MAX_FILE_LINES_WARN {
        reasons.push(format!("{file}: {} lines exceeds {MAX_FILE_LINES_WARN}", lines.len()));
    }

    for (i, line) in lines.iter().enumerate() {
        if is_def_line(line) {
            let own_indent = indent_of(line);
            let end = block_end(&lines, i, own_indent);
            let len = end - i;
            if len > MAX_FUNCTION_LINES {
                reasons.push(format!(
                    "{file}: function `{}` spans {len} lines, exceeds {MAX_FUNCTION_LINES}",
                    def_name(line).unwrap_or("<unknown>")
                ));
            }
        }
        if is_class_line(line) {
            let own_indent = indent_of(line);
            let end = block_end(&lines, i, own_indent);
            let method_count = lines[i + 1..end].iter().filter(|l| is_def_line(l) && indent_of(l) == own_indent + 4).count();
            if method_count > MAX_CLASS_METHODS {
                reasons.push(format!("{file}: class at line {} has {method_count} methods, exceeds {MAX_CLASS_METHODS}", i + 1));
            }
        }
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pass_only_stub() {
        let src = "def handler():\n    pass\n";
        let v = check_ast("pkg/mod.py", src);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].rule, "stub-detected");
        assert!(v[0].is_blocking());
    }

    #[test]
    fn detects_ellipsis_stub() {
        let src = "def handler():\n    ...\n";
        let v = check_ast("pkg/mod.py", src);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn does_not_flag_real_implementation() {
        let src = "def handler():\n    return compute(1, 2)\n";
        let v = check_ast("pkg/mod.py", src);
        assert!(v.is_empty());
    }

    #[test]
    fn flags_mock_only_test_file() {
        let src = "from unittest.mock import Mock\n\ndef test_thing():\n    m = Mock()\n    m.call()\n";
        let v = check_ast("tests/test_thing.py", src);
        assert!(v.iter().any(|x| x.rule == "mock-only-test" && !x.is_blocking()));
    }

    #[test]
    fn does_not_flag_test_with_real_assertions() {
        let src = "from unittest.mock import Mock\n\ndef test_thing():\n    m = Mock()\n    assert m.call() == 1\n";
        let v = check_ast("tests/test_thing.py", src);
        assert!(!v.iter().any(|x| x.rule == "mock-only-test"));
    }

    #[test]
    fn long_function_triggers_refactor_reason() {
        let mut src = String::from("def big():\n");
        for _ in 0..60 {
            src.push_str("    x = 1\n");
        }
        let reasons = check_needs_refactor("pkg/mod.py", &src);
        assert!(reasons.iter().any(|r| r.contains("exceeds 50")));
    }

    #[test]
    fn class_with_too_many_methods_triggers_refactor_reason() {
        let mut src = String::from("class Big:\n");
        for i in 0..20 {
            src.push_str(&format!("    def m{i}(self):\n        pass\n"));
        }
        let reasons = check_needs_refactor("pkg/mod.py", &src);
        assert!(reasons.iter().any(|r| r.contains("methods")));
    }

    #[test]
    fn short_file_has_no_reasons() {
        let src = "def f():\n    return 1\n";
        assert!(check_needs_refactor("pkg/mod.py", src).is_empty());
    }
}
