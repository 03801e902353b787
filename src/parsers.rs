//! Parsers for the two plain-text formats the flaky detector and quality
//! breaker consume: a pytest result line and a coverage summary line.
//!
//! These are the only two text-parsing surfaces the core exposes; no
//! other tool output is parsed here (matching the Non-goal that the core
//! does not interpret arbitrary subprocess output).

use regex::Regex;
use std::sync::LazyLock;

static PYTEST_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w/.:-]+::[\w_]+)\s+(PASSED|FAILED|ERROR|SKIPPED)").unwrap());

static COVERAGE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TOTAL\s+\d+\s+\d+\s+(\d+)%").unwrap());

/// One parsed pytest result line: the fully-qualified test name and
/// whether it passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PytestResult {
    /// `path/to/test_file.py::test_name`.
    pub test_name: String,
    /// True only for a `PASSED` line; `FAILED`, `ERROR` and `SKIPPED`
    /// all record as `false`, matching the upstream parser which never
    /// treats a non-PASSED outcome as a pass.
    pub passed: bool,
}

/// Parses every recognizable `test_name PASSED|FAILED|ERROR|SKIPPED` line
/// out of `text`, in order.
#[must_use]
pub fn parse_pytest_output(text: &str) -> Vec<PytestResult> {
    text.lines()
        .filter_map(|line| {
            let caps = PYTEST_LINE_RE.captures(line)?;
            Some(PytestResult {
                test_name: caps[1].to_string(),
                passed: &caps[2] == "PASSED",
            })
        })
        .collect()
}

/// Parses a `TOTAL <stmts> <miss> <pct>%` coverage summary line, if
/// present, returning the coverage percentage.
#[must_use]
pub fn parse_coverage(text: &str) -> Option<u8> {
    text.lines().find_map(|line| {
        COVERAGE_LINE_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<u8>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_pytest_output() {
        let text = "\
tests/test_a.py::test_one PASSED
tests/test_a.py::test_two FAILED
tests/test_a.py::test_three ERROR
tests/test_a.py::test_four SKIPPED
not a test line";
        let results = parse_pytest_output(text);
        assert_eq!(results.len(), 4);
        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert!(!results[2].passed);
        assert!(!results[3].passed);
    }

    #[test]
    fn parses_coverage_total_line() {
        let text = "Name   Stmts   Miss   Cover\n----\nTOTAL    120     12    90%";
        assert_eq!(parse_coverage(text), Some(90));
    }

    #[test]
    fn missing_coverage_line_returns_none() {
        assert_eq!(parse_coverage("no coverage here"), None);
    }
}
