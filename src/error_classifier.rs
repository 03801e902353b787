//! Shared error classification: signature normalization, a closed error
//! taxonomy, severity/escalation thresholds and recovery playbooks.
//!
//! Shared by the loop controller (stuck-on-same-error detection) and the
//! flaky-test detector (failure-message fingerprinting), matching how the
//! original implementation keeps a single classifier rather than
//! duplicating pattern matching in both callers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// The closed set of error categories the classifier recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Syntax errors: unparseable source.
    Syntax,
    /// Missing or unresolvable imports/modules.
    Import,
    /// Type errors: wrong type passed to an operation.
    Type,
    /// Runtime errors not covered by a more specific kind.
    Runtime,
    /// A test assertion or test run failed.
    TestFailure,
    /// Missing files/paths or denied filesystem permissions.
    Environment,
    /// An operation exceeded its time budget.
    Timeout,
    /// A network connection failed.
    Network,
    /// Business-logic errors (bad value, missing key, bad index).
    Logic,
    /// Explicit permission denial, distinguished from `Environment`.
    ///
    /// Reachable only via explicit construction (no automatic pattern):
    /// the message text alone cannot distinguish this from
    /// `Environment`, matching the upstream classifier's behavior.
    Permission,
    /// Resource exhaustion (memory, disk, file descriptors).
    ///
    /// Reachable only via explicit construction; no automatic pattern.
    Resource,
    /// Anything that matches no known pattern.
    Unknown,
}

impl ErrorKind {
    /// Escalation threshold: how many consecutive occurrences of the same
    /// error signature should escalate to a human/operator decision.
    #[must_use]
    pub fn escalation_threshold(self) -> u32 {
        match self {
            ErrorKind::Syntax | ErrorKind::Import | ErrorKind::Type | ErrorKind::Runtime => 5,
            ErrorKind::TestFailure => 10,
            ErrorKind::Environment => 3,
            ErrorKind::Timeout => 5,
            ErrorKind::Network => 8,
            ErrorKind::Logic => 5,
            ErrorKind::Permission => 3,
            ErrorKind::Resource => 5,
            ErrorKind::Unknown => 5,
        }
    }

    /// Default severity bucket for this kind.
    #[must_use]
    pub fn severity(self) -> ErrorSeverity {
        match self {
            ErrorKind::Syntax | ErrorKind::Import | ErrorKind::Type => ErrorSeverity::High,
            ErrorKind::Runtime | ErrorKind::Logic | ErrorKind::TestFailure => {
                ErrorSeverity::Medium
            }
            ErrorKind::Environment | ErrorKind::Permission | ErrorKind::Resource => {
                ErrorSeverity::High
            }
            ErrorKind::Timeout | ErrorKind::Network => ErrorSeverity::Medium,
            ErrorKind::Unknown => ErrorSeverity::Low,
        }
    }

    fn recovery_strategy(self) -> RecoveryStrategy {
        match self {
            ErrorKind::Syntax => RecoveryStrategy::FixSyntax,
            ErrorKind::Import => RecoveryStrategy::InstallDependency,
            ErrorKind::Type => RecoveryStrategy::FixTypeMismatch,
            ErrorKind::Runtime => RecoveryStrategy::InspectStackTrace,
            ErrorKind::TestFailure => RecoveryStrategy::FixFailingAssertion,
            ErrorKind::Environment => RecoveryStrategy::RepairEnvironment,
            ErrorKind::Timeout => RecoveryStrategy::IncreaseTimeoutOrOptimize,
            ErrorKind::Network => RecoveryStrategy::RetryWithBackoff,
            ErrorKind::Logic => RecoveryStrategy::ReviewLogic,
            ErrorKind::Permission => RecoveryStrategy::EscalatePermission,
            ErrorKind::Resource => RecoveryStrategy::FreeResources,
            ErrorKind::Unknown => RecoveryStrategy::EscalateToOperator,
        }
    }
}

/// Severity bucket assigned to a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Informational; unlikely to need operator attention.
    Low,
    /// Worth tracking; may resolve on retry.
    Medium,
    /// Needs attention if it recurs.
    High,
    /// Needs immediate attention.
    Critical,
}

/// A recommended recovery action for a classified error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    /// Fix the syntax error at the reported location.
    FixSyntax,
    /// Install or pin the missing dependency.
    InstallDependency,
    /// Fix the type mismatch at the reported location.
    FixTypeMismatch,
    /// Inspect the stack trace for the failing frame.
    InspectStackTrace,
    /// Fix the failing test assertion or its fixture.
    FixFailingAssertion,
    /// Repair the local environment (missing file, permissions).
    RepairEnvironment,
    /// Increase the operation's timeout or optimize the hot path.
    IncreaseTimeoutOrOptimize,
    /// Retry the network operation with exponential backoff.
    RetryWithBackoff,
    /// Review the business logic that produced the bad value.
    ReviewLogic,
    /// Escalate to an operator with elevated permissions.
    EscalatePermission,
    /// Free memory/disk/descriptors before retrying.
    FreeResources,
    /// Escalate to an operator; no automatic recovery is known.
    EscalateToOperator,
}

/// An ordered list of human-readable recovery steps for a given error
/// kind, used only for diagnostics/logging, never parsed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPlaybook {
    /// The error kind this playbook addresses.
    pub kind: ErrorKind,
    /// The recommended high-level strategy.
    pub strategy: RecoveryStrategy,
    /// Ordered, human-readable steps an operator or agent can follow.
    pub steps: Vec<String>,
}

impl RecoveryPlaybook {
    /// Builds the playbook for `kind`.
    #[must_use]
    pub fn for_error_type(kind: ErrorKind) -> Self {
        let steps = match kind {
            ErrorKind::Syntax => vec![
                "Locate the reported line/column".to_string(),
                "Fix the malformed syntax".to_string(),
                "Re-run the parser to confirm it now parses".to_string(),
            ],
            ErrorKind::Import => vec![
                "Identify the unresolved module name".to_string(),
                "Check it is declared as a dependency".to_string(),
                "Install or vendor the missing package".to_string(),
            ],
            ErrorKind::Type => vec![
                "Locate the mismatched expression".to_string(),
                "Reconcile the expected and actual types".to_string(),
            ],
            ErrorKind::Runtime => vec![
                "Read the stack trace top frame".to_string(),
                "Reproduce the failure in isolation".to_string(),
                "Fix the root cause, not the symptom".to_string(),
            ],
            ErrorKind::TestFailure => vec![
                "Read the assertion diff".to_string(),
                "Decide if the test or the code is wrong".to_string(),
                "Fix the one that is wrong".to_string(),
            ],
            ErrorKind::Environment => vec![
                "Check the referenced path exists".to_string(),
                "Check file permissions".to_string(),
            ],
            ErrorKind::Timeout => vec![
                "Profile the slow operation".to_string(),
                "Increase the timeout or optimize the hot path".to_string(),
            ],
            ErrorKind::Network => vec![
                "Retry with exponential backoff".to_string(),
                "Check connectivity to the remote host".to_string(),
            ],
            ErrorKind::Logic => vec![
                "Re-derive the expected value by hand".to_string(),
                "Fix the logic producing the bad value".to_string(),
            ],
            ErrorKind::Permission => vec![
                "Escalate to an operator with elevated access".to_string(),
            ],
            ErrorKind::Resource => vec![
                "Free memory, disk, or descriptors".to_string(),
                "Retry once resources are available".to_string(),
            ],
            ErrorKind::Unknown => vec!["Escalate to an operator".to_string()],
        };
        Self {
            kind,
            strategy: kind.recovery_strategy(),
            steps,
        }
    }
}

/// A classified, deduplicated fingerprint of an error message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSignature {
    /// The classified kind.
    pub kind: ErrorKind,
    /// A short hash of the normalized message, stable across re-runs that
    /// differ only in line numbers, paths, or literal values.
    pub message_hash: String,
}

/// The result of classifying a single error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The classified kind.
    pub kind: ErrorKind,
    /// The severity bucket.
    pub severity: ErrorSeverity,
    /// The recommended recovery strategy.
    pub strategy: RecoveryStrategy,
    /// The dedup signature for this message.
    pub signature: ErrorSignature,
}

struct Pattern {
    kind: ErrorKind,
    regex: Regex,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let compile = |kind: ErrorKind, pat: &str| Pattern {
        kind,
        regex: Regex::new(&format!("(?i){pat}")).expect("static pattern is valid"),
    };
    vec![
        compile(ErrorKind::Syntax, "syntaxerror|indentationerror|invalid syntax"),
        compile(
            ErrorKind::Import,
            "importerror|modulenotfounderror|no module named",
        ),
        compile(ErrorKind::Type, "typeerror|unsupported operand type"),
        compile(
            ErrorKind::Runtime,
            "runtimeerror|recursion depth|maximum recursion",
        ),
        compile(
            ErrorKind::TestFailure,
            r"failed\s+test|test.*failed|assertionerror",
        ),
        compile(
            ErrorKind::Environment,
            "filenotfounderror|no such file or directory|permissionerror|permission denied",
        ),
        compile(ErrorKind::Timeout, "timeouterror|timed out|timeout"),
        compile(
            ErrorKind::Network,
            "connectionerror|connection refused|connection reset|networkerror",
        ),
        compile(ErrorKind::Logic, "valueerror|keyerror|indexerror"),
    ]
});

static LINE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+:").unwrap());
static BARE_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static UNIX_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[\w./\-]+").unwrap());
static WINDOWS_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]:\\[\w\\.\-]+").unwrap());
static DOUBLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*""#).unwrap());
static SINGLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'[^']*'").unwrap());

/// Classifies and fingerprints raw error text.
///
/// Not `Send`-sensitive state: pure function plus a history map a caller
/// keeps per session if it wants `is_similar_to_previous` semantics (see
/// `ErrorClassifier` below).
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    history: Vec<ErrorSignature>,
}

impl ErrorClassifier {
    /// Creates a classifier with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `message`, optionally using `context_hint` to
    /// disambiguate (for example `"test"` nudges an `AssertionError`
    /// towards `ErrorKind::TestFailure` over `ErrorKind::Logic`).
    #[must_use]
    pub fn classify(&self, message: &str, context_hint: Option<&str>) -> ClassificationResult {
        let kind = self.detect_error_type(message, context_hint);
        ClassificationResult {
            kind,
            severity: kind.severity(),
            strategy: kind.recovery_strategy(),
            signature: self.get_signature(kind, message),
        }
    }

    fn detect_error_type(&self, message: &str, context_hint: Option<&str>) -> ErrorKind {
        if context_hint == Some("test") && message.to_lowercase().contains("assertionerror") {
            return ErrorKind::TestFailure;
        }
        for pattern in PATTERNS.iter() {
            if pattern.regex.is_match(message) {
                return pattern.kind;
            }
        }
        ErrorKind::Unknown
    }

    /// Computes the dedup signature (kind + normalized-message hash) for
    /// `message`, without recording it into history.
    #[must_use]
    pub fn get_signature(&self, kind: ErrorKind, message: &str) -> ErrorSignature {
        let normalized = normalize_error(message);
        ErrorSignature {
            kind,
            message_hash: short_hash(&normalized),
        }
    }

    /// Classifies and records `message` into this classifier's history.
    pub fn record_error(&mut self, message: &str, context_hint: Option<&str>) -> ClassificationResult {
        let result = self.classify(message, context_hint);
        self.history.push(result.signature.clone());
        result
    }

    /// True if `message`'s signature matches the most recently recorded
    /// signature.
    #[must_use]
    pub fn is_similar_to_previous(&self, message: &str, context_hint: Option<&str>) -> bool {
        let Some(last) = self.history.last() else {
            return false;
        };
        let kind = self.detect_error_type(message, context_hint);
        *last == self.get_signature(kind, message)
    }

    /// Count of times `signature` appears in history.
    #[must_use]
    pub fn get_error_count(&self, signature: &ErrorSignature) -> usize {
        self.history.iter().filter(|s| *s == signature).count()
    }

    /// Clears recorded history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

fn normalize_error(message: &str) -> String {
    let s = LINE_NUMBER_RE.replace_all(message, ":N:");
    let s = UNIX_PATH_RE.replace_all(&s, "PATH");
    let s = WINDOWS_PATH_RE.replace_all(&s, "PATH");
    let s = DOUBLE_QUOTED_RE.replace_all(&s, "X");
    let s = SINGLE_QUOTED_RE.replace_all(&s, "X");
    let s = BARE_INT_RE.replace_all(&s, "N");
    s.into_owned()
}

fn short_hash(normalized: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{:012x}", hasher.finish() & 0xFFFF_FFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_patterns() {
        let c = ErrorClassifier::new();
        assert_eq!(c.classify("SyntaxError: invalid syntax", None).kind, ErrorKind::Syntax);
        assert_eq!(
            c.classify("ModuleNotFoundError: No module named 'foo'", None).kind,
            ErrorKind::Import
        );
        assert_eq!(c.classify("TimeoutError: timed out", None).kind, ErrorKind::Timeout);
        assert_eq!(c.classify("completely unrecognized text", None).kind, ErrorKind::Unknown);
    }

    #[test]
    fn context_hint_disambiguates_assertion_error() {
        let c = ErrorClassifier::new();
        let result = c.classify("AssertionError: expected 1 got 2", Some("test"));
        assert_eq!(result.kind, ErrorKind::TestFailure);
    }

    #[test]
    fn normalization_makes_signatures_stable_across_line_numbers() {
        let c = ErrorClassifier::new();
        let a = c.classify("RuntimeError: failed at app.py:42: value 7", None);
        let b = c.classify("RuntimeError: failed at app.py:99: value 3", None);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn is_similar_to_previous_tracks_last_recorded_signature() {
        let mut c = ErrorClassifier::new();
        assert!(!c.is_similar_to_previous("RuntimeError: boom", None));
        c.record_error("RuntimeError: boom", None);
        assert!(c.is_similar_to_previous("RuntimeError: boom", None));
        assert!(!c.is_similar_to_previous("TimeoutError: slow", None));
    }

    #[test]
    fn escalation_thresholds_match_taxonomy() {
        assert_eq!(ErrorKind::TestFailure.escalation_threshold(), 10);
        assert_eq!(ErrorKind::Environment.escalation_threshold(), 3);
        assert_eq!(ErrorKind::Network.escalation_threshold(), 8);
    }
}
