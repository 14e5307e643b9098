//! Line-oriented secrets scanner.
//!
//! Any finding blocks content from leaving the machine: callers must stop
//! before handing the text to an external collaborator.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// One detected secret, with the secret itself masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretFinding {
    /// 1-indexed line number.
    pub line: usize,
    pub category: &'static str,
    pub redacted_snippet: String,
}

struct Rule {
    category: &'static str,
    pattern: Regex,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |category, pattern: &str| Rule {
        category,
        pattern: Regex::new(pattern).unwrap(),
    };
    vec![
        rule("private_key", r"-----BEGIN (?:[A-Z]+ )*PRIVATE KEY-----"),
        rule("aws_access_key", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        rule("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
        rule("slack_token", r"\bxox[abprs]-[A-Za-z0-9-]{10,}"),
        rule("api_key", r"\bsk-(?:ant-|proj-)?[A-Za-z0-9_-]{20,}"),
        rule(
            "generic_assignment",
            r#"(?i)(?:api[_-]?key|secret|password|passwd|access[_-]?token|auth[_-]?token)\b\s*[:=]\s*["']?[A-Za-z0-9/+_.=-]{12,}"#,
        ),
    ]
});

/// Scan `text` and return every finding, ordered by line then rule.
///
/// A line matching several rules is reported once, under the first rule.
pub fn scan(text: &str) -> Vec<SecretFinding> {
    let mut findings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for rule in &*RULES {
            if let Some(found) = rule.pattern.find(line) {
                findings.push(SecretFinding {
                    line: idx + 1,
                    category: rule.category,
                    redacted_snippet: redact(found.as_str()),
                });
                break;
            }
        }
    }
    findings
}

/// Keep a short prefix so the finding can be located, mask the rest.
fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    let hidden = secret.chars().count().saturating_sub(4).min(12);
    format!("{visible}{}", "*".repeat(hidden.max(4)))
}

/// Human-readable one-line summary of findings.
pub fn summarize(findings: &[SecretFinding]) -> String {
    findings
        .iter()
        .map(|f| format!("line {} ({}): {}", f.line, f.category, f.redacted_snippet))
        .collect::<Vec<_>>()
        .join("; ")
}
