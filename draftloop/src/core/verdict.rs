//! Verdict decoding from free-text reviewer responses.
//!
//! Decoding never fails: a response without a recognizable verdict decodes as
//! [`Verdict::Blocked`], so malformed output can only stop a run, never pass it.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Verdict;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*_#-]*verdict\s*[:=]\s*[*_`]*\s*(APPROVED|APPROVE|REVISE|BLOCKED|BLOCK)\b")
        .unwrap()
});

static BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[\s>*_#`-]*(APPROVED|REVISE|BLOCKED)[\s*_`.!]*$").unwrap()
});

/// How the verdict was found in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// Explicit `VERDICT: X` marker.
    Marker,
    /// A line consisting only of the verdict word.
    BareLine,
    /// Nothing recognizable; failed closed.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedVerdict {
    pub verdict: Verdict,
    pub source: VerdictSource,
}

/// Decode a verdict from reviewer output.
///
/// Order: first `VERDICT: X` marker (case-insensitive), then the first line
/// that is just an upper-case verdict word, then `BLOCKED`.
pub fn decode_verdict(text: &str) -> DecodedVerdict {
    if let Some(caps) = MARKER_RE.captures(text) {
        return DecodedVerdict {
            verdict: verdict_word(&caps[1]),
            source: VerdictSource::Marker,
        };
    }
    if let Some(caps) = BARE_RE.captures(text) {
        return DecodedVerdict {
            verdict: verdict_word(&caps[1]),
            source: VerdictSource::BareLine,
        };
    }
    DecodedVerdict {
        verdict: Verdict::Blocked,
        source: VerdictSource::Fallback,
    }
}

fn verdict_word(word: &str) -> Verdict {
    match word.to_ascii_uppercase().as_str() {
        "APPROVED" | "APPROVE" => Verdict::Approved,
        "REVISE" => Verdict::Revise,
        _ => Verdict::Blocked,
    }
}

/// Strip verdict marker lines, leaving the feedback body.
pub fn feedback_body(text: &str) -> String {
    text.lines()
        .filter(|line| !MARKER_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_explicit_marker() {
        let decoded = decode_verdict("Looks good overall.\n\nVERDICT: APPROVED\n");
        assert_eq!(decoded.verdict, Verdict::Approved);
        assert_eq!(decoded.source, VerdictSource::Marker);
    }

    #[test]
    fn marker_is_case_insensitive_and_tolerates_markdown() {
        let decoded = decode_verdict("**Verdict:** revise\n- add examples");
        assert_eq!(decoded.verdict, Verdict::Revise);
    }

    /// The first marker wins when the reviewer quotes older verdicts later.
    #[test]
    fn first_marker_wins() {
        let decoded = decode_verdict("VERDICT: BLOCKED\n\n> previous VERDICT: APPROVED");
        assert_eq!(decoded.verdict, Verdict::Blocked);
    }

    #[test]
    fn bare_verdict_line_is_accepted() {
        let decoded = decode_verdict("Summary of issues.\n\nREVISE\n");
        assert_eq!(decoded.verdict, Verdict::Revise);
        assert_eq!(decoded.source, VerdictSource::BareLine);
    }

    /// Verdict words inside prose are not a verdict.
    #[test]
    fn prose_mentions_fall_back_to_blocked() {
        let decoded = decode_verdict("I would have APPROVED this if the tests existed.");
        assert_eq!(decoded.verdict, Verdict::Blocked);
        assert_eq!(decoded.source, VerdictSource::Fallback);
    }

    #[test]
    fn empty_response_fails_closed() {
        assert_eq!(decode_verdict("").verdict, Verdict::Blocked);
    }

    #[test]
    fn feedback_body_drops_marker_lines() {
        let body = feedback_body("VERDICT: REVISE\nAdd a JSON example for Order.");
        assert_eq!(body, "Add a JSON example for Order.");
    }
}
