//! Reference validity: cited pattern references must exist and stay in range.

use regex::Regex;

use super::{REFERENCE_VALIDITY, SourceExtents};
use crate::core::types::{CheckResult, PatternReference};

pub fn reference_validity(
    draft: &str,
    references: &[PatternReference],
    extents: &dyn SourceExtents,
) -> CheckResult {
    let mut problems: Vec<String> = Vec::new();
    let mut push = |problem: String| {
        if !problems.contains(&problem) {
            problems.push(problem);
        }
    };

    for reference in references {
        let location = reference.location.as_str();
        if location.is_empty() || !draft.contains(location) {
            continue;
        }
        let Some(line_count) = extents.line_count(location) else {
            push(format!("`{location}` is cited but does not exist"));
            continue;
        };
        let mut ranges = vec![(reference.range.start, reference.range.end)];
        ranges.extend(cited_ranges(draft, location));
        for (start, end) in ranges {
            if start == 0 || start > end {
                push(format!("`{location}` cites invalid line range {start}-{end}"));
            } else if end > line_count {
                push(format!(
                    "`{location}` cites lines {start}-{end} but the file has {line_count} lines"
                ));
            }
        }
    }

    if problems.is_empty() {
        CheckResult::pass(REFERENCE_VALIDITY)
    } else {
        CheckResult::fail(
            REFERENCE_VALIDITY,
            format!(
                "reference validity: {}. Cite only files and line ranges that exist.",
                problems.join("; ")
            ),
        )
    }
}

/// `location:a-b` and `location:a` citations in the draft.
fn cited_ranges(draft: &str, location: &str) -> Vec<(usize, usize)> {
    let pattern = format!(r"{}:(\d+)(?:-(\d+))?", regex::escape(location));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(draft)
        .filter_map(|caps| {
            let start: usize = caps[1].parse().ok()?;
            let end = match caps.get(2) {
                Some(end) => end.as_str().parse().ok()?,
                None => start,
            };
            Some((start, end))
        })
        .collect()
}
