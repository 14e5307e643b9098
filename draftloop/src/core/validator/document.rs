//! Minimal markdown view used by the completeness checks: lines and fenced blocks.

/// A fenced code block. Line indices are 0-based and inclusive of the fence lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    pub start: usize,
    pub end: usize,
    /// Info string after the opening fence, lower-cased (`json`, `rust`, ...).
    pub lang: String,
    /// Whether any non-blank line sits between the fences.
    pub has_content: bool,
}

#[derive(Debug)]
pub struct Document<'a> {
    pub lines: Vec<&'a str>,
    pub fences: Vec<Fence>,
    pub chars: usize,
}

impl<'a> Document<'a> {
    pub fn parse(text: &'a str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let mut fences = Vec::new();
        let mut open: Option<(usize, String)> = None;

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim_start();
            if !(trimmed.starts_with("```") || trimmed.starts_with("~~~")) {
                continue;
            }
            match open.take() {
                None => {
                    let info = trimmed.trim_start_matches(['`', '~']).trim();
                    let lang = info
                        .split(|c: char| c.is_whitespace() || c == '{' || c == ',')
                        .next()
                        .unwrap_or("")
                        .to_ascii_lowercase();
                    open = Some((idx, lang));
                }
                Some((start, lang)) => {
                    fences.push(Fence {
                        start,
                        end: idx,
                        has_content: has_content(&lines[start + 1..idx]),
                        lang,
                    });
                }
            }
        }
        // An unclosed fence runs to the end of the document.
        if let Some((start, lang)) = open {
            let end = lines.len().saturating_sub(1);
            fences.push(Fence {
                start,
                end,
                has_content: has_content(&lines[(start + 1).min(lines.len())..]),
                lang,
            });
        }

        Self {
            chars: text.chars().count(),
            lines,
            fences,
        }
    }

    /// The fence containing `line`, fence lines included.
    pub fn fence_at(&self, line: usize) -> Option<&Fence> {
        self.fences
            .iter()
            .find(|fence| fence.start <= line && line <= fence.end)
    }

    /// Fences whose opening line falls in `[from, to]`.
    pub fn fences_starting_in(&self, from: usize, to: usize) -> impl Iterator<Item = &Fence> {
        self.fences
            .iter()
            .filter(move |fence| fence.start >= from && fence.start <= to)
    }

    /// Line indices in `[from, to]`, clamped to the document; empty past the end.
    pub fn window(&self, from: usize, to: usize) -> std::ops::RangeInclusive<usize> {
        match self.lines.len().checked_sub(1) {
            Some(last) if from <= last => from..=to.min(last),
            #[allow(clippy::reversed_empty_ranges)]
            _ => 1..=0,
        }
    }
}

fn has_content(lines: &[&str]) -> bool {
    lines.iter().any(|line| !line.trim().is_empty())
}
