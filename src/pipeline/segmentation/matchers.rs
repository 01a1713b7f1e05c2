//! Ordered split heuristics for flat recognition text.
//!
//! Each matcher either claims the text (returning a split) or passes.
//! Matchers run in priority order: timestamps, then "label:" prefixes,
//! then the line-merge fallback, which always applies. Timestamp
//! priority is kept for behavioral compatibility with deployed batches
//! even though clock-like substrings inside ordinary sentences can trip
//! it — a known weakness, not a guarantee of correctness.

use std::sync::LazyLock;

use regex::Regex;

/// A token pattern like `10:05` or `9:42`. No word-boundary anchors:
/// CJK text has no word breaks around digits.
static TIMESTAMP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());

/// A "label:" prefix — a run of non-colon, non-newline characters
/// followed by an ASCII or full-width colon.
static LABEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^:\n：]+[:：]").unwrap());

/// Lines shorter than this merge with a short neighbor.
const MERGE_MAX_CHARS: usize = 10;

/// A buffer must exceed this length to flush as a candidate.
const FLUSH_MIN_CHARS: usize = 5;

/// One split heuristic. Returns `None` when it does not apply.
pub trait SegmentMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn split(&self, text: &str) -> Option<Vec<String>>;
}

/// Matchers in priority order.
pub fn default_matchers() -> Vec<Box<dyn SegmentMatcher>> {
    vec![
        Box::new(TimestampMatcher),
        Box::new(LabelMatcher),
        Box::new(LineMergeMatcher),
    ]
}

// ── TimestampMatcher ──────────────────────────────────────

/// Splits on clock-like tokens when two or more are present, keeping
/// each token attached to its following text.
pub struct TimestampMatcher;

impl SegmentMatcher for TimestampMatcher {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn split(&self, text: &str) -> Option<Vec<String>> {
        split_at_matches(text, &TIMESTAMP_PATTERN)
    }
}

// ── LabelMatcher ──────────────────────────────────────────

/// Splits on "label:" prefixes when two or more are present, keeping
/// each prefix attached to its following text.
pub struct LabelMatcher;

impl SegmentMatcher for LabelMatcher {
    fn name(&self) -> &'static str {
        "label"
    }

    fn split(&self, text: &str) -> Option<Vec<String>> {
        split_at_matches(text, &LABEL_PATTERN)
    }
}

// ── LineMergeMatcher ──────────────────────────────────────

/// Fallback: newline split with short-line merging. Always applies.
pub struct LineMergeMatcher;

impl SegmentMatcher for LineMergeMatcher {
    fn name(&self) -> &'static str {
        "line_merge"
    }

    fn split(&self, text: &str) -> Option<Vec<String>> {
        Some(merge_short_lines(text))
    }
}

// ═══════════════════════════════════════════════════════════
// Shared splitting helpers
// ═══════════════════════════════════════════════════════════

/// Split at the start of each pattern match, requiring at least two
/// matches; the matched run stays attached to its following text.
/// Empty fragments are discarded.
fn split_at_matches(text: &str, pattern: &Regex) -> Option<Vec<String>> {
    let starts: Vec<usize> = pattern.find_iter(text).map(|m| m.start()).collect();
    if starts.len() < 2 {
        return None;
    }

    let mut fragments = Vec::with_capacity(starts.len() + 1);
    let mut begin = 0usize;
    for &start in &starts {
        if start > begin {
            fragments.push(text[begin..start].to_string());
        }
        begin = start;
    }
    fragments.push(text[begin..].to_string());

    Some(
        fragments
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
    )
}

/// Newline split with short-line merging: two consecutive lines shorter
/// than `MERGE_MAX_CHARS` join with a space; a buffer flushes once it
/// exceeds `FLUSH_MIN_CHARS` and the merge condition fails. Lengths are
/// character counts, not bytes.
pub fn merge_short_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buffer = String::new();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !buffer.is_empty()
            && buffer.chars().count() < MERGE_MAX_CHARS
            && line.chars().count() < MERGE_MAX_CHARS
        {
            buffer.push(' ');
            buffer.push_str(line);
        } else {
            if buffer.chars().count() > FLUSH_MIN_CHARS {
                out.push(std::mem::take(&mut buffer));
            } else {
                buffer.clear();
            }
            buffer.push_str(line);
        }
    }

    if buffer.chars().count() > FLUSH_MIN_CHARS {
        out.push(buffer);
    }

    out
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
