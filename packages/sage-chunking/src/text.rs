//! Character-window helpers. Every slice returned here starts and ends on a char boundary.

use std::sync::LazyLock;

use regex::Regex;

/// Sentence terminators, optional closing quotes or brackets, then whitespace or end of text.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"[.!?\u{2026}\u{3002}\u{FF01}\u{FF1F}]+["'\)\]\u{201D}\u{2019}]*(\s+|$)"#)
		.expect("Sentence delimiter pattern must compile.")
});

pub(crate) fn char_len(text: &str) -> usize {
	text.chars().count()
}

pub(crate) fn head_chars(text: &str, n: usize) -> &str {
	match text.char_indices().nth(n) {
		Some((idx, _)) => &text[..idx],
		None => text,
	}
}

pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
	if n == 0 {
		return "";
	}

	match text.char_indices().rev().nth(n - 1) {
		Some((idx, _)) => &text[idx..],
		None => text,
	}
}

/// Byte ranges of trimmed, non-empty sentences found by delimiter matching.
pub(crate) fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
	let mut spans = Vec::new();
	let mut start = 0_usize;

	for found in SENTENCE_END.find_iter(text) {
		push_trimmed_span(text, start, found.end(), &mut spans);

		start = found.end();
	}

	push_trimmed_span(text, start, text.len(), &mut spans);

	spans
}

fn push_trimmed_span(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
	if start >= end {
		return;
	}

	let raw = &text[start..end];
	let leading = raw.len() - raw.trim_start().len();
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return;
	}

	let span_start = start + leading;

	spans.push((span_start, span_start + trimmed.len()));
}

/// Joins two fragments with a single space, dropping whitespace at the seam.
pub(crate) fn join_trimmed(left: &str, right: &str) -> String {
	let left = left.trim();
	let right = right.trim();

	match (left.is_empty(), right.is_empty()) {
		(true, _) => right.to_string(),
		(_, true) => left.to_string(),
		_ => format!("{left} {right}"),
	}
}

/// Closest whitespace byte offset to `target` inside `text`, or the nearest char boundary.
pub(crate) fn snap_to_whitespace(text: &str, target: usize) -> usize {
	let mut best: Option<usize> = None;

	for (idx, ch) in text.char_indices() {
		if !ch.is_whitespace() || idx == 0 {
			continue;
		}
		if best.map(|current| idx.abs_diff(target) < current.abs_diff(target)).unwrap_or(true) {
			best = Some(idx);
		}
	}

	if let Some(idx) = best {
		return idx;
	}

	let mut boundary = target.min(text.len());

	while !text.is_char_boundary(boundary) {
		boundary -= 1;
	}

	boundary
}
