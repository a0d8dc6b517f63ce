use serde::{Deserialize, Serialize};

use crate::{Chunk, ChunkingConfig, text};

/// Shortest duplicated run that counts as an overlap. Shorter matches are ordinary shared words,
/// unless the run is a whole chunk.
const MIN_KEY_CHARS: usize = 12;
/// Sentences shorter than this ("Yes.", "See above.") repeat legitimately.
const MIN_SENTENCE_CHARS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
	None,
	ExactDuplicate,
	PartialOverlap,
	SentenceDuplicate,
}
impl OverlapKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::ExactDuplicate => "exact_duplicate",
			Self::PartialOverlap => "partial_overlap",
			Self::SentenceDuplicate => "sentence_duplicate",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
	/// The duplicated span was kept once and the boundary moved to its midpoint.
	Recut,
	/// The duplicated span was removed from the later chunk.
	Trimmed,
	/// One chunk of the pair carried nothing but duplicated text and was dropped.
	Merged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryRepair {
	/// Ordinal of the earlier chunk before renumbering.
	pub left_ordinal: i32,
	pub kind: OverlapKind,
	pub action: RepairAction,
	pub removed_chars: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
	pub repairs: Vec<BoundaryRepair>,
}
impl RepairReport {
	pub fn is_clean(&self) -> bool {
		self.repairs.is_empty()
	}

	pub fn count(&self, kind: OverlapKind) -> usize {
		self.repairs.iter().filter(|repair| repair.kind == kind).count()
	}

	pub fn removed_chars(&self) -> usize {
		self.repairs.iter().map(|repair| repair.removed_chars).sum()
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryFinding {
	/// Position of the earlier chunk of the pair.
	pub left_position: usize,
	pub kind: OverlapKind,
}

/// Byte offsets below are relative to the later chunk.
enum Overlap {
	/// The first `len` bytes of the later chunk repeat the tail of the earlier one.
	Exact { len: usize },
	Partial { start: usize, end: usize },
	Sentences { spans: Vec<(usize, usize)> },
}
impl Overlap {
	fn kind(&self) -> OverlapKind {
		match self {
			Self::Exact { .. } => OverlapKind::ExactDuplicate,
			Self::Partial { .. } => OverlapKind::PartialOverlap,
			Self::Sentences { .. } => OverlapKind::SentenceDuplicate,
		}
	}
}

enum Outcome {
	Recut { left: String, right: String },
	Trimmed { right: String },
	DropLeft,
	DropRight,
}

pub(crate) fn detect(earlier: &str, later: &str, cfg: &ChunkingConfig) -> OverlapKind {
	find(earlier.trim(), later.trim(), cfg).map(|overlap| overlap.kind()).unwrap_or(OverlapKind::None)
}

/// Every applied action strictly shrinks the total text or the chunk count, so the loop ends.
pub(crate) fn repair_until_clean(
	chunks: Vec<Chunk>,
	cfg: &ChunkingConfig,
) -> (Vec<Chunk>, RepairReport) {
	let mut chunks: Vec<Chunk> = chunks
		.into_iter()
		.filter_map(|mut chunk| {
			let trimmed = chunk.text.trim();

			if trimmed.is_empty() {
				return None;
			}
			if trimmed.len() != chunk.text.len() {
				chunk.text = trimmed.to_string();
			}

			Some(chunk)
		})
		.collect();
	let mut report = RepairReport::default();

	loop {
		let mut changed = false;
		let mut idx = 0_usize;

		while idx + 1 < chunks.len() {
			let Some(overlap) = find(&chunks[idx].text, &chunks[idx + 1].text, cfg) else {
				idx += 1;

				continue;
			};
			let kind = overlap.kind();
			let before = text::char_len(&chunks[idx].text) + text::char_len(&chunks[idx + 1].text);
			let left_ordinal = chunks[idx].ordinal_index;
			let action = match apply(&chunks[idx].text, &chunks[idx + 1].text, overlap) {
				Outcome::Recut { left, right } => {
					chunks[idx].text = left;
					chunks[idx + 1].text = right;

					RepairAction::Recut
				},
				Outcome::Trimmed { right } => {
					chunks[idx + 1].text = right;

					RepairAction::Trimmed
				},
				Outcome::DropLeft => {
					chunks.remove(idx);

					RepairAction::Merged
				},
				Outcome::DropRight => {
					chunks.remove(idx + 1);

					RepairAction::Merged
				},
			};
			let after = chunks.get(idx).map(|chunk| text::char_len(&chunk.text)).unwrap_or(0)
				+ match action {
					RepairAction::Merged => 0,
					_ => text::char_len(&chunks[idx + 1].text),
				};

			tracing::debug!(
				left_ordinal,
				kind = kind.as_str(),
				action = ?action,
				"Repaired chunk boundary."
			);

			report.repairs.push(BoundaryRepair {
				left_ordinal,
				kind,
				action,
				removed_chars: before.saturating_sub(after),
			});

			changed = true;
		}

		if !changed {
			break;
		}
	}

	(chunks, report)
}

fn find(earlier: &str, later: &str, cfg: &ChunkingConfig) -> Option<Overlap> {
	if earlier.is_empty() || later.is_empty() {
		return None;
	}

	find_exact(earlier, later, cfg)
		.or_else(|| find_partial(earlier, later, cfg))
		.or_else(|| find_sentences(earlier, later, cfg))
}

fn find_exact(earlier: &str, later: &str, cfg: &ChunkingConfig) -> Option<Overlap> {
	let len = longest_suffix_prefix(earlier, later)?;
	let chars = text::char_len(&later[..len]);
	let required = cfg
		.boundary_window
		.min(text::char_len(earlier))
		.min(text::char_len(later))
		.max(MIN_KEY_CHARS);

	let exact = chars >= required || covers_whole_chunk(earlier, later, len);

	exact.then_some(Overlap::Exact { len })
}

/// The shared run is all of one chunk and sits on word boundaries in the other.
fn covers_whole_chunk(earlier: &str, later: &str, len: usize) -> bool {
	let start = earlier.len() - len;
	let starts_on_word = earlier[..start].chars().next_back().is_none_or(char::is_whitespace);
	let ends_on_word = later[len..].chars().next().is_none_or(char::is_whitespace);

	(start == 0 || len == later.len()) && starts_on_word && ends_on_word
}

/// Byte length of the longest suffix of `earlier` that `later` starts with.
fn longest_suffix_prefix(earlier: &str, later: &str) -> Option<usize> {
	earlier
		.char_indices()
		.map(|(idx, _)| &earlier[idx..])
		.find(|suffix| suffix.len() <= later.len() && later.starts_with(suffix))
		.map(str::len)
}

fn find_partial(earlier: &str, later: &str, cfg: &ChunkingConfig) -> Option<Overlap> {
	let window = cfg.partial_window;
	let tail = text::tail_chars(earlier, window);

	if text::char_len(tail) >= MIN_KEY_CHARS
		&& let Some(pos) = later.find(tail)
	{
		let extend = common_suffix_len(&earlier[..earlier.len() - tail.len()], &later[..pos]);

		return Some(Overlap::Partial { start: pos - extend, end: pos + tail.len() });
	}

	let head = text::head_chars(later, window);

	if text::char_len(head) >= MIN_KEY_CHARS
		&& let Some(pos) = earlier.find(head)
	{
		let extend = common_prefix_len(&earlier[pos + head.len()..], &later[head.len()..]);

		return Some(Overlap::Partial { start: 0, end: head.len() + extend });
	}

	None
}

fn find_sentences(earlier: &str, later: &str, cfg: &ChunkingConfig) -> Option<Overlap> {
	let window = cfg.sentence_window;
	let earlier_spans = text::sentence_spans(earlier);
	let tail_sentences: Vec<&str> = earlier_spans
		.iter()
		.skip(earlier_spans.len().saturating_sub(window))
		.map(|(start, end)| &earlier[*start..*end])
		.collect();
	let spans: Vec<(usize, usize)> = text::sentence_spans(later)
		.into_iter()
		.take(window)
		.filter(|(start, end)| {
			let sentence = &later[*start..*end];

			text::char_len(sentence) >= MIN_SENTENCE_CHARS && tail_sentences.contains(&sentence)
		})
		.collect();

	(!spans.is_empty()).then_some(Overlap::Sentences { spans })
}

fn apply(earlier: &str, later: &str, overlap: Overlap) -> Outcome {
	match overlap {
		Overlap::Exact { len } => {
			let head = &earlier[..earlier.len() - len];
			let span = &later[..len];
			let rest = &later[len..];

			if rest.trim().is_empty() {
				return Outcome::DropRight;
			}
			if head.trim().is_empty() {
				return Outcome::DropLeft;
			}

			let mid = text::snap_to_whitespace(span, span.len() / 2);
			let left = format!("{head}{}", &span[..mid]).trim().to_string();
			let right = format!("{}{rest}", &span[mid..]).trim().to_string();

			Outcome::Recut { left, right }
		},
		Overlap::Partial { start, end } => {
			let right = text::join_trimmed(&later[..start], &later[end..]);

			if right.is_empty() { Outcome::DropRight } else { Outcome::Trimmed { right } }
		},
		Overlap::Sentences { spans } => {
			let mut right = String::new();
			let mut cursor = 0_usize;

			for (start, end) in spans {
				right = text::join_trimmed(&right, &later[cursor..start]);
				cursor = end;
			}

			right = text::join_trimmed(&right, &later[cursor..]);

			if right.is_empty() { Outcome::DropRight } else { Outcome::Trimmed { right } }
		},
	}
}

fn common_suffix_len(left: &str, right: &str) -> usize {
	left.chars()
		.rev()
		.zip(right.chars().rev())
		.take_while(|(a, b)| a == b)
		.map(|(a, _)| a.len_utf8())
		.sum()
}

fn common_prefix_len(left: &str, right: &str) -> usize {
	left.chars().zip(right.chars()).take_while(|(a, b)| a == b).map(|(a, _)| a.len_utf8()).sum()
}

#[cfg(test)]
mod tests {
	use crate::{
		Chunk, ChunkingConfig, OverlapKind, RepairAction, audit, detect_overlap, repair, resolve,
	};

	const DUPLICATE: &str = "Photosynthesis converts light energy into chemical energy stored in glucose molecules inside plant cells.";

	fn chunks(texts: &[&str]) -> Vec<Chunk> {
		texts
			.iter()
			.enumerate()
			.map(|(idx, text)| Chunk {
				ordinal_index: idx as i32,
				text: text.to_string(),
				context_prefix: String::new(),
			})
			.collect()
	}

	#[test]
	fn distinct_chunks_are_clean() {
		let cfg = ChunkingConfig::default();
		let kind = detect_overlap(
			"Cells divide through mitosis in four phases.",
			"Meiosis produces gametes with half the chromosomes.",
			&cfg,
		);

		assert_eq!(kind, OverlapKind::None);
	}

	#[test]
	fn exact_duplicate_is_recut_once() {
		let cfg = ChunkingConfig::default();
		let left = format!("Plants need sunlight to grow. {DUPLICATE}");
		let right = format!("{DUPLICATE} Chlorophyll absorbs mostly red and blue light.");

		assert_eq!(detect_overlap(&left, &right, &cfg), OverlapKind::ExactDuplicate);

		let (repaired, report) = repair(chunks(&[&left, &right]), &cfg);

		assert_eq!(repaired.len(), 2);
		assert_eq!(report.count(OverlapKind::ExactDuplicate), 1);
		assert_eq!(report.repairs[0].action, RepairAction::Recut);
		assert_eq!(
			format!("{} {}", repaired[0].text, repaired[1].text),
			format!(
				"Plants need sunlight to grow. {DUPLICATE} Chlorophyll absorbs mostly red and blue light."
			)
		);
		assert_eq!(detect_overlap(&repaired[0].text, &repaired[1].text, &cfg), OverlapKind::None);
	}

	#[test]
	fn fully_duplicated_chunk_is_merged() {
		let cfg = ChunkingConfig::default();
		let right = format!("{DUPLICATE} More detail follows here.");
		let (repaired, report) = repair(chunks(&[DUPLICATE, &right]), &cfg);

		assert_eq!(repaired.len(), 1);
		assert_eq!(repaired[0].text, right);
		assert_eq!(repaired[0].ordinal_index, 0);
		assert_eq!(report.repairs[0].action, RepairAction::Merged);
	}

	#[test]
	fn partial_overlap_is_trimmed_from_later_chunk() {
		let cfg = ChunkingConfig::default();
		let phrase = "the Calvin cycle fixes carbon dioxide into three-carbon sugars";
		let left = format!("Light reactions happen in the thylakoid membranes and {phrase}");
		let right = format!("In the stroma, {phrase} using ATP and NADPH from earlier steps.");

		assert_eq!(detect_overlap(&left, &right, &cfg), OverlapKind::PartialOverlap);

		let (repaired, report) = repair(chunks(&[&left, &right]), &cfg);

		assert_eq!(report.count(OverlapKind::PartialOverlap), 1);
		assert_eq!(repaired[0].text, left);
		assert_eq!(repaired[1].text, "In the stroma, using ATP and NADPH from earlier steps.");
	}

	#[test]
	fn repeated_sentence_is_removed_from_later_chunk() {
		let cfg = ChunkingConfig::default();
		let left =
			"Cellular respiration happens in every living cell. The mitochondria is the powerhouse.";
		let right =
			"The mitochondria is the powerhouse. It stores energy as ATP for later use by enzymes.";

		assert_eq!(detect_overlap(left, right, &cfg), OverlapKind::SentenceDuplicate);

		let (repaired, _) = repair(chunks(&[left, right]), &cfg);

		assert_eq!(repaired[1].text, "It stores energy as ATP for later use by enzymes.");
	}

	#[test]
	fn short_sentences_may_repeat() {
		let cfg = ChunkingConfig::default();
		let kind = detect_overlap(
			"Is energy conserved in this reaction? Yes.",
			"Yes. Entropy still increases overall across the system.",
			&cfg,
		);

		assert_eq!(kind, OverlapKind::None);
	}

	#[test]
	fn identical_short_chunks_are_exact_duplicates() {
		let cfg = ChunkingConfig::default();

		assert_eq!(detect_overlap("Part 1", "Part 1", &cfg), OverlapKind::ExactDuplicate);
		assert_eq!(detect_overlap("Part 1", "Part 10 begins here.", &cfg), OverlapKind::None);

		let cfg = ChunkingConfig { chunk_size: 7, overlap_budget: 0, ..Default::default() };
		let resolved = resolve("abcdefg abcdefg", &cfg);

		assert_eq!(resolved.chunks.len(), 1);
		assert_eq!(resolved.chunks[0].text, "abcdefg");
		assert_eq!(resolved.report.repairs.len(), 1);
		assert_eq!(resolved.report.repairs[0].action, RepairAction::Merged);
	}

	#[test]
	fn short_chunk_repeated_at_the_next_start_is_merged() {
		let cfg = ChunkingConfig::default();
		let (repaired, report) = repair(chunks(&["Summary", "Summary of chapter two."]), &cfg);

		assert_eq!(repaired.len(), 1);
		assert_eq!(repaired[0].text, "Summary of chapter two.");
		assert_eq!(report.count(OverlapKind::ExactDuplicate), 1);
	}

	#[test]
	fn repair_is_idempotent() {
		let cfg = ChunkingConfig::default();
		let left = format!("Plants need sunlight to grow. {DUPLICATE}");
		let right = format!("{DUPLICATE} Chlorophyll absorbs mostly red and blue light.");
		let tail = "The mitochondria is the powerhouse. Glycolysis splits glucose in the cytoplasm.";
		let third = "Chlorophyll absorbs mostly red and blue light. The mitochondria is the powerhouse.";
		let (once, _) = repair(chunks(&[&left, &right, third, tail]), &cfg);
		let (twice, report) = repair(once.clone(), &cfg);
		let texts: Vec<&str> = once.iter().map(|chunk| chunk.text.as_str()).collect();

		assert_eq!(once, twice);
		assert!(report.is_clean());
		assert!(audit(&texts, &cfg).is_empty());
	}

	#[test]
	fn audit_reports_positions() {
		let cfg = ChunkingConfig::default();
		let left = format!("Plants need sunlight to grow. {DUPLICATE}");
		let right = format!("{DUPLICATE} Chlorophyll absorbs mostly red and blue light.");
		let findings = audit(&["Unrelated opening paragraph about soil.", left.as_str(), right.as_str()], &cfg);

		assert_eq!(findings.len(), 1);
		assert_eq!(findings[0].left_position, 1);
		assert_eq!(findings[0].kind, OverlapKind::ExactDuplicate);
	}
}
