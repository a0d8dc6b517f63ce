//! Chunk construction and boundary repair for ingested documents.
//!
//! Chunks are built greedily from sentence segments up to a character budget. Context carried
//! across a split point lives in [`Chunk::context_prefix`] and never in [`Chunk::text`], so the
//! texts of adjacent chunks stay disjoint. [`repair`] then removes duplication that was already
//! present in the source (repeated headers, copy/paste artifacts) until every boundary is clean.

mod boundary;
mod text;

pub use boundary::{BoundaryFinding, BoundaryRepair, OverlapKind, RepairAction, RepairReport};

use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub chunk_size: usize,
	pub overlap_budget: usize,
	pub boundary_window: usize,
	pub partial_window: usize,
	pub sentence_window: usize,
}
impl Default for ChunkingConfig {
	fn default() -> Self {
		Self {
			chunk_size: 1_000,
			overlap_budget: 200,
			boundary_window: 100,
			partial_window: 50,
			sentence_window: 3,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
	pub ordinal_index: i32,
	pub text: String,
	/// Tail of the previous chunk, at most `overlap_budget` characters. Only used to build the
	/// embedding input.
	pub context_prefix: String,
}
impl Chunk {
	pub fn embedding_input(&self) -> String {
		if self.context_prefix.is_empty() {
			return self.text.clone();
		}

		format!("{}\n{}", self.context_prefix, self.text)
	}
}

#[derive(Clone, Debug)]
pub struct Resolved {
	pub chunks: Vec<Chunk>,
	pub report: RepairReport,
}

/// Splits `text` and repairs every boundary in one go.
pub fn resolve(text: &str, cfg: &ChunkingConfig) -> Resolved {
	let chunks = split(text, cfg);
	let (chunks, report) = repair(chunks, cfg);

	Resolved { chunks, report }
}

pub fn split(text: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
	let budget = cfg.chunk_size.max(1);
	let mut texts = Vec::new();
	let mut current = String::new();
	let mut current_chars = 0_usize;

	for piece in segments(text, budget) {
		let piece_chars = text::char_len(piece);

		if current_chars + piece_chars > budget && !current.trim().is_empty() {
			texts.push(current.trim().to_string());
			current.clear();

			current_chars = 0;
		}

		current.push_str(piece);

		current_chars += piece_chars;
	}

	if !current.trim().is_empty() {
		texts.push(current.trim().to_string());
	}

	let mut chunks: Vec<Chunk> = texts
		.into_iter()
		.enumerate()
		.map(|(idx, text)| Chunk { ordinal_index: idx as i32, text, context_prefix: String::new() })
		.collect();

	attach_context(&mut chunks, cfg.overlap_budget);

	chunks
}

/// Runs the boundary validation pass until no adjacent pair reports an overlap. Ordinals are
/// renumbered from zero and context prefixes rebuilt from the repaired neighbours.
pub fn repair(chunks: Vec<Chunk>, cfg: &ChunkingConfig) -> (Vec<Chunk>, RepairReport) {
	let (mut chunks, report) = boundary::repair_until_clean(chunks, cfg);

	for (idx, chunk) in chunks.iter_mut().enumerate() {
		chunk.ordinal_index = idx as i32;
	}

	attach_context(&mut chunks, cfg.overlap_budget);

	(chunks, report)
}

pub fn detect_overlap(earlier: &str, later: &str, cfg: &ChunkingConfig) -> OverlapKind {
	boundary::detect(earlier, later, cfg)
}

/// Reports the overlap of every adjacent pair without rewriting anything.
pub fn audit<S>(texts: &[S], cfg: &ChunkingConfig) -> Vec<BoundaryFinding>
where
	S: AsRef<str>,
{
	texts
		.windows(2)
		.enumerate()
		.filter_map(|(idx, pair)| {
			let kind = boundary::detect(pair[0].as_ref(), pair[1].as_ref(), cfg);

			(kind != OverlapKind::None).then_some(BoundaryFinding { left_position: idx, kind })
		})
		.collect()
}

/// Sentence segments no longer than `budget` characters. Oversized sentences are cut at word
/// boundaries, oversized words at char boundaries.
fn segments(text: &str, budget: usize) -> Vec<&str> {
	let mut out = Vec::new();

	for sentence in text.split_sentence_bounds() {
		if text::char_len(sentence) <= budget {
			out.push(sentence);

			continue;
		}

		let mut start = 0_usize;
		let mut chars = 0_usize;

		for (idx, word) in sentence.split_word_bound_indices() {
			let word_chars = text::char_len(word);

			if chars + word_chars > budget && chars > 0 {
				out.push(&sentence[start..idx]);

				start = idx;
				chars = 0;
			}
			if word_chars > budget {
				let mut word_start = idx;

				for (char_pos, (offset, _)) in word.char_indices().enumerate() {
					if char_pos > 0 && char_pos % budget == 0 {
						out.push(&sentence[word_start..idx + offset]);

						word_start = idx + offset;
					}
				}

				start = word_start;
				chars = text::char_len(&sentence[word_start..idx + word.len()]);

				continue;
			}

			chars += word_chars;
		}

		if start < sentence.len() {
			out.push(&sentence[start..]);
		}
	}

	out
}

/// Context carried into the chunk that follows `previous`. Empty when `overlap_budget` is zero.
pub fn context_prefix(previous: &str, overlap_budget: usize) -> String {
	if overlap_budget == 0 {
		return String::new();
	}

	context_tail(previous, overlap_budget)
}

fn attach_context(chunks: &mut [Chunk], overlap_budget: usize) {
	let mut previous: Option<String> = None;

	for chunk in chunks.iter_mut() {
		chunk.context_prefix = match previous.as_deref() {
			Some(prev) => context_prefix(prev, overlap_budget),
			None => String::new(),
		};
		previous = Some(chunk.text.clone());
	}
}

/// Trailing context of at most `budget` characters, starting on a sentence when one fits and on a
/// word otherwise.
fn context_tail(text: &str, budget: usize) -> String {
	let tail = text::tail_chars(text, budget);
	let tail_start = text.len() - tail.len();

	if let Some((start, _)) =
		text::sentence_spans(text).into_iter().find(|(start, _)| *start >= tail_start)
	{
		return text[start..].trim().to_string();
	}

	match tail.find(char::is_whitespace) {
		Some(idx) if !tail[idx..].trim().is_empty() => tail[idx..].trim().to_string(),
		_ => tail.trim().to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// 100 characters per sentence. Every short window carries the sentence number so no two
	// sentences share a long substring.
	fn numbered_document(sentences: usize) -> String {
		const WORDS: [&str; 6] = ["Alpha", "beta", "gamma", "delta", "omega", "sigma"];

		(0..sentences)
			.map(|idx| {
				let mut body: String =
					WORDS.iter().cycle().take(12).map(|word| format!("{word}{idx:03} ")).collect();

				body.truncate(98);

				format!("{body}. ")
			})
			.collect()
	}

	#[test]
	fn three_thousand_characters_yield_three_or_four_chunks() {
		let document = numbered_document(30);

		assert_eq!(document.chars().count(), 3_000);

		let cfg = ChunkingConfig::default();
		let resolved = resolve(&document, &cfg);

		assert!((3..=4).contains(&resolved.chunks.len()), "got {}", resolved.chunks.len());
		assert_eq!(resolved.report.count(OverlapKind::ExactDuplicate), 0);
		assert!(resolved.chunks.iter().all(|chunk| chunk.text.chars().count() <= 1_000));
	}

	#[test]
	fn context_prefix_is_bounded_by_overlap_budget() {
		let document = numbered_document(30);
		let cfg = ChunkingConfig::default();
		let chunks = split(&document, &cfg);

		assert!(chunks[0].context_prefix.is_empty());

		for pair in chunks.windows(2) {
			let prefix = &pair[1].context_prefix;

			assert!(!prefix.is_empty());
			assert!(prefix.chars().count() <= cfg.overlap_budget);
			assert!(pair[0].text.ends_with(prefix.as_str()));
			assert!(!pair[1].text.contains(prefix.as_str()));
		}
	}

	#[test]
	fn oversized_words_are_cut_on_char_boundaries() {
		let cfg = ChunkingConfig { chunk_size: 10, overlap_budget: 0, ..Default::default() };
		let word = "\u{E9}".repeat(25);
		let chunks = split(&word, &cfg);

		assert_eq!(chunks.len(), 3);
		assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 10));
		assert_eq!(chunks.iter().map(|chunk| chunk.text.as_str()).collect::<String>(), word);
	}

	#[test]
	fn empty_document_has_no_chunks() {
		let cfg = ChunkingConfig::default();

		assert!(split("   \n\t ", &cfg).is_empty());
	}

	#[test]
	fn embedding_input_prepends_context() {
		let chunk = Chunk {
			ordinal_index: 1,
			text: "Body.".to_string(),
			context_prefix: "Tail.".to_string(),
		};

		assert_eq!(chunk.embedding_input(), "Tail.\nBody.");
	}
}
