//! Token-level text signals shared by knowledge-base lookup, local reranking and dedup.

use ahash::AHashMap;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// NFKC-folded, lowercased words.
pub fn tokens(text: &str) -> Vec<String> {
	let folded: String = text.nfkc().collect::<String>().to_lowercase();

	folded.unicode_words().map(str::to_string).collect()
}

/// Distinct query terms in first-seen order, skipping single-character tokens.
pub fn query_terms(query: &str, max_terms: usize) -> Vec<String> {
	let mut terms: Vec<String> = Vec::new();

	for token in tokens(query) {
		if token.chars().count() < 2 || terms.contains(&token) {
			continue;
		}

		terms.push(token);

		if terms.len() >= max_terms {
			break;
		}
	}

	terms
}

/// Share of `terms` that occur in `content`.
pub fn lexical_overlap(terms: &[String], content: &str) -> f32 {
	if terms.is_empty() {
		return 0.0;
	}

	let content_tokens = tokens(content);
	let hits = terms.iter().filter(|term| content_tokens.contains(term)).count();

	hits as f32 / terms.len() as f32
}

/// Word-multiset overlap normalised by the larger side. 1.0 means the same words with the same
/// multiplicities.
pub fn multiset_overlap(a: &str, b: &str) -> f32 {
	let a_counts = counts(a);
	let b_counts = counts(b);
	let a_total: usize = a_counts.values().sum();
	let b_total: usize = b_counts.values().sum();
	let larger = a_total.max(b_total);

	if larger == 0 {
		return 0.0;
	}

	let shared: usize = a_counts
		.iter()
		.map(|(token, count)| (*count).min(b_counts.get(token).copied().unwrap_or(0)))
		.sum();

	shared as f32 / larger as f32
}

/// Stable fingerprint of the normalised word sequence.
pub fn fingerprint(text: &str) -> String {
	blake3::hash(tokens(text).join(" ").as_bytes()).to_hex().to_string()
}

fn counts(text: &str) -> AHashMap<String, usize> {
	let mut out = AHashMap::new();

	for token in tokens(text) {
		*out.entry(token).or_insert(0) += 1;
	}

	out
}

#[cfg(test)]
mod tests {
	use crate::text::{fingerprint, lexical_overlap, multiset_overlap, query_terms};

	#[test]
	fn fullwidth_and_case_fold_together() {
		assert_eq!(fingerprint("ＡＴＰ Synthase"), fingerprint("atp  synthase"));
	}

	#[test]
	fn query_terms_are_distinct_and_bounded() {
		let terms = query_terms("What is a cell? The cell wall, the cell membrane.", 4);

		assert_eq!(terms, vec!["what", "is", "cell", "the"]);
	}

	#[test]
	fn overlap_counts_term_presence() {
		let terms = vec!["mitochondria".to_string(), "ribosome".to_string()];

		assert_eq!(lexical_overlap(&terms, "Mitochondria make ATP."), 0.5);
		assert_eq!(lexical_overlap(&[], "anything"), 0.0);
	}

	#[test]
	fn multiset_overlap_respects_multiplicity() {
		assert_eq!(multiset_overlap("a b c d", "d c b a"), 1.0);
		assert_eq!(multiset_overlap("go go go go", "go"), 0.25);
		assert_eq!(multiset_overlap("", ""), 0.0);
	}
}
