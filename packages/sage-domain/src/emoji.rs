use serde::{Deserialize, Serialize};

/// The closed set of feedback reactions. Serialized as the emoji symbol itself.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Emoji {
	#[serde(rename = "\u{1F60A}")]
	Smile,
	#[serde(rename = "\u{1F44D}")]
	ThumbsUp,
	#[serde(rename = "\u{1F610}")]
	Neutral,
	#[serde(rename = "\u{274C}")]
	Cross,
}
impl Emoji {
	pub const ALL: [Self; 4] = [Self::Smile, Self::ThumbsUp, Self::Neutral, Self::Cross];

	pub fn symbol(self) -> &'static str {
		match self {
			Self::Smile => "\u{1F60A}",
			Self::ThumbsUp => "\u{1F44D}",
			Self::Neutral => "\u{1F610}",
			Self::Cross => "\u{274C}",
		}
	}

	pub fn from_symbol(raw: &str) -> Option<Self> {
		let raw = raw.trim().trim_end_matches('\u{FE0F}');

		Self::ALL.into_iter().find(|emoji| emoji.symbol() == raw)
	}

	/// Score contribution in `[-1, 1]`.
	pub fn contribution(self) -> f32 {
		match self {
			Self::Smile => 1.0,
			Self::ThumbsUp => 0.6,
			Self::Neutral => -0.3,
			Self::Cross => -1.0,
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::emoji::Emoji;

	#[test]
	fn symbols_resolve_with_variation_selector() {
		assert_eq!(Emoji::from_symbol("\u{1F44D}"), Some(Emoji::ThumbsUp));
		assert_eq!(Emoji::from_symbol("\u{274C}\u{FE0F}"), Some(Emoji::Cross));
		assert_eq!(Emoji::from_symbol("\u{1F389}"), None);
	}

	#[test]
	fn contributions_stay_in_unit_range() {
		for emoji in Emoji::ALL {
			assert!((-1.0..=1.0).contains(&emoji.contribution()));
		}
	}
}
