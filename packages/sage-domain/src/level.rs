use serde::{Deserialize, Serialize};

/// Fine-grained difficulty, ordered from weakest to strongest comprehension.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
	VeryStruggling,
	Struggling,
	Normal,
	Good,
	Excellent,
}
impl DifficultyLevel {
	pub const ALL: [Self; 5] =
		[Self::VeryStruggling, Self::Struggling, Self::Normal, Self::Good, Self::Excellent];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::VeryStruggling => "very_struggling",
			Self::Struggling => "struggling",
			Self::Normal => "normal",
			Self::Good => "good",
			Self::Excellent => "excellent",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|level| level.as_str() == raw)
	}

	/// Position on the scale. Adjacent levels differ by exactly one.
	pub fn rank(self) -> u8 {
		self as u8
	}

	pub fn legacy(self) -> LegacyLevel {
		to_legacy(self)
	}
}

/// Coarse vocabulary read by personalization code that predates the five-level scale.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyLevel {
	Beginner,
	Intermediate,
	Advanced,
}
impl LegacyLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Beginner => "beginner",
			Self::Intermediate => "intermediate",
			Self::Advanced => "advanced",
		}
	}
}
impl From<DifficultyLevel> for LegacyLevel {
	fn from(level: DifficultyLevel) -> Self {
		to_legacy(level)
	}
}

pub fn to_legacy(level: DifficultyLevel) -> LegacyLevel {
	match level {
		DifficultyLevel::VeryStruggling | DifficultyLevel::Struggling => LegacyLevel::Beginner,
		DifficultyLevel::Normal => LegacyLevel::Intermediate,
		DifficultyLevel::Good | DifficultyLevel::Excellent => LegacyLevel::Advanced,
	}
}
