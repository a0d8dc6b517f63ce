pub mod ebars;
pub mod emoji;
pub mod level;

pub use ebars::{ComprehensionState, RatingAverage, ScoreChange, ScoredEvent, level_for_score};
pub use emoji::Emoji;
pub use level::{DifficultyLevel, LegacyLevel, to_legacy};
