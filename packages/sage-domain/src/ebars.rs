//! Comprehension scoring.
//!
//! A learner's score moves by `c * max_step * sensitivity(n)` for every scored event, where `c` is
//! the event contribution in `[-1, 1]` and `n` the number of events already applied. Sensitivity
//! starts at `min_sensitivity` and approaches 1.0 as `n` grows, so early noise cannot swing a fresh
//! learner across several levels. The level is always derived from the score.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::level::DifficultyLevel;
use sage_config::Ebars;

/// Incremental mean over 1-5 ratings.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RatingAverage {
	pub mean: Option<f32>,
	pub samples: u32,
}
impl RatingAverage {
	pub fn fold(&mut self, rating: u8) {
		let value = f32::from(rating);

		self.samples += 1;
		self.mean = Some(match self.mean {
			Some(mean) => mean + (value - mean) / self.samples as f32,
			None => value,
		});
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ComprehensionState {
	pub user_id: String,
	pub session_id: String,
	pub comprehension_score: f32,
	pub difficulty_level: DifficultyLevel,
	pub total_feedback_count: u32,
	pub understanding: RatingAverage,
	pub satisfaction: RatingAverage,
	#[serde(with = "time::serde::rfc3339")]
	pub last_updated: OffsetDateTime,
}
impl ComprehensionState {
	pub fn neutral(
		cfg: &Ebars,
		user_id: impl Into<String>,
		session_id: impl Into<String>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			user_id: user_id.into(),
			session_id: session_id.into(),
			comprehension_score: cfg.initial_score,
			difficulty_level: level_for_score(cfg, cfg.initial_score),
			total_feedback_count: 0,
			understanding: RatingAverage::default(),
			satisfaction: RatingAverage::default(),
			last_updated: now,
		}
	}

	/// Re-derives the level from the score under `cfg`. States written under other thresholds
	/// report the level their score earns today.
	pub fn refresh_level(&mut self, cfg: &Ebars) {
		self.difficulty_level = level_for_score(cfg, self.comprehension_score);
	}

	pub fn apply(&mut self, cfg: &Ebars, event: &ScoredEvent, now: OffsetDateTime) -> ScoreChange {
		let previous_score = self.comprehension_score;
		let previous_level = level_for_score(cfg, previous_score);
		let delta = weight(cfg, event.contribution, self.total_feedback_count);
		let score = (previous_score + delta).clamp(cfg.min_score, cfg.max_score);

		self.comprehension_score = score;
		self.difficulty_level = level_for_score(cfg, score);
		self.total_feedback_count = self.total_feedback_count.saturating_add(1);
		self.last_updated = now;

		if let Some(rating) = event.understanding {
			self.understanding.fold(rating);
		}
		if let Some(rating) = event.satisfaction {
			self.satisfaction.fold(rating);
		}

		ScoreChange {
			previous_score,
			score,
			previous_level,
			level: self.difficulty_level,
		}
	}
}

/// A scored input: an emoji reaction or an assessment outcome, plus optional ratings.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredEvent {
	pub contribution: f32,
	pub understanding: Option<u8>,
	pub satisfaction: Option<u8>,
}
impl ScoredEvent {
	pub fn from_contribution(contribution: f32) -> Self {
		Self { contribution, understanding: None, satisfaction: None }
	}
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScoreChange {
	pub previous_score: f32,
	pub score: f32,
	pub previous_level: DifficultyLevel,
	pub level: DifficultyLevel,
}
impl ScoreChange {
	pub fn delta(&self) -> f32 {
		self.score - self.previous_score
	}

	pub fn level_changed(&self) -> bool {
		self.previous_level != self.level
	}
}

/// Lower bounds are inclusive: a score equal to a threshold belongs to the higher level.
pub fn level_for_score(cfg: &Ebars, score: f32) -> DifficultyLevel {
	let t = &cfg.thresholds;

	if score >= t.excellent {
		DifficultyLevel::Excellent
	} else if score >= t.good {
		DifficultyLevel::Good
	} else if score >= t.normal {
		DifficultyLevel::Normal
	} else if score >= t.struggling {
		DifficultyLevel::Struggling
	} else {
		DifficultyLevel::VeryStruggling
	}
}

pub fn sensitivity(cfg: &Ebars, applied_events: u32) -> f32 {
	let ramp = 1.0 - (-(applied_events as f32) / cfg.warmup_events).exp();

	cfg.min_sensitivity + (1.0 - cfg.min_sensitivity) * ramp
}

/// Score delta for contribution `c` after `applied_events` earlier events. Non-finite input
/// contributes nothing.
pub fn weight(cfg: &Ebars, contribution: f32, applied_events: u32) -> f32 {
	if !contribution.is_finite() {
		return 0.0;
	}

	contribution.clamp(-1.0, 1.0) * cfg.max_step * sensitivity(cfg, applied_events)
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;

	use crate::{
		ebars::{self, ComprehensionState, RatingAverage, ScoredEvent},
		level::DifficultyLevel,
	};
	use sage_config::Ebars;

	#[test]
	fn sensitivity_ramps_from_floor_towards_one() {
		let cfg = Ebars::default();

		assert!((ebars::sensitivity(&cfg, 0) - cfg.min_sensitivity).abs() < 1e-6);
		assert!(ebars::sensitivity(&cfg, 5) < ebars::sensitivity(&cfg, 6));
		assert!(ebars::sensitivity(&cfg, 200) > 0.999);
	}

	#[test]
	fn contributions_are_clamped() {
		let cfg = Ebars::default();

		assert_eq!(ebars::weight(&cfg, 7.0, 0), ebars::weight(&cfg, 1.0, 0));
		assert_eq!(ebars::weight(&cfg, f32::NAN, 0), 0.0);
	}

	#[test]
	fn score_is_clamped_to_the_scale() {
		let cfg = Ebars::default();
		let mut state = ComprehensionState::neutral(&cfg, "u", "s", OffsetDateTime::UNIX_EPOCH);

		for _ in 0..40 {
			state.apply(&cfg, &ScoredEvent::from_contribution(1.0), OffsetDateTime::UNIX_EPOCH);
		}

		assert_eq!(state.comprehension_score, cfg.max_score);
		assert_eq!(state.difficulty_level, DifficultyLevel::Excellent);
	}

	#[test]
	fn levels_follow_the_current_thresholds() {
		let cfg = Ebars::default();
		let mut state = ComprehensionState::neutral(&cfg, "u", "s", OffsetDateTime::UNIX_EPOCH);

		state.difficulty_level = DifficultyLevel::VeryStruggling;

		let change =
			state.apply(&cfg, &ScoredEvent::from_contribution(0.0), OffsetDateTime::UNIX_EPOCH);

		assert_eq!(change.previous_level, DifficultyLevel::Normal);
		assert!(!change.level_changed());

		let mut stricter = cfg.clone();

		stricter.thresholds.normal = 60.0;
		state.refresh_level(&stricter);

		assert_eq!(state.difficulty_level, DifficultyLevel::Struggling);
	}

	#[test]
	fn ratings_fold_into_running_means() {
		let mut average = RatingAverage::default();

		average.fold(5);
		average.fold(2);
		average.fold(5);

		assert_eq!(average.samples, 3);
		assert!((average.mean.unwrap_or_default() - 4.0).abs() < 1e-6);
	}
}
