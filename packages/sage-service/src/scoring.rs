//! Interactions and the scored events that move a learner's comprehension state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result, SageService,
	stores::{EventKind, EventOutcome, InteractionRecord, ScoredEventRecord},
};
use sage_domain::{
	ComprehensionState, DifficultyLevel, Emoji, LegacyLevel, ScoreChange, ScoredEvent, to_legacy,
};

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionRequest {
	pub user_id: String,
	pub session_id: String,
	pub query: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct InteractionResponse {
	pub interaction_id: Uuid,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FeedbackRequest {
	pub user_id: String,
	pub session_id: String,
	pub interaction_id: Uuid,
	pub emoji: String,
	#[serde(default)]
	pub understanding: Option<u8>,
	#[serde(default)]
	pub satisfaction: Option<u8>,
}

/// An assessment result for an interaction, already expressed as a contribution in `[-1, 1]`.
#[derive(Clone, Debug, Deserialize)]
pub struct OutcomeRequest {
	pub user_id: String,
	pub session_id: String,
	pub interaction_id: Uuid,
	pub contribution: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoreResponse {
	/// `false` when the interaction already had an event of this kind and nothing changed.
	pub applied: bool,
	pub previous_score: f32,
	pub comprehension_score: f32,
	pub previous_level: DifficultyLevel,
	pub difficulty_level: DifficultyLevel,
	pub legacy_level: LegacyLevel,
	pub total_feedback_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileRequest {
	pub user_id: String,
	pub session_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LearnerProfile {
	pub user_id: String,
	pub session_id: String,
	pub comprehension_score: f32,
	pub difficulty_level: DifficultyLevel,
	pub legacy_level: LegacyLevel,
	pub total_feedback_count: u32,
	pub average_understanding: Option<f32>,
	pub average_satisfaction: Option<f32>,
	#[serde(with = "time::serde::rfc3339")]
	pub last_updated: OffsetDateTime,
	/// `false` when no event has been recorded yet and the values are the neutral defaults.
	pub persisted: bool,
}
impl LearnerProfile {
	fn from_state(state: ComprehensionState, persisted: bool) -> Self {
		Self {
			legacy_level: to_legacy(state.difficulty_level),
			comprehension_score: state.comprehension_score,
			difficulty_level: state.difficulty_level,
			total_feedback_count: state.total_feedback_count,
			average_understanding: state.understanding.mean,
			average_satisfaction: state.satisfaction.mean,
			last_updated: state.last_updated,
			user_id: state.user_id,
			session_id: state.session_id,
			persisted,
		}
	}
}

impl SageService {
	pub async fn record_interaction(&self, req: InteractionRequest) -> Result<InteractionResponse> {
		crate::require_text("user_id", &req.user_id)?;
		crate::require_text("session_id", &req.session_id)?;
		crate::require_text("query", &req.query)?;

		let interaction_id = Uuid::new_v4();

		self.stores
			.comprehension
			.insert_interaction(InteractionRecord {
				interaction_id,
				user_id: req.user_id,
				session_id: req.session_id,
				query: req.query,
				created_at: OffsetDateTime::now_utc(),
			})
			.await?;

		Ok(InteractionResponse { interaction_id })
	}

	pub async fn submit_feedback(&self, req: FeedbackRequest) -> Result<ScoreResponse> {
		let Some(emoji) = Emoji::from_symbol(&req.emoji) else {
			let allowed: Vec<&str> = Emoji::ALL.iter().map(|emoji| emoji.symbol()).collect();

			return Err(Error::invalid(format!(
				"emoji must be one of {}.",
				allowed.join(" ")
			)));
		};

		check_rating("understanding", req.understanding)?;
		check_rating("satisfaction", req.satisfaction)?;

		let event = ScoredEvent {
			contribution: emoji.contribution(),
			understanding: req.understanding,
			satisfaction: req.satisfaction,
		};

		self.apply_scored_event(
			EventKind::Feedback,
			&req.user_id,
			&req.session_id,
			req.interaction_id,
			Some(emoji.symbol().to_string()),
			event,
		)
		.await
	}

	pub async fn record_outcome(&self, req: OutcomeRequest) -> Result<ScoreResponse> {
		if !req.contribution.is_finite() || !(-1.0..=1.0).contains(&req.contribution) {
			return Err(Error::invalid("contribution must be in the range -1.0-1.0."));
		}

		self.apply_scored_event(
			EventKind::Outcome,
			&req.user_id,
			&req.session_id,
			req.interaction_id,
			None,
			ScoredEvent::from_contribution(req.contribution),
		)
		.await
	}

	/// Reads the learner's state. A learner without events gets the neutral defaults and no row is
	/// created.
	pub async fn learner_profile(&self, req: ProfileRequest) -> Result<LearnerProfile> {
		crate::require_text("user_id", &req.user_id)?;
		crate::require_text("session_id", &req.session_id)?;

		let stored = self.stores.comprehension.get_state(&req.user_id, &req.session_id).await?;

		Ok(match stored {
			Some(mut state) => {
				state.refresh_level(&self.cfg.ebars);

				LearnerProfile::from_state(state, true)
			},
			None => LearnerProfile::from_state(
				ComprehensionState::neutral(
					&self.cfg.ebars,
					req.user_id,
					req.session_id,
					OffsetDateTime::now_utc(),
				),
				false,
			),
		})
	}

	async fn apply_scored_event(
		&self,
		kind: EventKind,
		user_id: &str,
		session_id: &str,
		interaction_id: Uuid,
		emoji: Option<String>,
		event: ScoredEvent,
	) -> Result<ScoreResponse> {
		crate::require_text("user_id", user_id)?;
		crate::require_text("session_id", session_id)?;

		let Some(interaction) = self.stores.comprehension.get_interaction(interaction_id).await?
		else {
			return Err(Error::NotFound {
				message: format!("Interaction {interaction_id} does not exist."),
			});
		};

		if interaction.user_id != user_id || interaction.session_id != session_id {
			tracing::warn!(
				interaction_id = %interaction_id,
				kind = kind.as_str(),
				"Rejected scored event for an interaction owned by another learner or session."
			);

			return Err(Error::Conflict {
				message: format!(
					"Interaction {interaction_id} does not belong to this user and session."
				),
			});
		}

		let cfg = &self.cfg.ebars;
		let now = OffsetDateTime::now_utc();
		let record = ScoredEventRecord {
			interaction_id,
			kind,
			user_id: user_id.to_string(),
			session_id: session_id.to_string(),
			emoji,
			score_contribution: event.contribution,
			understanding: event.understanding,
			satisfaction: event.satisfaction,
			created_at: now,
		};
		let initial = ComprehensionState::neutral(cfg, user_id, session_id, now);
		let mutator = |state: &mut ComprehensionState| -> ScoreChange { state.apply(cfg, &event, now) };
		let outcome = self.stores.comprehension.apply_event(record, initial, &mutator).await?;

		Ok(match outcome {
			EventOutcome::Applied { state, change } => {
				tracing::info!(
					interaction_id = %interaction_id,
					kind = kind.as_str(),
					previous_score = change.previous_score,
					score = change.score,
					level = change.level.as_str(),
					level_changed = change.level_changed(),
					"Scored event applied."
				);

				ScoreResponse {
					applied: true,
					previous_score: change.previous_score,
					comprehension_score: change.score,
					previous_level: change.previous_level,
					difficulty_level: change.level,
					legacy_level: to_legacy(change.level),
					total_feedback_count: state.total_feedback_count,
				}
			},
			EventOutcome::Duplicate { mut state } => {
				state.refresh_level(cfg);

				tracing::debug!(
					interaction_id = %interaction_id,
					kind = kind.as_str(),
					"Scored event already applied."
				);

				ScoreResponse {
					applied: false,
					previous_score: state.comprehension_score,
					comprehension_score: state.comprehension_score,
					previous_level: state.difficulty_level,
					difficulty_level: state.difficulty_level,
					legacy_level: to_legacy(state.difficulty_level),
					total_feedback_count: state.total_feedback_count,
				}
			},
		})
	}
}

fn check_rating(field: &str, rating: Option<u8>) -> Result<()> {
	if let Some(value) = rating
		&& !(1..=5).contains(&value)
	{
		return Err(Error::invalid(format!("{field} must be between 1 and 5.")));
	}

	Ok(())
}
