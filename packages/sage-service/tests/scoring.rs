mod support;

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use sage_config::{Ebars, LevelThresholds, RerankConfig};
use sage_domain::{ComprehensionState, DifficultyLevel, Emoji, LegacyLevel, ScoredEvent};
use sage_service::{
	Error, FeedbackRequest, InteractionRequest, OutcomeRequest, ProfileRequest, SageService,
	Stores,
};

use support::StubRerank;

const THUMBS_UP: &str = "\u{1F44D}";
const CROSS: &str = "\u{274C}";

async fn interaction(service: &SageService, user_id: &str, session_id: &str) -> Uuid {
	service
		.record_interaction(InteractionRequest {
			user_id: user_id.to_string(),
			session_id: session_id.to_string(),
			query: "Explain osmosis.".to_string(),
		})
		.await
		.expect("Failed to record interaction.")
		.interaction_id
}

fn feedback(user_id: &str, session_id: &str, interaction_id: Uuid, emoji: &str) -> FeedbackRequest {
	FeedbackRequest {
		user_id: user_id.to_string(),
		session_id: session_id.to_string(),
		interaction_id,
		emoji: emoji.to_string(),
		understanding: None,
		satisfaction: None,
	}
}

fn profile(user_id: &str, session_id: &str) -> ProfileRequest {
	ProfileRequest { user_id: user_id.to_string(), session_id: session_id.to_string() }
}

#[tokio::test]
async fn concurrent_feedback_loses_no_update() {
	let service = Arc::new(support::service(RerankConfig::None));
	let mut ids = Vec::new();

	for _ in 0..20 {
		ids.push(interaction(&service, "u1", "s1").await);
	}

	let handles: Vec<_> = ids
		.into_iter()
		.map(|interaction_id| {
			let service = service.clone();

			tokio::spawn(async move {
				service.submit_feedback(feedback("u1", "s1", interaction_id, THUMBS_UP)).await
			})
		})
		.collect();

	for handle in handles {
		handle.await.expect("Task panicked.").expect("Feedback failed.");
	}

	let cfg = Ebars::default();
	let mut expected = ComprehensionState::neutral(&cfg, "u1", "s1", OffsetDateTime::UNIX_EPOCH);

	for _ in 0..20 {
		expected.apply(
			&cfg,
			&ScoredEvent::from_contribution(Emoji::ThumbsUp.contribution()),
			OffsetDateTime::UNIX_EPOCH,
		);
	}

	let state = service.learner_profile(profile("u1", "s1")).await.expect("Profile failed.");

	assert_eq!(state.total_feedback_count, 20);
	assert!((state.comprehension_score - expected.comprehension_score).abs() < 1e-3);
}

#[tokio::test]
async fn resubmitted_feedback_does_not_move_the_score() {
	let service = support::service(RerankConfig::None);
	let interaction_id = interaction(&service, "u1", "s1").await;
	let first = service
		.submit_feedback(feedback("u1", "s1", interaction_id, THUMBS_UP))
		.await
		.expect("Feedback failed.");
	let second = service
		.submit_feedback(feedback("u1", "s1", interaction_id, CROSS))
		.await
		.expect("Resubmission must not fail.");

	assert!(first.applied);
	assert!(!second.applied);
	assert_eq!(second.comprehension_score, first.comprehension_score);
	assert_eq!(second.total_feedback_count, 1);
}

#[tokio::test]
async fn feedback_on_a_foreign_interaction_is_rejected() {
	let service = support::service(RerankConfig::None);
	let interaction_id = interaction(&service, "u1", "s1").await;
	let other_user = service
		.submit_feedback(feedback("u2", "s1", interaction_id, THUMBS_UP))
		.await
		.expect_err("Expected a conflict.");
	let other_session = service
		.submit_feedback(feedback("u1", "s2", interaction_id, THUMBS_UP))
		.await
		.expect_err("Expected a conflict.");
	let unknown = service
		.submit_feedback(feedback("u1", "s1", Uuid::new_v4(), THUMBS_UP))
		.await
		.expect_err("Expected not found.");

	assert!(matches!(other_user, Error::Conflict { .. }));
	assert!(matches!(other_session, Error::Conflict { .. }));
	assert!(matches!(unknown, Error::NotFound { .. }));

	let state = service.learner_profile(profile("u2", "s1")).await.expect("Profile failed.");

	assert!(!state.persisted);
}

#[tokio::test]
async fn five_negative_reactions_move_one_bucket_at_most() {
	let service = support::service(RerankConfig::None);
	let mut previous = DifficultyLevel::Normal;

	for _ in 0..5 {
		let interaction_id = interaction(&service, "u1", "s1").await;
		let response = service
			.submit_feedback(feedback("u1", "s1", interaction_id, CROSS))
			.await
			.expect("Feedback failed.");

		assert!(response.applied);
		assert!(response.comprehension_score < response.previous_score);
		assert!(previous.rank().abs_diff(response.difficulty_level.rank()) <= 1);

		previous = response.difficulty_level;
	}

	let state = service.learner_profile(profile("u1", "s1")).await.expect("Profile failed.");

	assert_eq!(state.difficulty_level, DifficultyLevel::VeryStruggling);
	assert_eq!(state.legacy_level, LegacyLevel::Beginner);
	assert_eq!(state.total_feedback_count, 5);
}

#[tokio::test]
async fn outcome_and_feedback_apply_once_each_per_interaction() {
	let service = support::service(RerankConfig::None);
	let interaction_id = interaction(&service, "u1", "s1").await;
	let outcome = OutcomeRequest {
		user_id: "u1".to_string(),
		session_id: "s1".to_string(),
		interaction_id,
		contribution: 0.8,
	};
	let first = service.record_outcome(outcome.clone()).await.expect("Outcome failed.");
	let repeated = service.record_outcome(outcome).await.expect("Outcome failed.");
	let reaction = service
		.submit_feedback(feedback("u1", "s1", interaction_id, THUMBS_UP))
		.await
		.expect("Feedback failed.");

	assert!(first.applied);
	assert!(!repeated.applied);
	assert!(reaction.applied);
	assert_eq!(reaction.total_feedback_count, 2);
}

#[tokio::test]
async fn ratings_are_averaged() {
	let service = support::service(RerankConfig::None);

	for (understanding, satisfaction) in [(4, 5), (2, 3)] {
		let interaction_id = interaction(&service, "u1", "s1").await;
		let mut req = feedback("u1", "s1", interaction_id, THUMBS_UP);

		req.understanding = Some(understanding);
		req.satisfaction = Some(satisfaction);

		service.submit_feedback(req).await.expect("Feedback failed.");
	}

	let state = service.learner_profile(profile("u1", "s1")).await.expect("Profile failed.");

	assert_eq!(state.average_understanding, Some(3.0));
	assert_eq!(state.average_satisfaction, Some(4.0));
}

#[tokio::test]
async fn malformed_feedback_is_rejected() {
	let service = support::service(RerankConfig::None);
	let interaction_id = interaction(&service, "u1", "s1").await;
	let unknown_emoji = service
		.submit_feedback(feedback("u1", "s1", interaction_id, "\u{1F680}"))
		.await
		.expect_err("Expected an invalid request.");
	let mut out_of_range = feedback("u1", "s1", interaction_id, THUMBS_UP);

	out_of_range.understanding = Some(6);

	let bad_rating =
		service.submit_feedback(out_of_range).await.expect_err("Expected an invalid request.");
	let bad_outcome = service
		.record_outcome(OutcomeRequest {
			user_id: "u1".to_string(),
			session_id: "s1".to_string(),
			interaction_id,
			contribution: 1.5,
		})
		.await
		.expect_err("Expected an invalid request.");

	assert!(matches!(unknown_emoji, Error::InvalidRequest { .. }));
	assert!(matches!(bad_rating, Error::InvalidRequest { .. }));
	assert!(matches!(bad_outcome, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn missing_profile_reports_neutral_defaults() {
	let service = support::service(RerankConfig::None);
	let state = service.learner_profile(profile("new", "s1")).await.expect("Profile failed.");

	assert!(!state.persisted);
	assert_eq!(state.comprehension_score, 50.0);
	assert_eq!(state.difficulty_level, DifficultyLevel::Normal);
	assert_eq!(state.legacy_level, LegacyLevel::Intermediate);
	assert_eq!(state.average_understanding, None);
}

#[tokio::test]
async fn stored_levels_are_derived_from_the_score_under_current_thresholds() {
	let stores = Stores::in_memory();
	let before = support::service_with(
		support::test_config(RerankConfig::None),
		stores.clone(),
		StubRerank::ByLength,
	);
	let interaction_id = interaction(&before, "u1", "s1").await;
	let scored = before
		.submit_feedback(feedback("u1", "s1", interaction_id, THUMBS_UP))
		.await
		.expect("Feedback failed.");

	assert_eq!(scored.difficulty_level, DifficultyLevel::Normal);

	let mut cfg = support::test_config(RerankConfig::None);

	cfg.ebars.thresholds =
		LevelThresholds { struggling: 30.0, normal: 60.0, good: 75.0, excellent: 90.0 };

	let after = support::service_with(cfg, stores, StubRerank::ByLength);
	let state = after.learner_profile(profile("u1", "s1")).await.expect("Profile failed.");

	assert_eq!(state.comprehension_score, scored.comprehension_score);
	assert_eq!(state.difficulty_level, DifficultyLevel::Struggling);
	assert_eq!(state.legacy_level, LegacyLevel::Beginner);

	let repeated = after
		.submit_feedback(feedback("u1", "s1", interaction_id, THUMBS_UP))
		.await
		.expect("Feedback failed.");

	assert!(!repeated.applied);
	assert_eq!(repeated.difficulty_level, DifficultyLevel::Struggling);

	let next = interaction(&after, "u1", "s1").await;
	let moved = after
		.submit_feedback(feedback("u1", "s1", next, THUMBS_UP))
		.await
		.expect("Feedback failed.");

	assert_eq!(moved.previous_level, DifficultyLevel::Struggling);
}
