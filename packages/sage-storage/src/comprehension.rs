use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
	Result,
	models::{ComprehensionRow, InteractionRow, ScoredEventRow},
};

const STATE_COLUMNS: &str = "\
\tuser_id,
\tsession_id,
\tcomprehension_score,
\tdifficulty_level,
\ttotal_feedback_count,
\taverage_understanding,
\tunderstanding_samples,
\taverage_satisfaction,
\tsatisfaction_samples,
\tlast_updated";

pub async fn insert_interaction<'e, E>(executor: E, interaction: &InteractionRow) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO interactions (interaction_id, user_id, session_id, query, created_at)
VALUES ($1,$2,$3,$4,$5)",
	)
	.bind(interaction.interaction_id)
	.bind(interaction.user_id.as_str())
	.bind(interaction.session_id.as_str())
	.bind(interaction.query.as_str())
	.bind(interaction.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_interaction<'e, E>(
	executor: E,
	interaction_id: Uuid,
) -> Result<Option<InteractionRow>>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, InteractionRow>(
		"\
SELECT interaction_id, user_id, session_id, query, created_at
FROM interactions
WHERE interaction_id = $1",
	)
	.bind(interaction_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn get_state<'e, E>(
	executor: E,
	user_id: &str,
	session_id: &str,
) -> Result<Option<ComprehensionRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT\n{STATE_COLUMNS}\nFROM comprehension_states\nWHERE user_id = $1 AND session_id = $2"
	);
	let row = sqlx::query_as::<_, ComprehensionRow>(&sql)
		.bind(user_id)
		.bind(session_id)
		.fetch_optional(executor)
		.await?;

	Ok(row)
}

/// Creates the row if it is missing. An existing row is left untouched.
pub async fn insert_state_if_missing<'e, E>(executor: E, state: &ComprehensionRow) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"INSERT INTO comprehension_states (\n{STATE_COLUMNS}\n)\nVALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)\nON CONFLICT (user_id, session_id) DO NOTHING"
	);

	bind_state(sqlx::query(&sql), state).execute(executor).await?;

	Ok(())
}

/// Reads the row under a row lock. Call inside a transaction.
pub async fn lock_state<'e, E>(
	executor: E,
	user_id: &str,
	session_id: &str,
) -> Result<Option<ComprehensionRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT\n{STATE_COLUMNS}\nFROM comprehension_states\nWHERE user_id = $1 AND session_id = $2\nFOR UPDATE"
	);
	let row = sqlx::query_as::<_, ComprehensionRow>(&sql)
		.bind(user_id)
		.bind(session_id)
		.fetch_optional(executor)
		.await?;

	Ok(row)
}

pub async fn update_state<'e, E>(executor: E, state: &ComprehensionRow) -> Result<()>
where
	E: PgExecutor<'e>,
{
	bind_state(
		sqlx::query(
			"\
UPDATE comprehension_states
SET
\tcomprehension_score = $3,
\tdifficulty_level = $4,
\ttotal_feedback_count = $5,
\taverage_understanding = $6,
\tunderstanding_samples = $7,
\taverage_satisfaction = $8,
\tsatisfaction_samples = $9,
\tlast_updated = $10
WHERE user_id = $1 AND session_id = $2",
		),
		state,
	)
	.execute(executor)
	.await?;

	Ok(())
}

/// Records a scored event. Returns `false` when the interaction already has an event of this kind.
pub async fn insert_scored_event<'e, E>(executor: E, event: &ScoredEventRow) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"\
INSERT INTO scored_events (
\tinteraction_id,
\tkind,
\tuser_id,
\tsession_id,
\temoji,
\tscore_contribution,
\tunderstanding,
\tsatisfaction,
\tcreated_at
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
ON CONFLICT (interaction_id, kind) DO NOTHING",
	)
	.bind(event.interaction_id)
	.bind(event.kind.as_str())
	.bind(event.user_id.as_str())
	.bind(event.session_id.as_str())
	.bind(event.emoji.as_deref())
	.bind(event.score_contribution)
	.bind(event.understanding)
	.bind(event.satisfaction)
	.bind(event.created_at)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() == 1)
}

fn bind_state<'q>(
	query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
	state: &'q ComprehensionRow,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
	query
		.bind(state.user_id.as_str())
		.bind(state.session_id.as_str())
		.bind(state.comprehension_score)
		.bind(state.difficulty_level.as_str())
		.bind(state.total_feedback_count)
		.bind(state.average_understanding)
		.bind(state.understanding_samples)
		.bind(state.average_satisfaction)
		.bind(state.satisfaction_samples)
		.bind(state.last_updated)
}
