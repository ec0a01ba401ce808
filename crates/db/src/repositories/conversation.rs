use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use callquote_core::domain::conversation::{CallId, ConversationState};

use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_call_id(
        &self,
        call_id: &CallId,
    ) -> Result<Option<ConversationState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT call_id, state_json, version, updated_at
             FROM conversation_state
             WHERE call_id = ?",
        )
        .bind(&call_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    async fn save(&self, state: &ConversationState) -> Result<u32, RepositoryError> {
        let expected = state.version;
        let next = expected + 1;

        let mut stored = state.clone();
        stored.version = next;
        let state_json = serde_json::to_string(&stored)
            .map_err(|error| RepositoryError::Decode(format!("encode conversation: {error}")))?;

        if expected == 0 {
            let inserted = sqlx::query(
                "INSERT INTO conversation_state (
                    call_id, tenant_id, stage, state_json, version, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&state.call_id.0)
            .bind(&state.tenant_id.0)
            .bind(state.stage.as_str())
            .bind(&state_json)
            .bind(i64::from(next))
            .bind(state.created_at.to_rfc3339())
            .bind(state.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            return match inserted {
                Ok(_) => Ok(next),
                Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                    Err(RepositoryError::Conflict { call_id: state.call_id.0.clone(), expected })
                }
                Err(error) => Err(error.into()),
            };
        }

        let updated = sqlx::query(
            "UPDATE conversation_state
             SET stage = ?, state_json = ?, version = ?, updated_at = ?
             WHERE call_id = ? AND version = ?",
        )
        .bind(state.stage.as_str())
        .bind(&state_json)
        .bind(i64::from(next))
        .bind(state.updated_at.to_rfc3339())
        .bind(&state.call_id.0)
        .bind(i64::from(expected))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict { call_id: state.call_id.0.clone(), expected });
        }

        Ok(next)
    }
}

fn state_from_row(row: SqliteRow) -> Result<ConversationState, RepositoryError> {
    let call_id: String = row.try_get("call_id")?;
    let raw: String = row.try_get("state_json")?;
    let mut state: ConversationState = serde_json::from_str(&raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid state_json for call `{call_id}`: {error}"))
    })?;

    state.version = parse_u32("version", row.try_get("version")?)?;
    state.updated_at = parse_timestamp("updated_at", row.try_get("updated_at")?)?;
    Ok(state)
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use callquote_core::domain::conversation::{CallId, ConversationState, StateUpdate};
    use callquote_core::domain::tenant::TenantId;
    use callquote_core::flows::Stage;

    use super::SqlConversationRepository;
    use crate::migrations;
    use crate::repositories::{ConversationRepository, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn fresh_state(call_id: &str) -> ConversationState {
        ConversationState::new(
            CallId(call_id.to_string()),
            TenantId("green-acres".to_string()),
            Some("+12145550100".to_string()),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn first_save_inserts_and_later_saves_bump_the_version() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let mut state = fresh_state("CA-sql-1");
        state.push_user("Hi, I need a quote");

        let version = repo.save(&state).await.expect("insert");
        assert_eq!(version, 1);

        let mut loaded =
            repo.find_by_call_id(&state.call_id).await.expect("find").expect("record exists");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.messages, state.messages);

        loaded.apply(StateUpdate::to(Stage::WaitingForAddress).say("What's the address?"));
        assert_eq!(repo.save(&loaded).await.expect("update"), 2);

        let reloaded =
            repo.find_by_call_id(&state.call_id).await.expect("find").expect("record exists");
        assert_eq!(reloaded.stage, Stage::WaitingForAddress);
        assert_eq!(reloaded.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_as_conflict() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let state = fresh_state("CA-sql-2");
        repo.save(&state).await.expect("insert");

        let first = repo.find_by_call_id(&state.call_id).await.expect("find").expect("exists");
        let second = first.clone();
        repo.save(&first).await.expect("first writer wins");

        let error = repo.save(&second).await.expect_err("second writer must conflict");
        assert!(matches!(error, RepositoryError::Conflict { expected: 1, .. }));
    }

    #[tokio::test]
    async fn duplicate_first_turns_conflict_instead_of_overwriting() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        repo.save(&fresh_state("CA-sql-3")).await.expect("insert");

        let error = repo.save(&fresh_state("CA-sql-3")).await.expect_err("duplicate insert");
        assert!(matches!(error, RepositoryError::Conflict { expected: 0, .. }));
    }

    #[tokio::test]
    async fn missing_call_returns_none() {
        let repo = SqlConversationRepository::new(setup_pool().await);
        let found = repo.find_by_call_id(&CallId("CA-none".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn corrupt_state_json_is_a_decode_error() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO conversation_state
                (call_id, tenant_id, stage, state_json, version, created_at, updated_at)
             VALUES ('CA-bad', 't', 'greeting', '{not json', 1, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("insert corrupt row");

        let repo = SqlConversationRepository::new(pool);
        let error = repo.find_by_call_id(&CallId("CA-bad".to_string())).await.expect_err("decode");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }
}
