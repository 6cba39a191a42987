use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use leadflow_core::domain::conversation::{ConversationTurn, Sender, SessionId, TurnMetadata};
use leadflow_core::domain::tenant::TenantId;

use super::{ChatSessionRepository, RepositoryError, SessionClaim};
use crate::DbPool;

pub struct SqlChatSessionRepository {
    pool: DbPool,
}

impl SqlChatSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChatSessionRepository for SqlChatSessionRepository {
    async fn ensure_session(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
    ) -> Result<SessionClaim, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO chat_session (id, chatbot_id, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&session_id.0)
        .bind(&tenant_id.0)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?
        .rows_affected();
        if inserted > 0 {
            return Ok(SessionClaim::Created);
        }

        let owner: String = sqlx::query_scalar("SELECT chatbot_id FROM chat_session WHERE id = ?")
            .bind(&session_id.0)
            .fetch_one(&self.pool)
            .await?;
        if owner == tenant_id.0 {
            Ok(SessionClaim::Resumed)
        } else {
            Ok(SessionClaim::Foreign)
        }
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        turn: &ConversationTurn,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_message (id, session_id, sender, content, intent_id, lead, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&session_id.0)
        .bind(turn.sender.as_str())
        .bind(&turn.content)
        .bind(&turn.metadata.intent_id)
        .bind(turn.metadata.lead)
        .bind(format_timestamp(&turn.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        tenant_id: &TenantId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT m.sender, m.content, m.intent_id, m.lead, m.created_at
             FROM chat_message m
             JOIN chat_session s ON s.id = m.session_id
             WHERE m.session_id = ? AND s.chatbot_id = ?
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?",
        )
        .bind(&session_id.0)
        .bind(&tenant_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows.into_iter().map(turn_from_row).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }
}

// Fixed-width UTC timestamps keep lexical order equal to time order.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn turn_from_row(row: SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let sender_raw = row.try_get::<String, _>("sender")?;
    let sender = Sender::parse(&sender_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message sender `{sender_raw}`")))?;
    let created_at_raw = row.try_get::<String, _>("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!(
                "invalid timestamp in `created_at`: `{created_at_raw}` ({error})"
            ))
        })?;

    Ok(ConversationTurn {
        sender,
        content: row.try_get("content")?,
        created_at,
        metadata: TurnMetadata { intent_id: row.try_get("intent_id")?, lead: row.try_get("lead")? },
    })
}
