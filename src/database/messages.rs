// ABOUTME: Append-only message history operations for the session store
// ABOUTME: Messages are only written after a turn completes and read back capped for model context
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use super::SessionStore;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

/// Database representation of a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Session this message belongs to
    pub session_id: String,
    /// Role of the message sender (user, assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// When the message was created (RFC 3339)
    pub timestamp: String,
}

impl SessionStore {
    /// Append a message to a session's history
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn save_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO chat_messages (id, session_id, role, content, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&id)
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(&now)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to save message: {e}")))?;

        Ok(MessageRecord {
            id,
            session_id: session_id.to_owned(),
            role: role.to_owned(),
            content: content.to_owned(),
            timestamp: now,
        })
    }

    /// Get the most recent `limit` messages of a session in chronological
    /// order
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> AppResult<Vec<MessageRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, session_id, role, content, timestamp
            FROM (
                SELECT id, session_id, role, content, timestamp
                FROM chat_messages
                WHERE session_id = $1
                ORDER BY timestamp DESC, id DESC
                LIMIT $2
            )
            ORDER BY timestamp ASC, id ASC
            ",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to load messages: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|r| MessageRecord {
                id: r.get("id"),
                session_id: r.get("session_id"),
                role: r.get("role"),
                content: r.get("content"),
                timestamp: r.get("timestamp"),
            })
            .collect())
    }

    /// Count the messages stored for a session
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn message_count(&self, session_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to count messages: {e}")))?;
        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use crate::database::test_store;

    #[tokio::test]
    async fn save_and_reload_messages() {
        let store = test_store().await;
        store.save_message("s1", "user", "hello").await.unwrap();
        store.save_message("s1", "assistant", "hi there").await.unwrap();
        store.save_message("s2", "user", "other session").await.unwrap();

        let messages = store.get_recent_messages("s1", 20).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn recent_messages_cap_keeps_latest() {
        let store = test_store().await;
        for i in 0..5 {
            store
                .save_message("s1", "user", &format!("msg {i}"))
                .await
                .unwrap();
            // RFC 3339 timestamps carry sub-millisecond precision; a short
            // pause guarantees distinct values on coarse clocks.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let messages = store.get_recent_messages("s1", 3).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg 2");
        assert_eq!(messages[2].content, "msg 4");
    }

    #[tokio::test]
    async fn message_count_is_per_session() {
        let store = test_store().await;
        store.save_message("s1", "user", "a").await.unwrap();
        store.save_message("s1", "assistant", "b").await.unwrap();
        assert_eq!(store.message_count("s1").await.unwrap(), 2);
        assert_eq!(store.message_count("s2").await.unwrap(), 0);
    }
}
