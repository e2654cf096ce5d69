// ABOUTME: Durable session store backed by SQLite via sqlx
// ABOUTME: Owns the connection pool, schema creation, and health checks
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Session Store
//!
//! SQLite persistence for conversation history and artifacts. Messages are
//! append-only; artifacts are created by the extractor and mutated only
//! through explicit client operations. Timestamps are RFC 3339 strings so
//! lexicographic ordering matches chronological ordering.

pub mod artifacts;
pub mod messages;

pub use artifacts::{ArtifactRecord, ArtifactUpdate};
pub use messages::MessageRecord;

use crate::errors::{AppError, AppResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Durable store for chat messages and artifacts
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url`, creating the file if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::config(format!("invalid database URL: {e}")))?
            .create_if_missing(true);

        // A single connection keeps in-memory databases coherent and is
        // plenty for the write volume of a session store.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("failed to connect: {e}")))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to create chat_messages: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_chat_messages_session
            ON chat_messages (session_id, timestamp)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to index chat_messages: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                type TEXT NOT NULL,
                content TEXT NOT NULL,
                language TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to create artifacts: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_artifacts_session
            ON artifacts (session_id, created_at)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to index artifacts: {e}")))?;

        Ok(())
    }

    /// Verify the store is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the probe query fails
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("health check failed: {e}")))?;
        Ok(())
    }

    /// Access the underlying pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> SessionStore {
    SessionStore::connect("sqlite::memory:")
        .await
        .expect("in-memory store")
}
