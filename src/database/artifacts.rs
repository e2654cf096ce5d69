// ABOUTME: Artifact CRUD operations for the session store
// ABOUTME: Artifacts are written by the extractor and mutated only via explicit client operations
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use super::SessionStore;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// Database representation of an extracted artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Deterministic ID: `{message_id}-{index}-{timestamp_millis}`
    pub id: String,
    /// Session this artifact belongs to
    pub session_id: String,
    /// Message the artifact was extracted from
    pub message_id: String,
    /// Display title derived from the content
    pub title: String,
    /// Short description (line count and type)
    pub description: String,
    /// Classified artifact type (react-component, markdown, code, ...)
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// The fenced block body
    pub content: String,
    /// Language tag as written in the fence, if any
    pub language: Option<String>,
    /// Optional JSON metadata blob
    pub metadata: Option<String>,
    /// Creation time (RFC 3339)
    pub created_at: String,
    /// Last update time (RFC 3339)
    pub updated_at: String,
}

/// Partial update applied to an artifact row
///
/// Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactUpdate {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New content
    pub content: Option<String>,
    /// New metadata blob
    pub metadata: Option<String>,
}

impl ArtifactUpdate {
    /// Whether this update changes anything
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.content.is_none()
            && self.metadata.is_none()
    }
}

impl SessionStore {
    /// Insert an artifact row
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn save_artifact(&self, artifact: &ArtifactRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO artifacts (id, session_id, message_id, title, description, type, content, language, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(&artifact.id)
        .bind(&artifact.session_id)
        .bind(&artifact.message_id)
        .bind(&artifact.title)
        .bind(&artifact.description)
        .bind(&artifact.artifact_type)
        .bind(&artifact.content)
        .bind(&artifact.language)
        .bind(&artifact.metadata)
        .bind(&artifact.created_at)
        .bind(&artifact.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to save artifact: {e}")))?;
        Ok(())
    }

    /// List a session's artifacts in creation order
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_artifacts(&self, session_id: &str) -> AppResult<Vec<ArtifactRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, message_id, title, description, type, content, language, metadata, created_at, updated_at
            FROM artifacts
            WHERE session_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to load artifacts: {e}")))?;

        Ok(rows.into_iter().map(|r| ArtifactRecord {
            id: r.get("id"),
            session_id: r.get("session_id"),
            message_id: r.get("message_id"),
            title: r.get("title"),
            description: r.get("description"),
            artifact_type: r.get("type"),
            content: r.get("content"),
            language: r.get("language"),
            metadata: r.get("metadata"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }).collect())
    }

    /// Apply a partial update to an artifact, bumping `updated_at`
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if no row matches, or a database error
    pub async fn update_artifact(
        &self,
        session_id: &str,
        artifact_id: &str,
        updates: &ArtifactUpdate,
    ) -> AppResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            r"
            UPDATE artifacts SET
                title = COALESCE($1, title),
                description = COALESCE($2, description),
                content = COALESCE($3, content),
                metadata = COALESCE($4, metadata),
                updated_at = $5
            WHERE id = $6 AND session_id = $7
            ",
        )
        .bind(&updates.title)
        .bind(&updates.description)
        .bind(&updates.content)
        .bind(&updates.metadata)
        .bind(&now)
        .bind(artifact_id)
        .bind(session_id)
        .execute(self.pool())
        .await
        .map_err(|e| AppError::database(format!("Failed to update artifact: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Artifact {artifact_id}")));
        }
        Ok(())
    }

    /// Delete an artifact
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` if no row matches, or a database error
    pub async fn delete_artifact(&self, session_id: &str, artifact_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM artifacts WHERE id = $1 AND session_id = $2")
            .bind(artifact_id)
            .bind(session_id)
            .execute(self.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to delete artifact: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Artifact {artifact_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_store;

    fn sample(id: &str, session: &str) -> ArtifactRecord {
        let now = chrono::Utc::now().to_rfc3339();
        ArtifactRecord {
            id: id.to_owned(),
            session_id: session.to_owned(),
            message_id: "m1".to_owned(),
            title: "Code Snippet 1".to_owned(),
            description: "3 lines of code".to_owned(),
            artifact_type: "code".to_owned(),
            content: "let x = 1;".to_owned(),
            language: Some("rust".to_owned()),
            metadata: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_list_update_delete() {
        let store = test_store().await;
        store.save_artifact(&sample("a1", "s1")).await.unwrap();
        store.save_artifact(&sample("a2", "s1")).await.unwrap();

        let listed = store.get_artifacts("s1").await.unwrap();
        assert_eq!(listed.len(), 2);

        // The RFC 3339 clock needs a beat so updated_at lands after created_at.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let update = ArtifactUpdate {
            title: Some("New".to_owned()),
            content: Some("let x = 2;".to_owned()),
            ..ArtifactUpdate::default()
        };
        store.update_artifact("s1", "a1", &update).await.unwrap();
        let listed = store.get_artifacts("s1").await.unwrap();
        let updated = listed.iter().find(|a| a.id == "a1").unwrap();
        assert_eq!(updated.title, "New");
        assert_eq!(updated.content, "let x = 2;");
        assert_eq!(updated.description, "3 lines of code");
        assert!(updated.updated_at > updated.created_at);

        store.delete_artifact("s1", "a2").await.unwrap();
        assert_eq!(store.get_artifacts("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_missing_artifact_is_not_found() {
        let store = test_store().await;
        let update = ArtifactUpdate {
            content: Some("body".to_owned()),
            ..ArtifactUpdate::default()
        };
        let err = store
            .update_artifact("s1", "missing", &update)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn artifacts_are_session_scoped() {
        let store = test_store().await;
        store.save_artifact(&sample("a1", "s1")).await.unwrap();
        let err = store.delete_artifact("s2", "a1").await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ResourceNotFound);
    }
}
