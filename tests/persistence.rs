// ABOUTME: Durability tests over a file-backed store that outlives its connection
// ABOUTME: History and artifacts written before a reopen must be readable after it
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

use chorus_server::chat::extract_artifacts;
use chorus_server::database::SessionStore;

#[tokio::test]
async fn history_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}/chorus.db", dir.path().display());

    {
        let store = SessionStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        store.save_message("s1", "user", "remember me").await.unwrap();
        store
            .save_message("s1", "assistant", "I will")
            .await
            .unwrap();
    }

    // A fresh connection simulates the process restarting while the
    // client's socket hibernates.
    let store = SessionStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();

    let messages = store.get_recent_messages("s1", 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "remember me");
    assert_eq!(messages[1].content, "I will");
}

#[tokio::test]
async fn artifacts_survive_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}/chorus.db", dir.path().display());

    {
        let store = SessionStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        let text = "```html\n<main><h1>Landing</h1></main>\n```";
        for artifact in extract_artifacts("s1", "m1", text) {
            store.save_artifact(&artifact).await.unwrap();
        }
    }

    let store = SessionStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();

    let artifacts = store.get_artifacts("s1").await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].artifact_type, "html");
    assert_eq!(artifacts[0].message_id, "m1");
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}/chorus.db", dir.path().display());

    let store = SessionStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    store.migrate().await.unwrap();
    store.health_check().await.unwrap();
}
