// ABOUTME: Artifact extraction from finalized assistant text
// ABOUTME: Finds fenced code blocks, classifies them by language tag, and derives titles
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Chorus Contributors

//! # Artifact Extractor
//!
//! Scans a completed assistant message for fenced code blocks and turns each
//! one into an [`ArtifactRecord`]. Classification and titling are
//! deterministic: the same block always yields the same type and title.
//! Callers invoke extraction exactly once per finalized message; the
//! extractor itself does not deduplicate.

use crate::database::ArtifactRecord;
use regex::Regex;
use std::sync::OnceLock;

/// Blocks shorter than this are noise (prompt fragments, stray fences)
const MIN_BLOCK_LEN: usize = 10;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[ \t]*\n(.*?)```")
            .unwrap_or_else(|e| unreachable!("fence regex is valid: {e}"))
    })
}

/// Map a fence language tag to an artifact type
fn classify(language: &str) -> &'static str {
    match language.to_ascii_lowercase().as_str() {
        "js" | "javascript" => "javascript",
        "ts" | "typescript" => "typescript",
        "tsx" | "jsx" => "react-component",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "svg" => "svg",
        "md" | "markdown" => "markdown",
        _ => "code",
    }
}

/// First identifier declared as a function, const, or class
fn first_declared_name(content: &str) -> Option<String> {
    static DECL: OnceLock<Regex> = OnceLock::new();
    let decl = DECL.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:function|const|class)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .unwrap_or_else(|e| unreachable!("decl regex is valid: {e}"))
    });
    decl.captures(content)
        .map(|caps| caps[1].to_owned())
}

/// Text of the first matching tag pair, e.g. `<title>` or `<h1>`
fn first_tag_text(content: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = content.find(&open)?;
    let body_start = content[start..].find('>')? + start + 1;
    let end = content[body_start..].find(&close)? + body_start;
    let text = content[body_start..end].trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// First class selector in a stylesheet
fn first_css_class(content: &str) -> Option<String> {
    static CLASS: OnceLock<Regex> = OnceLock::new();
    let class = CLASS.get_or_init(|| {
        Regex::new(r"\.([A-Za-z_-][A-Za-z0-9_-]*)\s*\{")
            .unwrap_or_else(|e| unreachable!("class regex is valid: {e}"))
    });
    class.captures(content).map(|caps| caps[1].to_owned())
}

/// First markdown heading
fn first_heading(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let trimmed = line.trim_start();
        let heading = trimmed.strip_prefix('#')?.trim_start_matches('#').trim();
        (!heading.is_empty()).then(|| heading.to_owned())
    })
}

/// Derive a display title for a block, falling back to an ordinal name
fn derive_title(artifact_type: &str, content: &str, ordinal: usize) -> String {
    let derived = match artifact_type {
        "react-component" => first_declared_name(content).map(|name| format!("{name} Component")),
        "javascript" | "typescript" => first_declared_name(content),
        "html" => first_tag_text(content, "title").or_else(|| first_tag_text(content, "h1")),
        "css" => first_css_class(content).map(|name| format!("{name} Styles")),
        "markdown" => first_heading(content),
        _ => None,
    };
    derived.unwrap_or_else(|| format!("Code Snippet {ordinal}"))
}

fn derive_description(artifact_type: &str, content: &str) -> String {
    let lines = content.lines().count();
    format!("{lines} lines of {artifact_type}")
}

/// Extract artifacts from finalized assistant text
///
/// Returns one record per fenced block at least `MIN_BLOCK_LEN` characters
/// long, in document order. Records are not yet persisted.
#[must_use]
pub fn extract_artifacts(session_id: &str, message_id: &str, text: &str) -> Vec<ArtifactRecord> {
    let now = chrono::Utc::now();
    let now_rfc3339 = now.to_rfc3339();
    let millis = now.timestamp_millis();

    fence_regex()
        .captures_iter(text)
        .map(|caps| {
            let language = caps[1].trim().to_owned();
            let content = caps[2].trim_end().to_owned();
            (language, content)
        })
        .filter(|(_, content)| content.len() >= MIN_BLOCK_LEN)
        .enumerate()
        .map(|(index, (language, content))| {
            let artifact_type = classify(&language);
            let ordinal = index + 1;
            ArtifactRecord {
                id: format!("{message_id}-{index}-{millis}"),
                session_id: session_id.to_owned(),
                message_id: message_id.to_owned(),
                title: derive_title(artifact_type, &content, ordinal),
                description: derive_description(artifact_type, &content),
                artifact_type: artifact_type.to_owned(),
                content,
                language: (!language.is_empty()).then(|| language.clone()),
                metadata: None,
                created_at: now_rfc3339.clone(),
                updated_at: now_rfc3339.clone(),
            }
        })
        .collect()
}
