//! Hosted-API commit payloads come in a few shapes: GitHub nests message, author and date
//! under `commit`, crawled dumps may use `hash` instead of `sha`, and `author` is either a
//! plain string or an object. These helpers fold all of them into the canonical types.

use crate::types::{CommitRecord, CommitStats, FileChange};
use chrono::{DateTime, Utc};
use serde_json::Value;

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

fn u64_at(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// `sha`, falling back to `hash`
pub fn commit_sha(value: &Value) -> Option<String> {
    str_at(value, &["sha"])
        .or_else(|| str_at(value, &["hash"]))
        .map(str::to_string)
}

/// Author display name from a string `author`, a nested `commit.author.name`,
/// an `author.name`/`author.login` object or an `author_name` field
pub fn commit_author(value: &Value) -> Option<String> {
    if let Some(author) = value.get("author").and_then(Value::as_str)
        && !author.is_empty()
    {
        return Some(author.to_string());
    }

    str_at(value, &["commit", "author", "name"])
        .or_else(|| str_at(value, &["author", "name"]))
        .or_else(|| str_at(value, &["author", "login"]))
        .or_else(|| str_at(value, &["author_name"]))
        .map(str::to_string)
}

fn commit_email(value: &Value) -> Option<String> {
    str_at(value, &["commit", "author", "email"])
        .or_else(|| str_at(value, &["author", "email"]))
        .or_else(|| str_at(value, &["author_email"]))
        .map(str::to_string)
}

fn commit_message(value: &Value) -> String {
    str_at(value, &["message"])
        .or_else(|| str_at(value, &["commit", "message"]))
        .unwrap_or("")
        .to_string()
}

fn commit_date(value: &Value) -> Option<DateTime<Utc>> {
    let raw = str_at(value, &["date"])
        .or_else(|| str_at(value, &["timestamp"]))
        .or_else(|| str_at(value, &["commit", "author", "date"]))
        .or_else(|| str_at(value, &["commit", "committer", "date"]))?;

    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn file_change(value: &Value) -> Option<FileChange> {
    let filename = str_at(value, &["filename"])?.to_string();
    Some(FileChange {
        filename,
        status: str_at(value, &["status"]).unwrap_or("modified").to_string(),
        additions: u64_at(value, "additions"),
        deletions: u64_at(value, "deletions"),
        patch: str_at(value, &["patch"]).map(str::to_string),
    })
}

/// Normalize a commit detail payload. `None` when the payload has no sha.
///
/// Aggregate stats come from `stats` when present and are summed from the files otherwise.
pub fn normalize_commit(value: &Value) -> Option<CommitRecord> {
    let sha = commit_sha(value)?;

    let files: Vec<FileChange> = value
        .get("files")
        .and_then(Value::as_array)
        .map(|files| files.iter().filter_map(file_change).collect())
        .unwrap_or_default();

    let stats = match value.get("stats") {
        Some(stats) if stats.is_object() => CommitStats {
            additions: u64_at(stats, "additions"),
            deletions: u64_at(stats, "deletions"),
        },
        _ => CommitStats {
            additions: files.iter().map(|f| f.additions).sum(),
            deletions: files.iter().map(|f| f.deletions).sum(),
        },
    };

    Some(CommitRecord {
        sha,
        message: commit_message(value),
        author: commit_author(value).unwrap_or_else(|| "Unknown".to_string()),
        author_email: commit_email(value),
        timestamp: commit_date(value).unwrap_or_default(),
        files,
        stats,
    })
}
