//! Commit sources
//!
//! Everything that produces commits for the pipeline implements [`CommitSource`]. Payloads
//! are normalized into [`CommitRecord`] at this boundary, so nothing downstream ever sees a
//! platform-specific shape.

/// Normalization of hosted-API commit payloads
pub mod normalize;
/// Local repository commit source backed by git2
pub mod walker;

pub use walker::LocalGitSource;

use crate::error::TransportError;
use crate::types::{CommitRecord, CommitSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A provider of commit history for one or more repositories
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Platform label used to namespace persisted data ("github", "local", ...)
    fn platform(&self) -> &str;

    /// One page of commit summaries, newest first. `since` is inclusive.
    async fn fetch_commits_list(
        &self,
        owner: &str,
        repo: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>, TransportError>;

    /// Full detail (files, patches, stats) for one commit
    async fn fetch_commit_detail(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitRecord, TransportError>;

    /// Repository tree listing, when the source can provide one
    async fn fetch_repo_structure(
        &self,
        _owner: &str,
        _repo: &str,
    ) -> Result<Option<serde_json::Value>, TransportError> {
        Ok(None)
    }

    /// Current content of one repository file, when the source can provide it
    async fn fetch_file(
        &self,
        _owner: &str,
        _repo: &str,
        _path: &str,
    ) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}
