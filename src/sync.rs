//! Sync state tracking
//!
//! A sync cycle pulls one newest-first page from a [`CommitSource`], keeps the prefix that
//! precedes the stored boundary sha, fetches full detail for each new commit and only then
//! persists anything. The boundary in `sync_state.json` moves once per successful cycle; a
//! failed detail fetch leaves both the boundary and the commit index untouched, so retrying
//! a failed cycle is always safe.

use crate::config::SyncConfig;
use crate::error::{EvalError, TransportError};
use crate::git::CommitSource;
use crate::store::{CommitIndexEntry, RepoStore};
use crate::types::{CommitRecord, CommitSummary, RepoKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;

/// File snapshots stored per sync cycle
const MAX_SNAPSHOT_FILES: usize = 200;

/// Persisted sync boundary and history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Newest commit already incorporated into local state
    #[serde(default)]
    pub last_commit_sha: Option<String>,
    #[serde(default)]
    pub last_commit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_fetched: usize,
    /// Oldest first, trimmed to the configured limit
    #[serde(default, alias = "sync_history")]
    pub history: Vec<SyncHistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub synced_at: DateTime<Utc>,
    pub commits_added: usize,
    #[serde(default)]
    pub last_sha: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    UpToDate,
}

/// Outcome of one sync cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub commits_added: usize,
    pub last_commit_sha: Option<String>,
    pub total_fetched: usize,
}

/// Tracks what has been synced for one repository
pub struct SyncTracker {
    store: RepoStore,
    key: RepoKey,
    history_limit: usize,
    source_timeout: Duration,
}

impl SyncTracker {
    pub fn new(store: RepoStore, key: RepoKey, config: &SyncConfig) -> Self {
        Self {
            store,
            key,
            history_limit: config.history_limit,
            source_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the per-call commit source timeout
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn store(&self) -> &RepoStore {
        &self.store
    }

    /// Current state; zero state when absent or corrupt
    pub fn load_state(&self) -> SyncState {
        crate::store::read_json(&self.store.sync_state_path()).unwrap_or_default()
    }

    fn save_state(&self, state: &SyncState) -> Result<(), EvalError> {
        crate::store::write_json_atomic(&self.store.sync_state_path(), state)
    }

    /// Prefix of a newest-first page strictly before the stored boundary
    ///
    /// Without a boundary, or when the boundary is not on the page, the whole page is new.
    pub fn new_commits(state: &SyncState, page: &[CommitSummary]) -> Vec<CommitSummary> {
        match &state.last_commit_sha {
            Some(boundary) => page
                .iter()
                .take_while(|c| &c.sha != boundary)
                .cloned()
                .collect(),
            None => page.to_vec(),
        }
    }

    /// Prepend unseen records to the commit index; returns how many were added
    pub fn merge_and_save(&self, records: &[CommitRecord]) -> Result<usize, EvalError> {
        self.merge_index(records).map(|(added, _)| added)
    }

    /// `(added, indexed)`: records new to the index and the index length afterwards
    fn merge_index(&self, records: &[CommitRecord]) -> Result<(usize, usize), EvalError> {
        let existing = self.store.load_index();
        let mut seen: HashSet<String> = existing.iter().map(|e| e.sha.clone()).collect();

        let mut merged: Vec<CommitIndexEntry> = records
            .iter()
            .filter(|r| seen.insert(r.sha.clone()))
            .map(CommitIndexEntry::from_record)
            .collect();
        let added = merged.len();

        if added == 0 {
            return Ok((0, existing.len()));
        }

        merged.extend(existing);
        self.store.save_index(&merged)?;

        tracing::info!(
            "Updated commit index for {}: {} new, {} total",
            self.key,
            added,
            merged.len()
        );
        Ok((added, merged.len()))
    }

    async fn with_timeout<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.source_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                target: format!("{} ({})", what, self.key),
                secs: self.source_timeout.as_secs(),
            }),
        }
    }

    /// Run one sync cycle against `source`
    pub async fn sync(
        &self,
        source: &dyn CommitSource,
        page_size: usize,
    ) -> Result<SyncReport, EvalError> {
        let owner = self.key.owner.as_str();
        let repo = self.key.repo.as_str();
        let mut state = self.load_state();

        tracing::info!(
            "Syncing {} (since: {})",
            self.key,
            state
                .last_commit_date
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "beginning".to_string())
        );

        let page = self
            .with_timeout(
                "commit list",
                source.fetch_commits_list(owner, repo, page_size, state.last_commit_date),
            )
            .await?;

        let delta = Self::new_commits(&state, &page);

        if let Some(boundary) = &state.last_commit_sha
            && delta.len() == page.len()
            && page.len() >= page_size
        {
            tracing::warn!(
                "Boundary {} not found in a full page of {} commits for {}, older new commits may be missed",
                boundary,
                page.len(),
                self.key
            );
        }

        if delta.is_empty() {
            tracing::info!("{} is up to date", self.key);
            return Ok(SyncReport {
                status: SyncStatus::UpToDate,
                commits_added: 0,
                last_commit_sha: state.last_commit_sha,
                total_fetched: state.total_fetched,
            });
        }

        // Fetch everything before persisting anything
        let mut records = Vec::with_capacity(delta.len());
        for (i, summary) in delta.iter().enumerate() {
            tracing::debug!(
                "Fetching commit {}/{}: {}",
                i + 1,
                delta.len(),
                summary.sha.chars().take(8).collect::<String>()
            );
            let record = self
                .with_timeout(
                    "commit detail",
                    source.fetch_commit_detail(owner, repo, &summary.sha),
                )
                .await?;
            records.push(record);
        }

        for record in &records {
            self.store.save_commit(record)?;
        }
        let (newly_indexed, indexed) = self.merge_index(&records)?;
        if newly_indexed < delta.len() {
            tracing::debug!(
                "{} of {} new commits were already indexed by an unfinished cycle",
                delta.len() - newly_indexed,
                delta.len()
            );
        }
        // Counted against the boundary; the index may already hold an unfinished cycle's commits
        let added = delta.len();

        self.snapshot_context(source, &records).await;

        let newest = &delta[0];
        let now = Utc::now();
        state.last_synced_at = Some(now);
        state.last_commit_sha = Some(newest.sha.clone());
        state.last_commit_date = Some(newest.date);
        state.total_fetched = indexed;
        state.history.push(SyncHistoryEntry {
            synced_at: now,
            commits_added: added,
            last_sha: Some(newest.sha.clone()),
        });
        if state.history.len() > self.history_limit {
            let excess = state.history.len() - self.history_limit;
            state.history.drain(..excess);
        }
        self.save_state(&state)?;

        tracing::info!(
            "Synced {}: {} new commits, {} total",
            self.key,
            added,
            state.total_fetched
        );

        Ok(SyncReport {
            status: SyncStatus::Synced,
            commits_added: added,
            last_commit_sha: state.last_commit_sha,
            total_fetched: state.total_fetched,
        })
    }

    /// Best-effort refresh of the repository structure and touched-file snapshots
    async fn snapshot_context(&self, source: &dyn CommitSource, records: &[CommitRecord]) {
        let owner = self.key.owner.as_str();
        let repo = self.key.repo.as_str();

        match self
            .with_timeout("repo structure", source.fetch_repo_structure(owner, repo))
            .await
        {
            Ok(Some(structure)) => {
                if let Err(e) = self.store.save_repo_structure(&structure) {
                    tracing::warn!("Failed to save repo structure for {}: {}", self.key, e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to fetch repo structure for {}: {}", self.key, e),
        }

        let paths: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.files.iter())
            .filter(|f| f.status != "removed")
            .map(|f| f.filename.as_str())
            .collect();

        let mut saved = 0usize;
        for path in paths.into_iter().take(MAX_SNAPSHOT_FILES) {
            match self
                .with_timeout("file snapshot", source.fetch_file(owner, repo, path))
                .await
            {
                Ok(Some(content)) => match self.store.save_file(path, &content) {
                    Ok(()) => saved += 1,
                    Err(e) => tracing::debug!("Skipping snapshot of {}: {}", path, e),
                },
                Ok(None) => {}
                Err(e) => tracing::debug!("Failed to fetch {}: {}", path, e),
            }
        }

        if saved > 0 {
            tracing::debug!("Stored {} file snapshots for {}", saved, self.key);
        }
    }
}

#[cfg(test)]
mod tests;
