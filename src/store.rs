//! On-disk layout of one synced repository
//!
//! ```text
//! {data_root}/{platform}/{owner}/{repo}/
//!     sync_state.json
//!     commits_index.json
//!     commits/<sha>.json
//!     files/<path>
//!     repo_structure.json
//! ```
//!
//! Reads never fail: missing or corrupt files are logged and treated as absent. Writes go
//! through [`write_json_atomic`] (temp file + rename), which is the only protection these
//! files get; one writer per repository is assumed.

use crate::error::{EvalError, StorageError};
use crate::git::normalize::normalize_commit;
use crate::paths::PlatformPaths;
use crate::types::{CommitRecord, CommitStats, FileChange, RepoKey, normalize_author};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Max characters of the subject kept in the commit index
const INDEX_MESSAGE_CHARS: usize = 100;

/// One entry of `commits_index.json` (newest-first, unique by sha)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitIndexEntry {
    pub sha: String,
    /// First line of the message, at most 100 characters
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub files_changed: usize,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub files: Vec<String>,
}

impl CommitIndexEntry {
    pub fn from_record(record: &CommitRecord) -> Self {
        Self {
            sha: record.sha.clone(),
            message: record.subject().chars().take(INDEX_MESSAGE_CHARS).collect(),
            author: record.author.clone(),
            date: record.timestamp,
            files_changed: record.files.len(),
            additions: record.stats.additions,
            deletions: record.stats.deletions,
            files: record.files.iter().map(|f| f.filename.clone()).collect(),
        }
    }

    /// Degraded record used when the detail file is missing: no patches, per-file stats unknown
    pub fn to_record(&self) -> CommitRecord {
        CommitRecord {
            sha: self.sha.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            author_email: None,
            timestamp: self.date,
            files: self
                .files
                .iter()
                .map(|filename| FileChange {
                    filename: filename.clone(),
                    status: "modified".to_string(),
                    additions: 0,
                    deletions: 0,
                    patch: None,
                })
                .collect(),
            stats: CommitStats {
                additions: self.additions,
                deletions: self.deletions,
            },
        }
    }
}

/// Commit statistics of one author in a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStats {
    /// Name as recorded on the author's newest commit
    pub author: String,
    pub commits: usize,
    pub additions: u64,
    pub deletions: u64,
    pub last_commit_at: DateTime<Utc>,
}

/// Serialize `value` next to `path` and rename it into place
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EvalError> {
    let save_failed = |reason: String| StorageError::SaveFailed {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            StorageError::DirectoryCreationFailed(format!("{}: {}", parent.display(), e))
        })?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|e| save_failed(e.to_string()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).map_err(|e| save_failed(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        save_failed(e.to_string())
    })?;

    tracing::debug!("Saved {}", path.display());
    Ok(())
}

/// Read and parse a JSON file; absent and corrupt files both yield `None`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}, treating as absent", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Corrupt {}: {}, treating as absent", path.display(), e);
            None
        }
    }
}

/// Relative repository path safe to join under `files/`
fn safe_relative(rel: &str) -> Option<PathBuf> {
    let path = Path::new(rel);
    if rel.is_empty() || path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(path.to_path_buf())
}

/// Persisted data of one repository
#[derive(Debug, Clone)]
pub struct RepoStore {
    dir: PathBuf,
}

impl RepoStore {
    /// Store for `key` under the data root
    pub fn new(data_root: &Path, key: &RepoKey) -> Self {
        Self {
            dir: PlatformPaths::repo_dir(data_root, key),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.dir.join("sync_state.json")
    }

    pub fn commits_index_path(&self) -> PathBuf {
        self.dir.join("commits_index.json")
    }

    pub fn commits_dir(&self) -> PathBuf {
        self.dir.join("commits")
    }

    pub fn commit_path(&self, sha: &str) -> PathBuf {
        self.commits_dir()
            .join(format!("{}.json", crate::paths::sanitize_component(sha)))
    }

    pub fn files_dir(&self) -> PathBuf {
        self.dir.join("files")
    }

    pub fn repo_structure_path(&self) -> PathBuf {
        self.dir.join("repo_structure.json")
    }

    /// Whether anything has been synced for this repository
    pub fn exists(&self) -> bool {
        self.commits_index_path().exists() || self.commits_dir().is_dir()
    }

    /// Commit index, newest first; empty when absent or corrupt
    pub fn load_index(&self) -> Vec<CommitIndexEntry> {
        read_json(&self.commits_index_path()).unwrap_or_default()
    }

    pub fn save_index(&self, entries: &[CommitIndexEntry]) -> Result<(), EvalError> {
        write_json_atomic(&self.commits_index_path(), entries)
    }

    /// Detail record for one commit. Accepts canonical records and raw hosted-API payloads.
    pub fn load_commit(&self, sha: &str) -> Option<CommitRecord> {
        let value: serde_json::Value = read_json(&self.commit_path(sha))?;
        let record = normalize_commit(&value);
        if record.is_none() {
            tracing::warn!("Commit detail for {} has no sha, ignoring", sha);
        }
        record
    }

    pub fn save_commit(&self, record: &CommitRecord) -> Result<(), EvalError> {
        write_json_atomic(&self.commit_path(&record.sha), record)
    }

    pub fn load_repo_structure(&self) -> Option<serde_json::Value> {
        read_json(&self.repo_structure_path())
    }

    pub fn save_repo_structure(&self, structure: &serde_json::Value) -> Result<(), EvalError> {
        write_json_atomic(&self.repo_structure_path(), structure)
    }

    /// Snapshot of one repository file under `files/`
    pub fn read_file(&self, rel: &str) -> Option<String> {
        let path = self.files_dir().join(safe_relative(rel)?);
        if !path.is_file() {
            return None;
        }
        match fs::read(&path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                tracing::debug!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_file(&self, rel: &str, content: &str) -> Result<(), EvalError> {
        let rel_path = safe_relative(rel).ok_or_else(|| StorageError::SaveFailed {
            path: rel.to_string(),
            reason: "not a relative repository path".to_string(),
        })?;
        let path = self.files_dir().join(rel_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::DirectoryCreationFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        fs::write(&path, content).map_err(|e| StorageError::SaveFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Commits by any of the normalized identities, newest first
    ///
    /// Order comes from the commit index. Missing detail files degrade to the index entry.
    pub fn load_author_commits(&self, identities: &HashSet<String>) -> Vec<CommitRecord> {
        let index = self.load_index();
        let mut commits = Vec::new();
        let mut missing_details = 0usize;

        for entry in index
            .iter()
            .filter(|e| identities.contains(&crate::types::normalize_author(&e.author)))
        {
            match self.load_commit(&entry.sha) {
                Some(record) => commits.push(record),
                None => {
                    missing_details += 1;
                    commits.push(entry.to_record());
                }
            }
        }

        if missing_details > 0 {
            tracing::warn!(
                "{} commits in {} have no detail file, using index entries",
                missing_details,
                self.dir.display()
            );
        }

        tracing::debug!(
            "Loaded {} author commits from {} indexed",
            commits.len(),
            index.len()
        );
        commits
    }

    /// Authors of the indexed commits grouped by normalized name, most commits first
    pub fn author_stats(&self) -> Vec<AuthorStats> {
        let mut order: Vec<String> = Vec::new();
        let mut by_author: HashMap<String, AuthorStats> = HashMap::new();

        // The index is newest first, so the first entry seen names the author
        for entry in self.load_index() {
            let key = normalize_author(&entry.author);
            if key.is_empty() {
                continue;
            }
            let stats = by_author.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                AuthorStats {
                    author: entry.author.trim().to_string(),
                    commits: 0,
                    additions: 0,
                    deletions: 0,
                    last_commit_at: entry.date,
                }
            });
            stats.commits += 1;
            stats.additions += entry.additions;
            stats.deletions += entry.deletions;
        }

        let mut authors: Vec<AuthorStats> = order
            .into_iter()
            .filter_map(|key| by_author.remove(&key))
            .collect();
        authors.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.author.cmp(&b.author)));
        authors
    }
}
