use crate::error::{EvalError, StorageError};
use crate::paths::{PlatformPaths, sanitize_component};
use crate::store::{read_json, write_json_atomic};
use crate::types::{EvaluationResult, RepoKey, normalize_author};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted evaluation results, one file per (repository, author, strategy)
///
/// Layout: `{root}/{platform}/{owner}/{repo}/{author-key}__{strategy}.json`
#[derive(Debug, Clone)]
pub struct EvalCache {
    root: PathBuf,
}

/// File-name-safe author key: sanitized lowercase identity plus a short hash of it
///
/// The hash keeps identities apart that sanitize to the same text.
pub fn author_key(author: &str) -> String {
    let normalized = normalize_author(author);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("{}-{}", sanitize_component(&normalized), &hash[..8])
}

impl EvalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the default cache root
    pub fn default_root() -> PathBuf {
        PlatformPaths::default_evaluations_root()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_dir(&self, key: &RepoKey) -> PathBuf {
        PlatformPaths::repo_dir(&self.root, key)
    }

    pub fn entry_path(&self, key: &RepoKey, author: &str, strategy: &str) -> PathBuf {
        self.repo_dir(key).join(format!(
            "{}__{}.json",
            author_key(author),
            sanitize_component(strategy)
        ))
    }

    /// Cached result, `None` when absent or unreadable
    pub fn load(&self, key: &RepoKey, author: &str, strategy: &str) -> Option<EvaluationResult> {
        let result = read_json(&self.entry_path(key, author, strategy));
        if result.is_some() {
            tracing::debug!("Cache hit for {} in {} ({})", author, key, strategy);
        }
        result
    }

    pub fn save(
        &self,
        key: &RepoKey,
        author: &str,
        strategy: &str,
        result: &EvaluationResult,
    ) -> Result<(), EvalError> {
        write_json_atomic(&self.entry_path(key, author, strategy), result)
    }

    /// Remove one author's cached results, for one strategy or all of them
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(
        &self,
        key: &RepoKey,
        author: &str,
        strategy: Option<&str>,
    ) -> Result<usize, EvalError> {
        if let Some(strategy) = strategy {
            let path = self.entry_path(key, author, strategy);
            if !path.exists() {
                return Ok(0);
            }
            remove_file(&path)?;
            return Ok(1);
        }

        let prefix = format!("{}__", author_key(author));
        let dir = self.repo_dir(key);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(0);
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"));
            if matches {
                remove_file(&path)?;
                removed += 1;
            }
        }

        tracing::info!("Invalidated {} cached evaluations for {} in {}", removed, author, key);
        Ok(removed)
    }

    /// Drop every cached result of a repository
    pub fn invalidate_repo(&self, key: &RepoKey) -> Result<usize, EvalError> {
        let dir = self.repo_dir(key);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(0);
        };

        let count = entries
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count();

        fs::remove_dir_all(&dir).map_err(|e| StorageError::DeleteFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Invalidated {} cached evaluations in {}", count, key);
        Ok(count)
    }
}

fn remove_file(path: &Path) -> Result<(), EvalError> {
    fs::remove_file(path).map_err(|e| {
        StorageError::DeleteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
