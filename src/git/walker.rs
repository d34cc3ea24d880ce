use crate::error::TransportError;
use crate::git::CommitSource;
use crate::types::{CommitRecord, CommitStats, CommitSummary, FileChange, RepoKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::{Delta, DiffOptions, Patch, Repository, Sort};
use std::path::{Path, PathBuf};

/// Tree entries recorded in a repository structure snapshot
const MAX_TREE_ENTRIES: usize = 5000;
/// Files larger than this are never returned as text
const MAX_FILE_BYTES: usize = 512 * 1024;

/// Commit source reading a local git repository
///
/// The repository is reopened inside a blocking task for every call, so the source itself
/// is `Send + Sync` and cheap to share. The `owner`/`repo` arguments of [`CommitSource`] are
/// ignored: a local source always serves the repository it was discovered from.
#[derive(Debug, Clone)]
pub struct LocalGitSource {
    repo_path: PathBuf,
}

impl LocalGitSource {
    /// Discover a git repository from any path within it
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let repo = Repository::discover(path).context("Failed to discover git repository")?;
        let repo_path = match repo.workdir() {
            Some(workdir) => workdir.to_path_buf(),
            None => repo.path().to_path_buf(),
        };

        tracing::info!("Opened git repository at: {}", repo_path.display());

        Ok(Self { repo_path })
    }

    /// Get the repository root path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Namespace for this repository's persisted data: `local/{parent dir}/{repo dir}`
    pub fn repo_key(&self) -> RepoKey {
        let trimmed = self
            .repo_path
            .components()
            .filter(|c| !matches!(c, std::path::Component::CurDir))
            .collect::<PathBuf>();
        let repo = trimmed
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repo".to_string());
        let owner = trimmed
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "local".to_string());
        RepoKey::new(self.platform(), owner, repo)
    }

    async fn run_blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let repo_path = self.repo_path.clone();
        let target = format!("git:{}", repo_path.display());

        let joined = tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&repo_path).context("Failed to open git repository")?;
            f(&repo)
        })
        .await;

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TransportError::RequestFailed {
                target,
                reason: format!("{}: {:#}", op, e),
            }),
            Err(e) => Err(TransportError::RequestFailed {
                target,
                reason: format!("{} task failed: {}", op, e),
            }),
        }
    }
}

#[async_trait]
impl CommitSource for LocalGitSource {
    fn platform(&self) -> &str {
        "local"
    }

    async fn fetch_commits_list(
        &self,
        _owner: &str,
        _repo: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>, TransportError> {
        let since = since.map(|d| d.timestamp());
        self.run_blocking("list commits", move |repo| list_commits(repo, limit, since))
            .await
    }

    async fn fetch_commit_detail(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<CommitRecord, TransportError> {
        let sha = sha.to_string();
        self.run_blocking("commit detail", move |repo| commit_detail(repo, &sha))
            .await
    }

    async fn fetch_repo_structure(
        &self,
        _owner: &str,
        _repo: &str,
    ) -> Result<Option<serde_json::Value>, TransportError> {
        self.run_blocking("repo structure", repo_structure).await
    }

    async fn fetch_file(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
    ) -> Result<Option<String>, TransportError> {
        let path = path.to_string();
        self.run_blocking("read file", move |repo| file_at_head(repo, &path))
            .await
    }
}

fn to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Walk HEAD newest-first. Summary dates use committer time so `since` agrees with the walk order.
fn list_commits(repo: &Repository, limit: usize, since: Option<i64>) -> Result<Vec<CommitSummary>> {
    // Unborn HEAD: nothing committed yet
    if repo.head().is_err() {
        return Ok(Vec::new());
    }

    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;
    revwalk.push_head()?;

    let mut commits = Vec::new();
    for oid in revwalk {
        if commits.len() >= limit {
            break;
        }

        let commit = repo.find_commit(oid?)?;
        let commit_time = commit.time().seconds();

        if let Some(since) = since
            && commit_time < since
        {
            break; // Commits are sorted, no need to continue
        }

        commits.push(CommitSummary {
            sha: commit.id().to_string(),
            author: commit.author().name().unwrap_or("Unknown").to_string(),
            date: to_utc(commit_time),
            message: commit.message().unwrap_or("").to_string(),
        });
    }

    tracing::debug!("Listed {} commits", commits.len());
    Ok(commits)
}

fn delta_status(status: Delta) -> &'static str {
    match status {
        Delta::Added => "added",
        Delta::Deleted => "removed",
        Delta::Modified => "modified",
        Delta::Renamed => "renamed",
        Delta::Copied => "copied",
        _ => "changed",
    }
}

fn commit_detail(repo: &Repository, sha: &str) -> Result<CommitRecord> {
    let oid = git2::Oid::from_str(sha).with_context(|| format!("Invalid commit sha '{}'", sha))?;
    let commit = repo
        .find_commit(oid)
        .with_context(|| format!("Commit {} not found", sha))?;

    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };

    let mut diff_opts = DiffOptions::new();
    diff_opts
        .context_lines(3)
        .interhunk_lines(0)
        .ignore_whitespace(false);

    // First commit diffs against the empty tree
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts))?;

    let mut files = Vec::new();
    let mut stats = CommitStats::default();

    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };

        let filename = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();

        let mut change = FileChange {
            filename,
            status: delta_status(delta.status()).to_string(),
            additions: 0,
            deletions: 0,
            patch: None,
        };

        if let Some(mut patch) = Patch::from_diff(&diff, idx)? {
            let (_, additions, deletions) = patch.line_stats()?;
            change.additions = additions as u64;
            change.deletions = deletions as u64;

            if !delta.flags().is_binary() {
                let buf = patch.to_buf()?;
                change.patch = Some(String::from_utf8_lossy(&buf).into_owned());
            }
        }

        stats.additions += change.additions;
        stats.deletions += change.deletions;
        files.push(change);
    }

    let author = commit.author();
    Ok(CommitRecord {
        sha: commit.id().to_string(),
        message: commit.message().unwrap_or("").to_string(),
        author: author.name().unwrap_or("Unknown").to_string(),
        author_email: author
            .email()
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        timestamp: to_utc(author.when().seconds()),
        files,
        stats,
    })
}

/// HEAD tree listing in the `{"tree": [{"path", "type"}]}` shape hosted APIs return
fn repo_structure(repo: &Repository) -> Result<Option<serde_json::Value>> {
    let Ok(head) = repo.head() else {
        return Ok(None);
    };
    let tree = head.peel_to_tree()?;

    let mut entries = Vec::new();
    let mut truncated = false;
    tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
        if entries.len() >= MAX_TREE_ENTRIES {
            truncated = true;
            return git2::TreeWalkResult::Skip;
        }
        let kind = match entry.kind() {
            Some(git2::ObjectType::Tree) => "tree",
            _ => "blob",
        };
        entries.push(serde_json::json!({
            "path": format!("{}{}", root, entry.name().unwrap_or("")),
            "type": kind,
        }));
        git2::TreeWalkResult::Ok
    })?;

    Ok(Some(serde_json::json!({
        "tree": entries,
        "truncated": truncated,
    })))
}

fn file_at_head(repo: &Repository, path: &str) -> Result<Option<String>> {
    let Ok(head) = repo.head() else {
        return Ok(None);
    };
    let tree = head.peel_to_tree()?;

    // Deleted or renamed away since the commit that touched it
    let Ok(entry) = tree.get_path(Path::new(path)) else {
        return Ok(None);
    };

    let object = entry.to_object(repo)?;
    let Some(blob) = object.as_blob() else {
        return Ok(None);
    };

    if blob.is_binary() || blob.size() > MAX_FILE_BYTES {
        return Ok(None);
    }

    Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
}
