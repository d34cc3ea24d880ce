use super::*;
use crate::types::{CommitStats, FileChange};
use async_trait::async_trait;
use chrono::TimeZone;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// In-memory source holding commits newest-first
#[derive(Default)]
struct MockSource {
    commits: Mutex<Vec<CommitRecord>>,
    failing_sha: Mutex<Option<String>>,
    delay: Option<Duration>,
    detail_calls: AtomicUsize,
}

impl MockSource {
    fn push(&self, record: CommitRecord) {
        self.commits.lock().unwrap().insert(0, record);
    }

    fn fail_on(&self, sha: Option<&str>) {
        *self.failing_sha.lock().unwrap() = sha.map(str::to_string);
    }
}

#[async_trait]
impl CommitSource for MockSource {
    fn platform(&self) -> &str {
        "mock"
    }

    async fn fetch_commits_list(
        &self,
        _owner: &str,
        _repo: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .commits
            .lock()
            .unwrap()
            .iter()
            .filter(|c| since.is_none_or(|s| c.timestamp >= s))
            .take(limit)
            .map(|c| CommitSummary {
                sha: c.sha.clone(),
                author: c.author.clone(),
                date: c.timestamp,
                message: c.message.clone(),
            })
            .collect())
    }

    async fn fetch_commit_detail(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<CommitRecord, TransportError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_sha.lock().unwrap().as_deref() == Some(sha) {
            return Err(TransportError::Http {
                target: "mock".to_string(),
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        self.commits
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.sha == sha)
            .cloned()
            .ok_or_else(|| TransportError::MalformedPayload {
                target: "mock".to_string(),
                reason: format!("unknown sha {}", sha),
            })
    }

    async fn fetch_file(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
    ) -> Result<Option<String>, TransportError> {
        Ok(Some(format!("// contents of {}\n", path)))
    }
}

fn record(n: i64, author: &str) -> CommitRecord {
    CommitRecord {
        sha: format!("sha{:03}", n),
        message: format!("Change number {}", n),
        author: author.to_string(),
        author_email: None,
        timestamp: Utc.timestamp_opt(1_700_000_000 + n * 60, 0).unwrap(),
        files: vec![FileChange {
            filename: format!("src/file{}.rs", n % 3),
            status: "modified".to_string(),
            additions: 2,
            deletions: 1,
            patch: Some("@@ -1 +1 @@".to_string()),
        }],
        stats: CommitStats {
            additions: 2,
            deletions: 1,
        },
    }
}

fn tracker(dir: &TempDir) -> SyncTracker {
    let key = RepoKey::new("mock", "octo", "repo");
    let store = RepoStore::new(dir.path(), &key);
    SyncTracker::new(store, key, &SyncConfig::default())
}

fn summary(sha: &str) -> CommitSummary {
    CommitSummary {
        sha: sha.to_string(),
        author: "a".to_string(),
        date: Utc.timestamp_opt(0, 0).unwrap(),
        message: String::new(),
    }
}

#[test]
fn test_load_state_absent_is_zero() {
    let dir = TempDir::new().unwrap();
    assert_eq!(tracker(&dir).load_state(), SyncState::default());
}

#[test]
fn test_load_state_corrupt_is_zero() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);
    std::fs::create_dir_all(tracker.store().dir()).unwrap();
    std::fs::write(tracker.store().sync_state_path(), "[[[").unwrap();
    assert_eq!(tracker.load_state(), SyncState::default());
}

#[test]
fn test_legacy_history_key() {
    let json = r#"{
        "last_commit_sha": "abc",
        "total_fetched": 3,
        "sync_history": [{"synced_at": "2024-01-01T00:00:00Z", "commits_added": 3, "last_sha": "abc"}]
    }"#;
    let state: SyncState = serde_json::from_str(json).unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.total_fetched, 3);
}

#[test]
fn test_new_commits_prefix_before_boundary() {
    let page: Vec<CommitSummary> = ["e", "d", "c", "b", "a"].iter().map(|s| summary(s)).collect();

    let fresh = SyncState::default();
    assert_eq!(SyncTracker::new_commits(&fresh, &page).len(), 5);

    let state = SyncState {
        last_commit_sha: Some("c".to_string()),
        ..SyncState::default()
    };
    let delta: Vec<String> = SyncTracker::new_commits(&state, &page)
        .into_iter()
        .map(|c| c.sha)
        .collect();
    assert_eq!(delta, vec!["e", "d"]);

    let at_head = SyncState {
        last_commit_sha: Some("e".to_string()),
        ..SyncState::default()
    };
    assert!(SyncTracker::new_commits(&at_head, &page).is_empty());
}

#[test]
fn test_merge_and_save_dedups_and_prepends() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);

    assert_eq!(tracker.merge_and_save(&[record(2, "a"), record(1, "a")]).unwrap(), 2);
    // sha002 is already indexed, sha003 appears twice in the batch
    let added = tracker
        .merge_and_save(&[record(3, "a"), record(3, "a"), record(2, "a")])
        .unwrap();
    assert_eq!(added, 1);

    let shas: Vec<String> = tracker.store().load_index().into_iter().map(|e| e.sha).collect();
    assert_eq!(shas, vec!["sha003", "sha002", "sha001"]);
}

#[tokio::test]
async fn test_first_sync_then_up_to_date() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);
    let source = MockSource::default();
    for n in 1..=4 {
        source.push(record(n, "alice"));
    }

    let report = tracker.sync(&source, 100).await.unwrap();
    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.commits_added, 4);
    assert_eq!(report.last_commit_sha.as_deref(), Some("sha004"));

    let state = tracker.load_state();
    assert_eq!(state.total_fetched, 4);
    assert_eq!(state.history.len(), 1);
    assert!(tracker.store().commit_path("sha001").exists());
    assert_eq!(
        tracker.store().read_file("src/file1.rs").as_deref(),
        Some("// contents of src/file1.rs\n")
    );

    let before = std::fs::read_to_string(tracker.store().sync_state_path()).unwrap();
    let again = tracker.sync(&source, 100).await.unwrap();
    assert_eq!(again.status, SyncStatus::UpToDate);
    assert_eq!(again.commits_added, 0);
    assert_eq!(again.total_fetched, 4);

    // Up-to-date cycles never rewrite the state file
    let after = std::fs::read_to_string(tracker.store().sync_state_path()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_incremental_sync_fetches_only_delta() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);
    let source = MockSource::default();
    for n in 1..=3 {
        source.push(record(n, "alice"));
    }
    tracker.sync(&source, 100).await.unwrap();
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 3);

    source.push(record(4, "bob"));
    source.push(record(5, "alice"));
    let report = tracker.sync(&source, 100).await.unwrap();

    assert_eq!(report.commits_added, 2);
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 5);

    let state = tracker.load_state();
    assert_eq!(state.last_commit_sha.as_deref(), Some("sha005"));
    assert_eq!(state.total_fetched, 5);
    assert_eq!(state.history.len(), 2);

    let shas: Vec<String> = tracker.store().load_index().into_iter().map(|e| e.sha).collect();
    assert_eq!(shas, vec!["sha005", "sha004", "sha003", "sha002", "sha001"]);
}

#[tokio::test]
async fn test_failed_detail_fetch_leaves_state_untouched() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);
    let source = MockSource::default();
    for n in 1..=2 {
        source.push(record(n, "alice"));
    }
    tracker.sync(&source, 100).await.unwrap();
    let state_before = tracker.load_state();
    let index_before = tracker.store().load_index();

    source.push(record(3, "alice"));
    source.push(record(4, "alice"));
    source.fail_on(Some("sha003"));

    let err = tracker.sync(&source, 100).await.unwrap_err();
    assert!(matches!(err, EvalError::Transport(TransportError::Http { status: 502, .. })));
    assert_eq!(tracker.load_state(), state_before);
    assert_eq!(tracker.store().load_index(), index_before);
    assert!(!tracker.store().commit_path("sha004").exists());

    // The retried cycle picks up exactly the same delta
    source.fail_on(None);
    let report = tracker.sync(&source, 100).await.unwrap();
    assert_eq!(report.commits_added, 2);
    assert_eq!(tracker.load_state().total_fetched, 4);
}

#[tokio::test]
async fn test_failed_state_write_does_not_undercount_retry() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir);
    let source = MockSource::default();
    for n in 1..=3 {
        source.push(record(n, "alice"));
    }

    // A non-empty directory where the state file belongs makes the final rename fail
    let state_path = tracker.store().sync_state_path();
    std::fs::create_dir_all(state_path.join("blocker")).unwrap();

    let err = tracker.sync(&source, 100).await.unwrap_err();
    assert!(matches!(err, EvalError::Storage(_)));
    assert_eq!(tracker.store().load_index().len(), 3);
    assert!(tracker.load_state().last_commit_sha.is_none());

    std::fs::remove_dir_all(&state_path).unwrap();
    let report = tracker.sync(&source, 100).await.unwrap();
    assert_eq!(report.status, SyncStatus::Synced);
    assert_eq!(report.commits_added, 3);
    assert_eq!(report.total_fetched, 3);

    let state = tracker.load_state();
    assert_eq!(state.total_fetched, 3);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history[0].commits_added, 3);
    assert_eq!(tracker.store().load_index().len(), 3);
}

#[tokio::test]
async fn test_history_is_trimmed() {
    let dir = TempDir::new().unwrap();
    let key = RepoKey::new("mock", "octo", "repo");
    let config = SyncConfig {
        history_limit: 2,
        ..SyncConfig::default()
    };
    let tracker = SyncTracker::new(RepoStore::new(dir.path(), &key), key, &config);
    let source = MockSource::default();

    for n in 1..=3 {
        source.push(record(n, "alice"));
        tracker.sync(&source, 100).await.unwrap();
    }

    let state = tracker.load_state();
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].last_sha.as_deref(), Some("sha002"));
    assert_eq!(state.history[1].last_sha.as_deref(), Some("sha003"));
}

#[tokio::test]
async fn test_source_timeout() {
    let dir = TempDir::new().unwrap();
    let tracker = tracker(&dir).with_source_timeout(Duration::from_millis(20));
    let source = MockSource {
        delay: Some(Duration::from_millis(500)),
        ..MockSource::default()
    };
    source.push(record(1, "alice"));

    let err = tracker.sync(&source, 100).await.unwrap_err();
    assert!(matches!(err, EvalError::Transport(TransportError::Timeout { .. })));
    assert_eq!(tracker.load_state(), SyncState::default());
}
