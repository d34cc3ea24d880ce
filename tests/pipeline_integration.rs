/// End-to-end tests: local git repository -> sync -> evaluate -> incremental evaluate
use anyhow::Result;
use async_trait::async_trait;
use commit_eval::client::{EvalClient, Evaluation, EvaluationRequest};
use commit_eval::config::Config;
use commit_eval::error::{EvalError, TransportError};
use commit_eval::git::LocalGitSource;
use commit_eval::oracle::{CompletionRequest, ScoringOracle};
use commit_eval::sync::SyncStatus;
use git2::{Repository, Signature, Time};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Oracle recording prompts and answering with a fixed score object
struct RecordingOracle {
    prompts: Mutex<Vec<String>>,
}

impl RecordingOracle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoringOracle for RecordingOracle {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(r#"```json
{"ai_fullstack": 64, "ai_architecture": 58, "cloud_native": 71, "open_source": 45,
 "intelligent_dev": 80, "leadership": 52,
 "reasoning": "**Key Strengths:**\nContainerized builds"}
```"#
            .to_string())
    }
}

struct Workspace {
    _repo_dir: TempDir,
    _data_dir: TempDir,
    repo: Repository,
    config: Config,
    next_time: i64,
}

impl Workspace {
    fn new() -> Result<Self> {
        let repo_dir = TempDir::new()?;
        let data_dir = TempDir::new()?;
        let repo = Repository::init(repo_dir.path())?;

        let mut config = Config::default();
        config.storage.data_dir = data_dir.path().join("data");
        config.storage.evaluations_dir = data_dir.path().join("evaluations");

        Ok(Self {
            _repo_dir: repo_dir,
            _data_dir: data_dir,
            repo,
            config,
            next_time: 1_700_000_000,
        })
    }

    fn path(&self) -> &Path {
        self.repo.workdir().unwrap()
    }

    fn commit(&mut self, author: &str, path: &str, content: &str) -> Result<String> {
        let full = self.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap())?;
        std::fs::write(&full, content)?;

        let mut index = self.repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        self.next_time += 60;
        let sig = Signature::new(
            author,
            &format!("{}@example.com", author.to_lowercase()),
            &Time::new(self.next_time, 0),
        )?;
        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Update {}", path),
            &tree,
            &parents,
        )?;
        Ok(oid.to_string())
    }
}

#[tokio::test]
async fn test_sync_is_incremental_and_idempotent() -> Result<()> {
    let mut ws = Workspace::new()?;
    ws.commit("Alice", "src/lib.rs", "pub fn a() {}\n")?;
    ws.commit("Bob", "README.md", "# widgets\n")?;
    ws.commit("Alice", "Dockerfile", "FROM rust:1.88\n")?;

    let client = EvalClient::with_oracle(ws.config.clone(), RecordingOracle::new())?;
    let source = LocalGitSource::discover(ws.path())?;
    let key = source.repo_key();

    let first = client.sync(&source, &key).await?;
    assert_eq!(first.status, SyncStatus::Synced);
    assert_eq!(first.commits_added, 3);

    let again = client.sync(&source, &key).await?;
    assert_eq!(again.status, SyncStatus::UpToDate);
    assert_eq!(again.commits_added, 0);

    let newest = ws.commit("Bob", "README.md", "# widgets\n\nUsage.\n")?;
    let third = client.sync(&source, &key).await?;
    assert_eq!(third.commits_added, 1);
    assert_eq!(third.total_fetched, 4);
    assert_eq!(third.last_commit_sha.as_deref(), Some(newest.as_str()));

    let store = client.repo_store(&key);
    assert_eq!(store.load_index().len(), 4);
    assert_eq!(
        store.read_file("Dockerfile").as_deref(),
        Some("FROM rust:1.88\n")
    );
    assert!(store.load_repo_structure().is_some());

    Ok(())
}

#[tokio::test]
async fn test_evaluate_then_extend_incrementally() -> Result<()> {
    let mut ws = Workspace::new()?;
    ws.commit("Alice", "src/lib.rs", "pub fn a() {}\n")?;
    ws.commit("Bob", "README.md", "# widgets\n")?;
    ws.commit("Alice", "Dockerfile", "FROM rust:1.88\n")?;

    let oracle = RecordingOracle::new();
    let client = EvalClient::with_oracle(ws.config.clone(), oracle.clone())?;
    let source = LocalGitSource::discover(ws.path())?;
    let key = source.repo_key();
    client.sync(&source, &key).await?;

    let first = client.evaluate(&key, &EvaluationRequest::new("alice")).await?;
    let Evaluation::Fresh(result) = &first else {
        panic!("expected fresh evaluation, got {:?}", first);
    };
    assert_eq!(result.total_commits_evaluated, 2);
    assert_eq!(result.scores.cloud_native, 71);
    assert_eq!(result.scores.reasoning, "**Key Strengths:**\nContainerized builds");
    assert_eq!(result.files_loaded, 2);
    assert_eq!(result.commits_summary.files_changed, 2);

    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("--- FILE: Dockerfile ---\nFROM rust:1.88"));
    assert!(prompt.contains("REPO STRUCTURE (truncated):"));

    let newest = ws.commit("Alice", "src/lib.rs", "pub fn a() {}\npub fn b() {}\n")?;
    client.sync(&source, &key).await?;

    let second = client.evaluate(&key, &EvaluationRequest::new("Alice")).await?;
    let Evaluation::Incremental(result) = &second else {
        panic!("expected incremental evaluation, got {:?}", second);
    };
    assert_eq!(result.total_commits_evaluated, 3);
    assert_eq!(result.new_commits_count, 1);
    assert_eq!(result.last_commit_sha.as_deref(), Some(newest.as_str()));
    assert_eq!(result.scores.cloud_native, 71);
    assert!(result.scores.reasoning.starts_with("**Recent Activity (1 new commits):**"));
    assert_eq!(oracle.prompts().len(), 2);

    let third = client.evaluate(&key, &EvaluationRequest::new("alice")).await?;
    assert!(matches!(third, Evaluation::UpToDate(_)));
    assert_eq!(oracle.prompts().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_unconfigured_oracle_fails_or_falls_back() -> Result<()> {
    let mut ws = Workspace::new()?;
    ws.commit("Alice", "deploy/docker-compose.yml", "services: {}\n")?;

    let source = LocalGitSource::discover(ws.path())?;
    let key = source.repo_key();

    let mut config = ws.config.clone();
    config.oracle.api_key = None;
    let client = EvalClient::with_config(config.clone())?;
    client.sync(&source, &key).await?;

    let err = client
        .evaluate(&key, &EvaluationRequest::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EvalError::Transport(TransportError::NotConfigured(_))
    ));

    config.oracle.allow_heuristic_fallback = true;
    let client = EvalClient::with_config(config)?;
    let evaluation = client.evaluate(&key, &EvaluationRequest::new("alice")).await?;
    let result = evaluation.result();
    assert_eq!(result.total_commits_evaluated, 1);
    assert!(result.scores.reasoning.contains("keyword"));
    assert!(result.scores.cloud_native > 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_author_and_strategy_listing() -> Result<()> {
    let mut ws = Workspace::new()?;
    ws.commit("Alice", "a.txt", "a\n")?;

    let client = EvalClient::with_oracle(ws.config.clone(), RecordingOracle::new())?;
    let source = LocalGitSource::discover(ws.path())?;
    let key = source.repo_key();
    client.sync(&source, &key).await?;

    let evaluation = client.evaluate(&key, &EvaluationRequest::new("mallory")).await?;
    assert!(matches!(evaluation, Evaluation::NoCommits(_)));
    assert_eq!(
        evaluation.result().scores.reasoning,
        "No commits found for this author."
    );

    let strategies = client.strategies();
    assert!(strategies.iter().any(|s| s.id == "balanced" && s.default));
    assert!(strategies.iter().all(|s| s.enabled));

    Ok(())
}
