//! Chunk evaluation
//!
//! A [`ChunkEvaluator`] is bound to one repository and one scoring strategy. It assembles
//! bounded prompts from commits (and optionally snapshotted file contents), calls the oracle
//! through the configured model chain, and parses the answer into a [`ScoreVector`].

/// Offline keyword-frequency scoring
pub mod heuristic;
/// Oracle response parsing
pub mod parse;
/// Prompt and context assembly
pub mod prompt;

use crate::chunking::{Chunk, partition, should_chunk};
use crate::config::{ChunkingConfig, Config};
use crate::error::TransportError;
use crate::merge::{ChunkEvaluation, ChunkScorer, MergeOutcome, merge_parallel, merge_sequential};
use crate::oracle::{CompletionRequest, ScoringOracle};
use crate::store::RepoStore;
use crate::strategy::ScoringProfile;
use crate::types::{
    ChunkingStrategy, CommitRecord, CommitsSummary, EvaluationResult, ScoreVector,
};
use async_trait::async_trait;
use chrono::Utc;
use prompt::{ContextParts, MAX_CONTEXT_FILES};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Oracle and budget settings shared by every evaluator
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    /// Models tried in order
    pub model_chain: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub allow_heuristic_fallback: bool,
    pub max_input_tokens: usize,
    pub chunking: ChunkingConfig,
}

impl EvaluatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model_chain: config.oracle.model_chain(),
            max_tokens: config.oracle.max_tokens,
            temperature: config.oracle.temperature,
            allow_heuristic_fallback: config.oracle.allow_heuristic_fallback,
            max_input_tokens: config.evaluation.max_input_tokens,
            chunking: config.chunking.clone(),
        }
    }
}

/// What a strategy needs to build an evaluator
#[derive(Clone)]
pub struct EvaluatorContext {
    pub oracle: Arc<dyn ScoringOracle>,
    /// Source of file snapshots and repository structure; `None` evaluates diffs only
    pub store: Option<RepoStore>,
    pub settings: EvaluatorSettings,
}

/// Per-request knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Take at most this many commits from the front of the list
    pub max_commits: usize,
    pub use_chunking: bool,
    pub strategy: ChunkingStrategy,
}

/// Logs a progress line every 15 seconds until dropped
struct Heartbeat(tokio::task::JoinHandle<()>);

impl Heartbeat {
    fn start(username: &str, commits: usize, chunked: bool) -> Self {
        let username = username.to_string();
        let started = Instant::now();
        Self(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    "Evaluating... elapsed={}s (author={}, commits={}, chunking={})",
                    started.elapsed().as_secs(),
                    username,
                    commits,
                    chunked
                );
            }
        }))
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Scores commit sets for one repository under one strategy
pub struct ChunkEvaluator {
    oracle: Arc<dyn ScoringOracle>,
    store: Option<RepoStore>,
    profile: ScoringProfile,
    settings: EvaluatorSettings,
    /// Snapshotted file contents, read at most once per path
    file_cache: Mutex<HashMap<String, Option<String>>>,
    repo_structure: OnceLock<Option<serde_json::Value>>,
}

impl ChunkEvaluator {
    pub fn new(ctx: EvaluatorContext, profile: ScoringProfile) -> Self {
        Self {
            oracle: ctx.oracle,
            store: ctx.store,
            profile,
            settings: ctx.settings,
            file_cache: Mutex::new(HashMap::new()),
            repo_structure: OnceLock::new(),
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.profile.strategy_id
    }

    pub fn profile(&self) -> &ScoringProfile {
        &self.profile
    }

    fn loads_files(&self) -> bool {
        self.settings.chunking.load_files && self.store.is_some()
    }

    fn repo_structure(&self) -> Option<&serde_json::Value> {
        self.repo_structure
            .get_or_init(|| self.store.as_ref().and_then(RepoStore::load_repo_structure))
            .as_ref()
    }

    /// Contents of the files touched by `commits`, first-seen order, at most 25 paths
    pub fn load_relevant_files(&self, commits: &[CommitRecord]) -> Vec<(String, String)> {
        let Some(store) = self.store.as_ref().filter(|_| self.loads_files()) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let paths: Vec<&str> = commits
            .iter()
            .flat_map(|c| c.files.iter())
            .map(|f| f.filename.as_str())
            .filter(|p| !p.is_empty() && seen.insert(*p))
            .take(MAX_CONTEXT_FILES)
            .collect();

        let mut cache = match self.file_cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        paths
            .into_iter()
            .filter_map(|path| {
                cache
                    .entry(path.to_string())
                    .or_insert_with(|| store.read_file(path))
                    .clone()
                    .map(|content| (path.to_string(), content))
            })
            .collect()
    }

    /// Call the oracle with each model of the chain until one answers
    pub async fn complete_with_fallback(&self, prompt: &str) -> Result<String, TransportError> {
        let mut attempts = 0;
        let mut last_error = "no models configured".to_string();

        for model in &self.settings.model_chain {
            attempts += 1;
            let request = CompletionRequest {
                prompt: prompt.to_string(),
                model: model.clone(),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            };

            match self.oracle.complete(&request).await {
                Ok(text) => {
                    debug!("Model {} answered ({} chars)", model, text.len());
                    return Ok(text);
                }
                Err(e @ TransportError::NotConfigured(_)) => return Err(e),
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(TransportError::ModelsExhausted {
            attempts,
            last_error,
        })
    }

    /// Score `prompt`; with heuristic fallback enabled, oracle failure scores `context` offline
    async fn score_prompt(&self, prompt: &str, context: &str) -> Result<ScoreVector, TransportError> {
        match self.complete_with_fallback(prompt).await {
            Ok(text) => Ok(parse::parse_scores(&text)),
            Err(e) if self.settings.allow_heuristic_fallback => {
                warn!("Oracle unavailable ({}), using keyword heuristic", e);
                Ok(heuristic::heuristic_scores(context, &self.profile))
            }
            Err(e) => Err(e),
        }
    }

    /// Evaluate one author's commits (newest first)
    ///
    /// Small sets take a single oracle call; sets above the chunking threshold are
    /// partitioned and merged with the requested strategy.
    pub async fn evaluate_engineer(
        &self,
        commits: &[CommitRecord],
        username: &str,
        options: EvaluationOptions,
    ) -> Result<EvaluationResult, TransportError> {
        let commits = &commits[..commits.len().min(options.max_commits)];
        if commits.is_empty() {
            return Ok(EvaluationResult::empty(username, self.strategy_id()));
        }

        let chunked = options.use_chunking && should_chunk(commits.len(), &self.settings.chunking);
        info!(
            "Evaluating {} commits by {} with strategy '{}' (chunked={})",
            commits.len(),
            username,
            self.strategy_id(),
            chunked
        );
        let _heartbeat = Heartbeat::start(username, commits.len(), chunked);

        let (outcome, chunking_strategy) = if chunked {
            let chunk_size = self.settings.chunking.chunk_size(self.loads_files());
            let chunks = partition(commits, chunk_size);
            let outcome = match options.strategy {
                ChunkingStrategy::Sequential => merge_sequential(self, username, &chunks).await?,
                ChunkingStrategy::Parallel => {
                    merge_parallel(
                        self,
                        username,
                        &chunks,
                        self.settings.chunking.max_parallel_workers,
                    )
                    .await?
                }
            };
            (outcome, Some(options.strategy))
        } else {
            (self.evaluate_whole(commits, username).await?, None)
        };

        Ok(EvaluationResult {
            username: username.to_string(),
            total_commits_evaluated: commits.len(),
            new_commits_count: commits.len(),
            last_commit_sha: commits.first().map(|c| c.sha.clone()),
            scores: outcome.scores,
            commits_summary: CommitsSummary::from_commits(commits),
            incremental: false,
            chunked,
            chunks_processed: outcome.chunks_processed,
            chunking_strategy,
            files_loaded: outcome.files_loaded,
            strategy: self.strategy_id().to_string(),
            evaluated_at: Some(Utc::now()),
            reasoning_history: Vec::new(),
        })
    }

    async fn evaluate_whole(
        &self,
        commits: &[CommitRecord],
        username: &str,
    ) -> Result<MergeOutcome, TransportError> {
        let files = self.load_relevant_files(commits);
        let context = prompt::build_context(&ContextParts {
            username,
            commits,
            files: &files,
            structure: self.repo_structure(),
            previous: None,
            chunk: None,
        });
        let prompt = prompt::build_evaluation_prompt(
            &context,
            username,
            &self.profile,
            false,
            self.settings.max_input_tokens,
        );

        Ok(MergeOutcome {
            scores: self.score_prompt(&prompt, &context).await?,
            chunks_processed: 1,
            files_loaded: files.len(),
            strategy: self.settings.chunking.strategy,
        })
    }
}

#[async_trait]
impl ChunkScorer for ChunkEvaluator {
    async fn score_chunk(
        &self,
        username: &str,
        chunk: &Chunk<'_>,
        previous: Option<&ScoreVector>,
    ) -> Result<ChunkEvaluation, TransportError> {
        let files = self.load_relevant_files(chunk.commits);
        let structure = if chunk.is_first() {
            self.repo_structure()
        } else {
            None
        };

        let context = prompt::build_context(&ContextParts {
            username,
            commits: chunk.commits,
            files: &files,
            structure,
            previous,
            chunk: Some((chunk.index, chunk.total)),
        });
        let prompt = prompt::build_evaluation_prompt(
            &context,
            username,
            &self.profile,
            true,
            self.settings.max_input_tokens,
        );

        Ok(ChunkEvaluation {
            index: chunk.index,
            scores: self.score_prompt(&prompt, &context).await?,
            files: files.into_iter().map(|(path, _)| path).collect(),
        })
    }

    async fn synthesize(
        &self,
        username: &str,
        results: &[ChunkEvaluation],
    ) -> Result<ScoreVector, TransportError> {
        let context = prompt::build_synthesis_context(results, username);
        let prompt = prompt::build_evaluation_prompt(
            &context,
            username,
            &self.profile,
            false,
            self.settings.max_input_tokens,
        );

        let text = self.complete_with_fallback(&prompt).await?;
        parse::try_parse_scores(&text).ok_or_else(|| TransportError::MalformedPayload {
            target: "synthesis".to_string(),
            reason: "response holds no score object".to_string(),
        })
    }
}
