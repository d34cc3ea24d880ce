//! Core library client for commit-eval
//!
//! [`EvalClient`] ties the pipeline together: syncing a repository from a
//! [`CommitSource`], selecting an author's commits, scoring them with a strategy's evaluator,
//! folding the result into the cached evaluation and persisting it.

use crate::config::Config;
use crate::error::{EvalError, ValidationError};
use crate::eval_cache::EvalCache;
use crate::evaluator::prompt::{build_identity_merge_prompt, identity_summaries};
use crate::evaluator::{ChunkEvaluator, EvaluationOptions, EvaluatorContext, EvaluatorSettings};
use crate::git::CommitSource;
use crate::incremental::{IncrementalMerger, IncrementalPlan, weighted_mean};
use crate::oracle::{HttpOracle, ScoringOracle};
use crate::store::{AuthorStats, RepoStore};
use crate::strategy::{StrategyInfo, StrategyRegistry};
use crate::sync::{SyncReport, SyncStatus, SyncTracker};
use crate::types::{
    ChunkingStrategy, CommitsSummary, Dimension, EvaluationResult, RepoKey, ScoreVector,
    normalize_author,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Repositories one comparison may span
pub const MAX_COMPARED_REPOS: usize = 10;

/// Evaluators keyed by repository and strategy id
///
/// An evaluator caches file contents and repository structure, so entries for a repository
/// are dropped whenever a sync brings in new commits.
#[derive(Default)]
pub struct EvaluatorCache {
    evaluators: RwLock<HashMap<(RepoKey, String), Arc<ChunkEvaluator>>>,
}

impl EvaluatorCache {
    pub async fn get_or_insert_with(
        &self,
        key: &RepoKey,
        strategy_id: &str,
        create: impl FnOnce() -> ChunkEvaluator,
    ) -> Arc<ChunkEvaluator> {
        let cache_key = (key.clone(), strategy_id.to_string());
        if let Some(evaluator) = self.evaluators.read().await.get(&cache_key) {
            return Arc::clone(evaluator);
        }

        let mut evaluators = self.evaluators.write().await;
        Arc::clone(
            evaluators
                .entry(cache_key)
                .or_insert_with(|| Arc::new(create())),
        )
    }

    pub async fn remove_repo(&self, key: &RepoKey) {
        self.evaluators.write().await.retain(|(k, _), _| k != key);
    }

    pub async fn len(&self) -> usize {
        self.evaluators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.evaluators.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.evaluators.write().await.clear();
    }
}

/// One evaluation request
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub author: String,
    /// Further identities counted as the same author
    pub aliases: Vec<String>,
    /// Strategy id; the configured default when `None`
    pub strategy: Option<String>,
    /// Overrides `chunking.strategy`
    pub chunking_strategy: Option<ChunkingStrategy>,
    /// Extend the cached evaluation instead of starting over
    pub use_cache: bool,
    pub use_chunking: bool,
}

impl EvaluationRequest {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            aliases: Vec::new(),
            strategy: None,
            chunking_strategy: None,
            use_cache: true,
            use_chunking: true,
        }
    }

    /// Normalized identities to match commits against
    pub fn identities(&self) -> HashSet<String> {
        std::iter::once(&self.author)
            .chain(self.aliases.iter())
            .map(|a| normalize_author(a))
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// Outcome of an evaluation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum Evaluation {
    /// Scored from scratch
    Fresh(EvaluationResult),
    /// New commits folded into the cached evaluation
    Incremental(EvaluationResult),
    /// Nothing new since the cached evaluation
    UpToDate(EvaluationResult),
    /// The author has no commits in this repository
    NoCommits(EvaluationResult),
}

impl Evaluation {
    pub fn result(&self) -> &EvaluationResult {
        match self {
            Evaluation::Fresh(r)
            | Evaluation::Incremental(r)
            | Evaluation::UpToDate(r)
            | Evaluation::NoCommits(r) => r,
        }
    }

    pub fn into_result(self) -> EvaluationResult {
        match self {
            Evaluation::Fresh(r)
            | Evaluation::Incremental(r)
            | Evaluation::UpToDate(r)
            | Evaluation::NoCommits(r) => r,
        }
    }
}

/// One repository's row of a contributor comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoComparison {
    pub repository: String,
    pub scores: ScoreVector,
    pub total_commits: usize,
    pub commits_summary: CommitsSummary,
    /// Served from the evaluation cache without new commits
    pub cached: bool,
}

/// A repository a comparison could not score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRepo {
    pub repository: String,
    pub reason: String,
}

/// One contributor scored across several repositories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorComparison {
    pub contributor: String,
    pub strategy: String,
    pub comparisons: Vec<RepoComparison>,
    pub total_commits: usize,
    /// Unweighted per-dimension mean over `comparisons`, keyed by dimension
    pub average_scores: BTreeMap<String, f64>,
    pub failed: Vec<FailedRepo>,
}

/// Main client for syncing repositories and evaluating authors
pub struct EvalClient {
    config: Arc<Config>,
    registry: Arc<StrategyRegistry>,
    oracle: Arc<dyn ScoringOracle>,
    cache: EvalCache,
    evaluators: EvaluatorCache,
    merger: IncrementalMerger,
}

impl EvalClient {
    /// Client with configuration from the default file, environment and defaults
    pub fn new() -> Result<Self, EvalError> {
        Self::with_config(Config::new()?)
    }

    /// Client talking to the configured HTTP oracle
    pub fn with_config(config: Config) -> Result<Self, EvalError> {
        let oracle = HttpOracle::new(&config.oracle)?;
        if !oracle.is_configured() {
            tracing::warn!("No scoring API key configured; evaluations will fail unless heuristic fallback is enabled");
        }
        Self::with_oracle(config, Arc::new(oracle))
    }

    /// Client with a caller-supplied oracle
    pub fn with_oracle(config: Config, oracle: Arc<dyn ScoringOracle>) -> Result<Self, EvalError> {
        config.validate()?;
        let registry = StrategyRegistry::with_builtins(&config.evaluation)?;

        Ok(Self {
            cache: EvalCache::new(config.storage.evaluations_dir.clone()),
            merger: IncrementalMerger::from_config(&config.evaluation),
            config: Arc::new(config),
            registry: Arc::new(registry),
            oracle,
            evaluators: EvaluatorCache::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &EvalCache {
        &self.cache
    }

    pub fn evaluators(&self) -> &EvaluatorCache {
        &self.evaluators
    }

    pub fn repo_store(&self, key: &RepoKey) -> RepoStore {
        RepoStore::new(&self.config.storage.data_dir, key)
    }

    /// Pull new commits for `key` from `source`
    ///
    /// The key's platform must match the source's, so one source never writes into another
    /// platform's namespace.
    pub async fn sync(
        &self,
        source: &dyn CommitSource,
        key: &RepoKey,
    ) -> Result<SyncReport, EvalError> {
        if source.platform() != key.platform {
            return Err(ValidationError::InvalidRepository(format!(
                "{} cannot be synced from a '{}' source",
                key,
                source.platform()
            ))
            .into());
        }

        let tracker = SyncTracker::new(self.repo_store(key), key.clone(), &self.config.sync);
        let report = tracker.sync(source, self.config.sync.page_size).await?;

        if report.status == SyncStatus::Synced {
            self.evaluators.remove_repo(key).await;
        }
        Ok(report)
    }

    /// Evaluate one author in a synced repository
    pub async fn evaluate(
        &self,
        key: &RepoKey,
        request: &EvaluationRequest,
    ) -> Result<Evaluation, EvalError> {
        let author = request.author.trim();
        if author.is_empty() {
            return Err(ValidationError::Empty("author".to_string()).into());
        }

        let strategy = self.registry.resolve(request.strategy.as_deref())?;
        let store = self.repo_store(key);
        if !store.exists() {
            return Err(ValidationError::RepositoryNotSynced(key.to_string()).into());
        }

        let commits = store.load_author_commits(&request.identities());
        if commits.is_empty() {
            tracing::info!("No commits by {} in {}", author, key);
            return Ok(Evaluation::NoCommits(EvaluationResult::empty(
                author,
                strategy.id(),
            )));
        }

        let evaluator = self
            .evaluators
            .get_or_insert_with(key, strategy.id(), || {
                strategy.create_evaluator(EvaluatorContext {
                    oracle: Arc::clone(&self.oracle),
                    store: Some(store.clone()),
                    settings: EvaluatorSettings::from_config(&self.config),
                })
            })
            .await;

        let previous = if request.use_cache {
            self.cache.load(key, author, strategy.id())
        } else {
            None
        };

        let options = EvaluationOptions {
            max_commits: usize::MAX,
            use_chunking: request.use_chunking,
            strategy: request
                .chunking_strategy
                .unwrap_or(self.config.chunking.strategy),
        };

        let evaluation = match self.merger.plan(previous.as_ref(), &commits) {
            IncrementalPlan::UpToDate { previous } => {
                tracing::info!("Evaluation of {} in {} is up to date", author, key);
                return Ok(Evaluation::UpToDate(previous.clone()));
            }
            IncrementalPlan::Initial { commits } => Evaluation::Fresh(
                evaluator
                    .evaluate_engineer(commits, author, options)
                    .await?,
            ),
            IncrementalPlan::Rebuild { previous, commits } => {
                let fresh = evaluator
                    .evaluate_engineer(commits, author, options)
                    .await?;
                Evaluation::Fresh(self.merger.heal(previous, fresh))
            }
            IncrementalPlan::Incremental {
                previous,
                new_commits,
            } => {
                tracing::info!(
                    "{} new commits by {} since {}",
                    new_commits.len(),
                    author,
                    previous.last_commit_sha.as_deref().unwrap_or("?")
                );
                let fresh = evaluator
                    .evaluate_engineer(new_commits, author, options)
                    .await?;
                Evaluation::Incremental(self.merger.merge(previous, fresh))
            }
        };

        if let Err(e) = self
            .cache
            .save(key, author, strategy.id(), evaluation.result())
        {
            tracing::warn!("Failed to cache evaluation of {} in {}: {}", author, key, e);
        }

        Ok(evaluation)
    }

    /// Authors of a synced repository with their commit counts, most commits first
    pub fn authors(&self, key: &RepoKey) -> Result<Vec<AuthorStats>, EvalError> {
        let store = self.repo_store(key);
        if !store.exists() {
            return Err(ValidationError::RepositoryNotSynced(key.to_string()).into());
        }
        Ok(store.author_stats())
    }

    /// Combine evaluations of one person recorded under several identities
    ///
    /// Each part is `(weight, evaluation)`, the weight usually being the evaluation's commit
    /// count. Scores are the weighted per-dimension mean, summaries are summed and the
    /// reasoning is synthesized by one oracle call; if that call fails the per-identity
    /// analyses are concatenated instead. The merged result has no evaluation boundary and is
    /// not cached.
    pub async fn merge_evaluations(
        &self,
        parts: &[(usize, EvaluationResult)],
        strategy: Option<&str>,
    ) -> Result<EvaluationResult, EvalError> {
        if parts.len() < 2 {
            return Err(ValidationError::TooFew {
                what: "evaluations to merge".to_string(),
                min: 2,
                actual: parts.len(),
            }
            .into());
        }
        if parts.iter().all(|(weight, _)| *weight == 0) {
            return Err(ValidationError::ZeroWeight("merged evaluations".to_string()).into());
        }
        let strategy = self.registry.resolve(strategy)?;

        let refs: Vec<(usize, &EvaluationResult)> = parts.iter().map(|(w, r)| (*w, r)).collect();
        let weighted: Vec<(&ScoreVector, usize)> = refs.iter().map(|(w, r)| (&r.scores, *w)).collect();
        let mut scores = weighted_mean(&weighted);

        let total_commits = parts.iter().map(|(_, r)| r.total_commits_evaluated).sum();
        let commits_summary = parts
            .iter()
            .fold(CommitsSummary::default(), |acc, (_, r)| acc.merged_with(&r.commits_summary));
        let names: Vec<&str> = parts.iter().map(|(_, r)| r.username.as_str()).collect();

        tracing::info!(
            "Merging {} evaluations ({}) with strategy '{}'",
            parts.len(),
            names.join(", "),
            strategy.id()
        );

        let evaluator = strategy.create_evaluator(EvaluatorContext {
            oracle: Arc::clone(&self.oracle),
            store: None,
            settings: EvaluatorSettings::from_config(&self.config),
        });
        let prompt = build_identity_merge_prompt(&refs, &scores, total_commits, evaluator.profile());
        let concatenated = || {
            format!(
                "Combined analysis from {} identities ({}):\n\n{}",
                parts.len(),
                names.join(", "),
                identity_summaries(&refs)
            )
        };

        scores.reasoning = match evaluator.complete_with_fallback(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("Oracle returned an empty merged analysis, concatenating");
                concatenated()
            }
            Err(e) => {
                tracing::warn!("Merging analyses failed ({}), concatenating", e);
                concatenated()
            }
        };

        Ok(EvaluationResult {
            username: names.join(" + "),
            total_commits_evaluated: total_commits,
            new_commits_count: 0,
            last_commit_sha: None,
            scores,
            commits_summary,
            incremental: false,
            chunked: false,
            chunks_processed: parts.iter().map(|(_, r)| r.chunks_processed).sum(),
            chunking_strategy: None,
            files_loaded: parts.iter().map(|(_, r)| r.files_loaded).sum(),
            strategy: strategy.id().to_string(),
            evaluated_at: Some(Utc::now()),
            reasoning_history: Vec::new(),
        })
    }

    /// Evaluate one contributor in each of `keys` and average the scores
    ///
    /// Request problems (empty author, unknown strategy, too many repositories) fail the
    /// whole call. A repository that cannot be evaluated, or where the contributor has no
    /// commits, is reported in `failed` and the rest are still compared.
    pub async fn compare_across(
        &self,
        keys: &[RepoKey],
        request: &EvaluationRequest,
    ) -> Result<ContributorComparison, EvalError> {
        let contributor = request.author.trim();
        if contributor.is_empty() {
            return Err(ValidationError::Empty("author".to_string()).into());
        }
        if keys.is_empty() {
            return Err(ValidationError::Empty("repository list".to_string()).into());
        }
        if keys.len() > MAX_COMPARED_REPOS {
            return Err(ValidationError::TooMany {
                what: "repositories".to_string(),
                max: MAX_COMPARED_REPOS,
                actual: keys.len(),
            }
            .into());
        }
        let strategy = self.registry.resolve(request.strategy.as_deref())?;

        let mut comparisons = Vec::new();
        let mut failed = Vec::new();
        for key in keys {
            match self.evaluate(key, request).await {
                Ok(Evaluation::NoCommits(_)) => failed.push(FailedRepo {
                    repository: key.to_string(),
                    reason: format!("no commits by {}", contributor),
                }),
                Ok(evaluation) => {
                    let cached = matches!(evaluation, Evaluation::UpToDate(_));
                    let result = evaluation.into_result();
                    comparisons.push(RepoComparison {
                        repository: key.to_string(),
                        scores: result.scores,
                        total_commits: result.total_commits_evaluated,
                        commits_summary: result.commits_summary,
                        cached,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to evaluate {} in {}: {}", contributor, key, e);
                    failed.push(FailedRepo {
                        repository: key.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let average_scores = Dimension::ALL
            .iter()
            .filter(|_| !comparisons.is_empty())
            .map(|&dim| {
                let sum: f64 = comparisons.iter().map(|c| c.scores.get(dim) as f64).sum();
                (dim.key().to_string(), sum / comparisons.len() as f64)
            })
            .collect();

        Ok(ContributorComparison {
            contributor: contributor.to_string(),
            strategy: strategy.id().to_string(),
            total_commits: comparisons.iter().map(|c| c.total_commits).sum(),
            comparisons,
            average_scores,
            failed,
        })
    }

    /// Drop cached evaluations of one author
    pub fn invalidate(
        &self,
        key: &RepoKey,
        author: &str,
        strategy: Option<&str>,
    ) -> Result<usize, EvalError> {
        if author.trim().is_empty() {
            return Err(ValidationError::Empty("author".to_string()).into());
        }
        self.cache.invalidate(key, author, strategy)
    }

    /// Drop every cached evaluation of a repository
    pub fn invalidate_repo(&self, key: &RepoKey) -> Result<usize, EvalError> {
        self.cache.invalidate_repo(key)
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        self.registry.list()
    }

    /// Release cached evaluators
    pub async fn shutdown(&self) {
        self.evaluators.clear().await;
    }
}
