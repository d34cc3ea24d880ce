//! # commit-eval - Incremental capability scoring of commit history
//!
//! Scores an engineer's commits on six fixed capability dimensions (0-100 each) using an
//! external text-completion service as the scoring oracle.
//!
//! ## Overview
//!
//! Commits are synced from a commit source into local storage once. An author's history is
//! then scored in bounded chunks, merged, and cached per (repository, author, strategy), so
//! later evaluations only pay for commits that landed since the cached boundary.
//!
//! ## Key Features
//!
//! - **Incremental Sync**: Boundary-sha tracking with atomic state writes; failed cycles are safe to retry
//! - **Chunked Evaluation**: Sequential accumulation or parallel scoring with a synthesis pass
//! - **Incremental Scoring**: Commit-count weighted merge of cached and new scores
//! - **Model Fallback**: Ordered model chain, optional offline keyword heuristic
//! - **Pluggable Strategies**: Scoring strategies registered at startup and selected per request
//!
//! ## Architecture
//!
//! ```text
//! CommitSource ──► SyncTracker ──► RepoStore (data/{platform}/{owner}/{repo})
//!                                      │
//!                                      ▼
//!               EvalClient ──► ChunkEvaluator ──► ScoringOracle
//!                   │               │
//!                   │          partition + merge
//!                   ▼
//!        IncrementalMerger ──► EvalCache (evaluations/{platform}/{owner}/{repo})
//! ```
//!
//! ## Modules
//!
//! - [`client`]: High-level sync/evaluate/invalidate API
//! - [`sync`]: Sync state tracking against a commit source
//! - [`git`]: Commit sources (local git via git2) and payload normalization
//! - [`store`]: Per-repository persisted commits, files and structure
//! - [`chunking`]: Commit partitioning
//! - [`evaluator`]: Prompt assembly, oracle calls, response parsing
//! - [`merge`]: Sequential and parallel chunk merging
//! - [`incremental`]: Weighted merge of cached and new evaluations
//! - [`eval_cache`]: Persisted evaluation results
//! - [`strategy`]: Scoring strategies and their registry
//! - [`oracle`]: Scoring oracle abstraction and HTTP client
//! - [`config`]: Configuration management with environment variable support
//! - [`types`]: Shared domain types
//! - [`error`]: Error types
//! - [`paths`]: Platform paths and path sanitizing
//!
//! ## Usage Example
//!
//! ```no_run
//! use commit_eval::client::{EvalClient, EvaluationRequest};
//! use commit_eval::git::LocalGitSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = EvalClient::new()?;
//!     let source = LocalGitSource::discover(".")?;
//!     let key = source.repo_key();
//!
//!     client.sync(&source, &key).await?;
//!     let evaluation = client
//!         .evaluate(&key, &EvaluationRequest::new("alice"))
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&evaluation)?);
//!
//!     Ok(())
//! }
//! ```

/// Commit partitioning for chunked evaluation
pub mod chunking;

/// High-level client API
pub mod client;

/// Configuration management with environment variable overrides
pub mod config;

/// Error types and utilities
pub mod error;

/// Persisted evaluation results
pub mod eval_cache;

/// Chunk evaluation against the scoring oracle
pub mod evaluator;

/// Commit sources and payload normalization
pub mod git;

/// Incremental evaluation merging
pub mod incremental;

/// Sequential and parallel chunk merging
pub mod merge;

/// Scoring oracle abstraction
pub mod oracle;

/// Platform paths and path sanitizing
pub mod paths;

/// Per-repository persisted commit data
pub mod store;

/// Scoring strategies
pub mod strategy;

/// Sync state tracking
pub mod sync;

/// Shared domain types
pub mod types;

pub use client::{EvalClient, Evaluation, EvaluationRequest};
pub use config::Config;
pub use error::EvalError;
pub use types::{EvaluationResult, ScoreVector};
