//! Chunk merging
//!
//! Two ways of turning per-chunk score vectors into one:
//!
//! - **Sequential**: chunks run in order, each call sees the accumulated vector so far, and
//!   the accumulator averages each dimension pairwise.
//! - **Parallel**: chunks run concurrently without cross-chunk context, then one synthesis
//!   call consolidates them. A failed synthesis falls back to a plain per-dimension mean.
//!
//! Both paths feed results to the merge in chunk-index order regardless of completion order.

use crate::chunking::Chunk;
use crate::error::TransportError;
use crate::types::{ChunkingStrategy, Dimension, ScoreVector};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Separator between reasoning sections
pub const REASONING_SEPARATOR: &str = "\n\n---\n\n";

const MEAN_FALLBACK_REASONING: &str = "Multiple chunks evaluated.";

/// Score vector produced for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEvaluation {
    /// 1-based chunk index
    pub index: usize,
    pub scores: ScoreVector,
    /// Repository files whose contents went into the prompt
    pub files: Vec<String>,
}

/// Scores individual chunks and consolidates independent results
#[async_trait]
pub trait ChunkScorer: Send + Sync {
    async fn score_chunk(
        &self,
        username: &str,
        chunk: &Chunk<'_>,
        previous: Option<&ScoreVector>,
    ) -> Result<ChunkEvaluation, TransportError>;

    /// One oracle call merging `results` (sorted by index) into a single vector
    async fn synthesize(
        &self,
        username: &str,
        results: &[ChunkEvaluation],
    ) -> Result<ScoreVector, TransportError>;
}

/// Merged scores plus bookkeeping for the evaluation result
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub scores: ScoreVector,
    pub chunks_processed: usize,
    /// Distinct repository files loaded across all chunks
    pub files_loaded: usize,
    pub strategy: ChunkingStrategy,
}

fn join_reasoning<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join(REASONING_SEPARATOR)
}

/// Pairwise `round((prev + new) / 2)` per dimension, reasoning newest first
pub fn average_pair(previous: &ScoreVector, new: &ScoreVector) -> ScoreVector {
    let mut merged = ScoreVector {
        reasoning: join_reasoning([new.reasoning.as_str(), previous.reasoning.as_str()]),
        ..ScoreVector::default()
    };
    for dim in Dimension::ALL {
        let sum = previous.get(dim) as f64 + new.get(dim) as f64;
        merged.set(dim, (sum / 2.0).round() as i64);
    }
    merged
}

/// Floored per-dimension mean, reasoning labelled by chunk index
pub fn mean_fallback(results: &[ChunkEvaluation]) -> ScoreVector {
    if results.is_empty() {
        return ScoreVector::default();
    }

    let mut merged = ScoreVector::default();
    for dim in Dimension::ALL {
        let sum: u64 = results.iter().map(|r| r.scores.get(dim) as u64).sum();
        merged.set(dim, (sum / results.len() as u64) as i64);
    }

    let labelled: Vec<String> = results
        .iter()
        .filter(|r| !r.scores.reasoning.trim().is_empty())
        .map(|r| format!("**Chunk {}:**\n{}", r.index, r.scores.reasoning))
        .collect();
    merged.reasoning = if labelled.is_empty() {
        MEAN_FALLBACK_REASONING.to_string()
    } else {
        labelled.join(REASONING_SEPARATOR)
    };

    merged
}

fn distinct_files<'a>(results: impl IntoIterator<Item = &'a ChunkEvaluation>) -> usize {
    results
        .into_iter()
        .flat_map(|r| r.files.iter())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Evaluate chunks in order, threading the accumulated vector into each call
pub async fn merge_sequential<S: ChunkScorer + ?Sized>(
    scorer: &S,
    username: &str,
    chunks: &[Chunk<'_>],
) -> Result<MergeOutcome, TransportError> {
    let mut accumulated: Option<ScoreVector> = None;
    let mut evaluations = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        info!(
            "Sequential chunk {}/{} ({} commits)",
            chunk.index,
            chunk.total,
            chunk.len()
        );
        let evaluation = scorer
            .score_chunk(username, chunk, accumulated.as_ref())
            .await?;

        accumulated = Some(match accumulated {
            None => evaluation.scores.clone(),
            Some(previous) => average_pair(&previous, &evaluation.scores),
        });
        evaluations.push(evaluation);
    }

    Ok(MergeOutcome {
        scores: accumulated.unwrap_or_default(),
        chunks_processed: evaluations.len(),
        files_loaded: distinct_files(&evaluations),
        strategy: ChunkingStrategy::Sequential,
    })
}

/// Evaluate chunks concurrently on at most `workers` in-flight calls, then synthesize
///
/// A failing chunk does not cancel its siblings; once all chunks finished, the error of the
/// lowest-index failure is returned.
pub async fn merge_parallel<S: ChunkScorer + ?Sized>(
    scorer: &S,
    username: &str,
    chunks: &[Chunk<'_>],
    workers: usize,
) -> Result<MergeOutcome, TransportError> {
    let workers = workers.max(1);
    info!(
        "Evaluating {} chunks in parallel ({} workers)",
        chunks.len(),
        workers
    );

    let mut completed: Vec<(usize, Result<ChunkEvaluation, TransportError>)> =
        stream::iter(chunks.iter())
            .map(|chunk| async move {
                let result = scorer.score_chunk(username, chunk, None).await;
                debug!("Chunk {}/{} finished", chunk.index, chunk.total);
                (chunk.index, result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;
    completed.sort_by_key(|(index, _)| *index);

    let mut evaluations = Vec::with_capacity(completed.len());
    for (index, result) in completed {
        match result {
            Ok(evaluation) => evaluations.push(evaluation),
            Err(e) => {
                warn!("Chunk {} failed: {}", index, e);
                return Err(e);
            }
        }
    }

    let scores = match evaluations.as_slice() {
        [] => ScoreVector::default(),
        [single] => single.scores.clone(),
        _ => match scorer.synthesize(username, &evaluations).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Synthesis failed ({}), falling back to mean of chunk scores", e);
                mean_fallback(&evaluations)
            }
        },
    };

    Ok(MergeOutcome {
        scores,
        chunks_processed: evaluations.len(),
        files_loaded: distinct_files(&evaluations),
        strategy: ChunkingStrategy::Parallel,
    })
}

#[cfg(test)]
mod tests;
