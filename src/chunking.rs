//! Commit partitioning for chunked evaluation

use crate::config::ChunkingConfig;
use crate::types::CommitRecord;

/// A contiguous, ordered slice of one author's commits sent in a single oracle call
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// 1-based position
    pub index: usize,
    pub total: usize,
    pub commits: &'a [CommitRecord],
}

impl Chunk<'_> {
    /// Only the first chunk carries repository-structure context
    pub fn is_first(&self) -> bool {
        self.index == 1
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Split `commits` into contiguous chunks of at most `chunk_size`, preserving order
///
/// A `chunk_size` of 0 is treated as 1.
pub fn partition(commits: &[CommitRecord], chunk_size: usize) -> Vec<Chunk<'_>> {
    let chunk_size = chunk_size.max(1);
    let total = commits.len().div_ceil(chunk_size);

    commits
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, commits)| Chunk {
            index: i + 1,
            total,
            commits,
        })
        .collect()
}

/// Whether a commit set of this size goes through the chunked path
pub fn should_chunk(commit_count: usize, config: &ChunkingConfig) -> bool {
    config.enabled && commit_count > config.threshold
}
