use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Identifies one repository on one hosting platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey {
    /// Hosting platform (e.g. "github", "gitee", "local")
    pub platform: String,
    /// Repository owner or organisation
    pub owner: String,
    /// Repository name
    pub repo: String,
}

impl RepoKey {
    pub fn new(
        platform: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.owner, self.repo)
    }
}

/// Normalize an author identity for matching and cache namespacing
pub fn normalize_author(author: &str) -> String {
    author.trim().to_lowercase()
}

/// One changed file inside a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path of the file after the change
    pub filename: String,
    /// Change kind ("added", "modified", "removed", "renamed", ...)
    #[serde(default = "default_file_status")]
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    /// Unified diff for this file, absent for binary files
    #[serde(default)]
    pub patch: Option<String>,
}

fn default_file_status() -> String {
    "modified".to_string()
}

/// Aggregate line statistics for a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: u64,
    pub deletions: u64,
}

/// Canonical commit shape. Every commit source normalizes into this once; nothing
/// downstream ever sees a platform-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Full commit SHA
    pub sha: String,
    /// Full commit message
    pub message: String,
    /// Author display name
    pub author: String,
    #[serde(default)]
    pub author_email: Option<String>,
    /// Author timestamp
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub stats: CommitStats,
}

impl CommitRecord {
    /// First line of the commit message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// One entry of a remote commit list page (newest-first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub author: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
}

/// The six fixed capability dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dimension {
    AiFullstack,
    AiArchitecture,
    CloudNative,
    OpenSource,
    IntelligentDev,
    Leadership,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::AiFullstack,
        Dimension::AiArchitecture,
        Dimension::CloudNative,
        Dimension::OpenSource,
        Dimension::IntelligentDev,
        Dimension::Leadership,
    ];

    /// Stable wire key
    pub fn key(self) -> &'static str {
        match self {
            Dimension::AiFullstack => "ai_fullstack",
            Dimension::AiArchitecture => "ai_architecture",
            Dimension::CloudNative => "cloud_native",
            Dimension::OpenSource => "open_source",
            Dimension::IntelligentDev => "intelligent_dev",
            Dimension::Leadership => "leadership",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Six dimension scores (0-100) plus free-text rationale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreVector {
    #[serde(default)]
    pub ai_fullstack: u8,
    #[serde(default)]
    pub ai_architecture: u8,
    #[serde(default)]
    pub cloud_native: u8,
    #[serde(default)]
    pub open_source: u8,
    #[serde(default)]
    pub intelligent_dev: u8,
    #[serde(default)]
    pub leadership: u8,
    #[serde(default)]
    pub reasoning: String,
}

impl ScoreVector {
    /// Every dimension set to the same value
    pub fn uniform(value: u8, reasoning: impl Into<String>) -> Self {
        let mut scores = Self {
            reasoning: reasoning.into(),
            ..Self::default()
        };
        for dim in Dimension::ALL {
            scores.set(dim, value as i64);
        }
        scores
    }

    /// Neutral vector used when an oracle response cannot be parsed
    pub fn neutral(reasoning: impl Into<String>) -> Self {
        Self::uniform(50, reasoning)
    }

    pub fn get(&self, dim: Dimension) -> u8 {
        match dim {
            Dimension::AiFullstack => self.ai_fullstack,
            Dimension::AiArchitecture => self.ai_architecture,
            Dimension::CloudNative => self.cloud_native,
            Dimension::OpenSource => self.open_source,
            Dimension::IntelligentDev => self.intelligent_dev,
            Dimension::Leadership => self.leadership,
        }
    }

    /// Set a dimension, clamping into 0..=100
    pub fn set(&mut self, dim: Dimension, value: i64) {
        let value = value.clamp(0, 100) as u8;
        match dim {
            Dimension::AiFullstack => self.ai_fullstack = value,
            Dimension::AiArchitecture => self.ai_architecture = value,
            Dimension::CloudNative => self.cloud_native = value,
            Dimension::OpenSource => self.open_source = value,
            Dimension::IntelligentDev => self.intelligent_dev = value,
            Dimension::Leadership => self.leadership = value,
        }
    }

    /// Iterate `(dimension, score)` in fixed order
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u8)> + '_ {
        Dimension::ALL.into_iter().map(move |dim| (dim, self.get(dim)))
    }
}

/// Aggregate statistics over the commits behind an evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitsSummary {
    pub total_additions: u64,
    pub total_deletions: u64,
    /// Distinct files touched
    pub files_changed: usize,
    /// Distinct file extensions touched, sorted
    pub languages: Vec<String>,
}

impl CommitsSummary {
    pub fn from_commits(commits: &[CommitRecord]) -> Self {
        let mut files = BTreeSet::new();
        let mut languages = BTreeSet::new();
        let mut total_additions = 0;
        let mut total_deletions = 0;

        for commit in commits {
            total_additions += commit.stats.additions;
            total_deletions += commit.stats.deletions;
            for file in &commit.files {
                if file.filename.is_empty() {
                    continue;
                }
                if let Some(ext) = Path::new(&file.filename)
                    .extension()
                    .and_then(|e| e.to_str())
                {
                    languages.insert(ext.to_lowercase());
                }
                files.insert(file.filename.as_str());
            }
        }

        Self {
            total_additions,
            total_deletions,
            files_changed: files.len(),
            languages: languages.into_iter().collect(),
        }
    }

    /// Combine two summaries: sums for counts, union for languages
    pub fn merged_with(&self, other: &CommitsSummary) -> Self {
        let languages: BTreeSet<String> = self
            .languages
            .iter()
            .chain(other.languages.iter())
            .cloned()
            .collect();

        Self {
            total_additions: self.total_additions + other.total_additions,
            total_deletions: self.total_deletions + other.total_deletions,
            files_changed: self.files_changed + other.files_changed,
            languages: languages.into_iter().collect(),
        }
    }
}

/// How multiple chunk vectors were combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    Sequential,
    Parallel,
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkingStrategy::Sequential => f.write_str("sequential"),
            ChunkingStrategy::Parallel => f.write_str("parallel"),
        }
    }
}

/// Reasoning contributed by one evaluation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningCycle {
    /// Commits scored in this cycle
    pub new_commits: usize,
    /// Commits covered by the evaluation once this cycle was folded in
    pub total_commits: usize,
    pub text: String,
}

/// Stable evaluation result contract, also the persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub username: String,
    #[serde(default)]
    pub total_commits_evaluated: usize,
    #[serde(default)]
    pub new_commits_count: usize,
    /// Evaluation boundary; independent of the sync boundary
    #[serde(default)]
    pub last_commit_sha: Option<String>,
    #[serde(default)]
    pub scores: ScoreVector,
    #[serde(default)]
    pub commits_summary: CommitsSummary,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub chunks_processed: usize,
    #[serde(default)]
    pub chunking_strategy: Option<ChunkingStrategy>,
    #[serde(default)]
    pub files_loaded: usize,
    /// Scoring strategy id that produced the scores
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub evaluated_at: Option<DateTime<Utc>>,
    /// Per-cycle reasoning, newest first; `scores.reasoning` is rendered from it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_history: Vec<ReasoningCycle>,
}

impl EvaluationResult {
    /// Canonical result for an author with no matching commits
    pub fn empty(username: &str, strategy: &str) -> Self {
        Self {
            username: username.to_string(),
            total_commits_evaluated: 0,
            new_commits_count: 0,
            last_commit_sha: None,
            scores: ScoreVector::uniform(0, "No commits found for this author."),
            commits_summary: CommitsSummary::default(),
            incremental: false,
            chunked: false,
            chunks_processed: 0,
            chunking_strategy: None,
            files_loaded: 0,
            strategy: strategy.to_string(),
            evaluated_at: Some(Utc::now()),
            reasoning_history: Vec::new(),
        }
    }
}
