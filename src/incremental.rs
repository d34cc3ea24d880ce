//! Incremental evaluation
//!
//! A cached evaluation is extended with the commits that landed after its boundary sha
//! instead of re-scoring the whole history. Scores are weighted by commit count, reasoning is
//! kept per cycle and rolled off after a fixed number of cycles.

use crate::config::EvaluationConfig;
use crate::merge::REASONING_SEPARATOR;
use crate::types::{CommitRecord, Dimension, EvaluationResult, ReasoningCycle, ScoreVector};
use chrono::Utc;

/// What to do for one (author, repository, strategy) evaluation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IncrementalPlan<'a> {
    /// No usable cache: evaluate the newest commits up to the initial cap
    Initial { commits: &'a [CommitRecord] },
    /// Cached boundary found: evaluate only the commits newer than it
    Incremental {
        previous: &'a EvaluationResult,
        new_commits: &'a [CommitRecord],
    },
    /// Cached boundary is the newest commit
    UpToDate { previous: &'a EvaluationResult },
    /// Cache exists but its boundary cannot be located; rebuild while keeping the count
    Rebuild {
        previous: &'a EvaluationResult,
        commits: &'a [CommitRecord],
    },
}

/// Commits strictly newer than `boundary` in a newest-first list, `None` when absent
pub fn commits_since<'a>(commits: &'a [CommitRecord], boundary: &str) -> Option<&'a [CommitRecord]> {
    commits
        .iter()
        .position(|c| c.sha == boundary)
        .map(|pos| &commits[..pos])
}

/// Per dimension `round((prev * prev_count + new * new_count) / (prev_count + new_count))`
pub fn weighted_scores(
    previous: &ScoreVector,
    previous_count: usize,
    new: &ScoreVector,
    new_count: usize,
) -> ScoreVector {
    if previous_count + new_count == 0 {
        return new.clone();
    }
    weighted_mean(&[(previous, previous_count), (new, new_count)])
}

/// Per dimension `round(sum(score * weight) / sum(weight))`, reasoning left empty
///
/// All-zero weights yield the default vector.
pub fn weighted_mean(parts: &[(&ScoreVector, usize)]) -> ScoreVector {
    let total: usize = parts.iter().map(|(_, weight)| weight).sum();
    let mut merged = ScoreVector::default();
    if total == 0 {
        return merged;
    }

    for dim in Dimension::ALL {
        let weighted: f64 = parts
            .iter()
            .map(|(scores, weight)| scores.get(dim) as f64 * *weight as f64)
            .sum();
        merged.set(dim, (weighted / total as f64).round() as i64);
    }
    merged
}

fn cycles_of(result: &EvaluationResult) -> Vec<ReasoningCycle> {
    if !result.reasoning_history.is_empty() {
        return result.reasoning_history.clone();
    }
    vec![ReasoningCycle {
        new_commits: result.new_commits_count.max(result.total_commits_evaluated),
        total_commits: result.total_commits_evaluated,
        text: result.scores.reasoning.trim().to_string(),
    }]
}

/// Render cycles newest first: the newest under "Recent Activity", older ones under
/// "Previous Assessment" with the commit total they covered
pub fn render_reasoning(cycles: &[ReasoningCycle]) -> String {
    cycles
        .iter()
        .enumerate()
        .map(|(i, cycle)| {
            if i == 0 {
                format!(
                    "**Recent Activity ({} new commits):**\n{}",
                    cycle.new_commits, cycle.text
                )
            } else {
                format!(
                    "**Previous Assessment ({} commits):**\n{}",
                    cycle.total_commits, cycle.text
                )
            }
        })
        .collect::<Vec<_>>()
        .join(REASONING_SEPARATOR)
}

#[derive(Debug, Clone, Copy)]
pub struct IncrementalMerger {
    initial_commit_cap: usize,
    reasoning_section_limit: usize,
}

impl IncrementalMerger {
    pub fn new(initial_commit_cap: usize, reasoning_section_limit: usize) -> Self {
        Self {
            initial_commit_cap: initial_commit_cap.max(1),
            reasoning_section_limit: reasoning_section_limit.max(1),
        }
    }

    pub fn from_config(config: &EvaluationConfig) -> Self {
        Self::new(config.initial_commit_cap, config.reasoning_section_limit)
    }

    pub fn initial_commit_cap(&self) -> usize {
        self.initial_commit_cap
    }

    /// Decide how to evaluate `commits` (newest first) given the cached result
    pub fn plan<'a>(
        &self,
        previous: Option<&'a EvaluationResult>,
        commits: &'a [CommitRecord],
    ) -> IncrementalPlan<'a> {
        let capped = &commits[..commits.len().min(self.initial_commit_cap)];

        let Some(previous) = previous else {
            return IncrementalPlan::Initial { commits: capped };
        };

        let boundary = previous
            .last_commit_sha
            .as_deref()
            .filter(|sha| !sha.trim().is_empty());
        let Some(boundary) = boundary else {
            tracing::warn!(
                "Cached evaluation for {} has no boundary sha, rebuilding",
                previous.username
            );
            return IncrementalPlan::Rebuild {
                previous,
                commits: capped,
            };
        };

        match commits_since(commits, boundary) {
            Some([]) => IncrementalPlan::UpToDate { previous },
            Some(new_commits) => IncrementalPlan::Incremental {
                previous,
                new_commits,
            },
            None => {
                tracing::warn!(
                    "Boundary {} of cached evaluation for {} not found in history, rebuilding",
                    boundary,
                    previous.username
                );
                IncrementalPlan::Rebuild {
                    previous,
                    commits: capped,
                }
            }
        }
    }

    /// Prepend the cycle of `fresh` to the cycles of `previous`, keeping the newest ones
    ///
    /// A cached result without history counts as a single cycle, so entries written before
    /// history was tracked keep their reasoning as one opaque section.
    pub fn merge_reasoning(
        &self,
        previous: &EvaluationResult,
        fresh: &EvaluationResult,
    ) -> Vec<ReasoningCycle> {
        let total = previous.total_commits_evaluated + fresh.total_commits_evaluated;
        let mut cycles = vec![ReasoningCycle {
            new_commits: fresh.total_commits_evaluated,
            total_commits: total,
            text: fresh.scores.reasoning.trim().to_string(),
        }];
        cycles.extend(cycles_of(previous));

        if cycles.len() > self.reasoning_section_limit {
            tracing::debug!(
                "Rolling off {} reasoning cycles for {}",
                cycles.len() - self.reasoning_section_limit,
                fresh.username
            );
            cycles.truncate(self.reasoning_section_limit);
        }
        cycles
    }

    /// Fold an evaluation of the new commits into the cached one
    pub fn merge(&self, previous: &EvaluationResult, fresh: EvaluationResult) -> EvaluationResult {
        let previous_count = previous.total_commits_evaluated;
        let new_count = fresh.total_commits_evaluated;

        let reasoning_history = self.merge_reasoning(previous, &fresh);
        let mut scores = weighted_scores(&previous.scores, previous_count, &fresh.scores, new_count);
        scores.reasoning = render_reasoning(&reasoning_history);

        tracing::info!(
            "Merged {} new commits into {} previously evaluated for {}",
            new_count,
            previous_count,
            fresh.username
        );

        EvaluationResult {
            total_commits_evaluated: previous_count + new_count,
            new_commits_count: new_count,
            last_commit_sha: fresh
                .last_commit_sha
                .clone()
                .or_else(|| previous.last_commit_sha.clone()),
            scores,
            commits_summary: previous.commits_summary.merged_with(&fresh.commits_summary),
            incremental: true,
            evaluated_at: Some(Utc::now()),
            reasoning_history,
            ..fresh
        }
    }

    /// A rebuilt evaluation never reports fewer commits than the one it replaces
    pub fn heal(&self, previous: &EvaluationResult, mut fresh: EvaluationResult) -> EvaluationResult {
        fresh.total_commits_evaluated = fresh
            .total_commits_evaluated
            .max(previous.total_commits_evaluated);
        fresh
    }
}

impl Default for IncrementalMerger {
    fn default() -> Self {
        Self::from_config(&EvaluationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommitStats, CommitsSummary};

    fn commits(n: usize) -> Vec<CommitRecord> {
        (0..n)
            .map(|i| CommitRecord {
                sha: format!("sha{}", i),
                message: format!("commit {}", i),
                author: "alice".to_string(),
                author_email: None,
                timestamp: Utc::now(),
                files: Vec::new(),
                stats: CommitStats::default(),
            })
            .collect()
    }

    fn result(count: usize, value: u8, sha: Option<&str>, reasoning: &str) -> EvaluationResult {
        EvaluationResult {
            total_commits_evaluated: count,
            new_commits_count: count,
            last_commit_sha: sha.map(str::to_string),
            scores: ScoreVector::uniform(value, reasoning),
            ..EvaluationResult::empty("alice", "balanced")
        }
    }

    #[test]
    fn test_weighted_scores() {
        let merged = weighted_scores(
            &ScoreVector::uniform(80, ""),
            10,
            &ScoreVector::uniform(40, ""),
            5,
        );
        assert_eq!(merged.ai_fullstack, 67);
        assert!(merged.iter().all(|(_, v)| v == 67));
    }

    #[test]
    fn test_forty_two_plus_eight() {
        let merger = IncrementalMerger::default();
        let mut previous = result(42, 50, Some("sha8"), "before");
        previous.scores.ai_fullstack = 72;
        let mut fresh = result(8, 50, Some("sha0"), "after");
        fresh.scores.ai_fullstack = 60;

        let merged = merger.merge(&previous, fresh);

        assert_eq!(merged.total_commits_evaluated, 50);
        assert_eq!(merged.new_commits_count, 8);
        assert_eq!(merged.scores.ai_fullstack, 70);
        assert_eq!(merged.scores.leadership, 50);
        assert_eq!(merged.last_commit_sha.as_deref(), Some("sha0"));
        assert!(merged.incremental);
    }

    #[test]
    fn test_weighted_mean_of_three() {
        let a = ScoreVector::uniform(90, "");
        let b = ScoreVector::uniform(60, "");
        let c = ScoreVector::uniform(30, "");
        // (90*1 + 60*2 + 30*1) / 4 = 60
        assert_eq!(weighted_mean(&[(&a, 1), (&b, 2), (&c, 1)]).cloud_native, 60);
        // (90*3 + 30*4) / 7 = 55.7
        assert_eq!(weighted_mean(&[(&a, 3), (&c, 4)]).leadership, 56);
        assert_eq!(weighted_mean(&[(&a, 0), (&c, 0)]), ScoreVector::default());
    }

    #[test]
    fn test_weighted_scores_zero_counts() {
        let new = ScoreVector::uniform(33, "x");
        assert_eq!(weighted_scores(&ScoreVector::uniform(90, ""), 0, &new, 0), new);
    }

    #[test]
    fn test_merge_sums_summary() {
        let merger = IncrementalMerger::default();
        let mut previous = result(3, 50, Some("a"), "");
        previous.commits_summary = CommitsSummary {
            total_additions: 10,
            total_deletions: 2,
            files_changed: 4,
            languages: vec!["py".to_string(), "rs".to_string()],
        };
        let mut fresh = result(1, 50, Some("b"), "");
        fresh.commits_summary = CommitsSummary {
            total_additions: 5,
            total_deletions: 1,
            files_changed: 1,
            languages: vec!["go".to_string(), "rs".to_string()],
        };

        let merged = merger.merge(&previous, fresh);
        assert_eq!(merged.commits_summary.total_additions, 15);
        assert_eq!(merged.commits_summary.total_deletions, 3);
        assert_eq!(merged.commits_summary.files_changed, 5);
        assert_eq!(merged.commits_summary.languages, vec!["go", "py", "rs"]);
    }

    #[test]
    fn test_reasoning_layout() {
        let merger = IncrementalMerger::default();
        let merged = merger.merge(
            &result(42, 50, Some("b"), "old view"),
            result(8, 50, Some("a"), "new view"),
        );
        assert_eq!(
            merged.scores.reasoning,
            format!(
                "**Recent Activity (8 new commits):**\nnew view{}**Previous Assessment (42 commits):**\nold view",
                REASONING_SEPARATOR
            )
        );
        assert_eq!(merged.reasoning_history.len(), 2);
        assert_eq!(merged.reasoning_history[0].total_commits, 50);
    }

    #[test]
    fn test_reasoning_rolls_off_oldest_cycles() {
        let merger = IncrementalMerger::new(150, 3);
        let mut current = result(10, 50, Some("sha0"), "initial");
        for cycle in 1..=5 {
            let fresh = result(1, 50, Some("sha0"), &format!("cycle {}", cycle));
            current = merger.merge(&current, fresh);
        }

        let texts: Vec<&str> = current
            .reasoning_history
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["cycle 5", "cycle 4", "cycle 3"]);
        assert_eq!(current.reasoning_history[1].total_commits, 14);
        assert!(current.scores.reasoning.starts_with("**Recent Activity (1 new commits):**\ncycle 5"));
        assert!(!current.scores.reasoning.contains("initial"));
    }

    #[test]
    fn test_chunked_reasoning_keeps_previous_assessment() {
        let merger = IncrementalMerger::default();

        // Six sequential chunks joined by the chunk separator, plus markdown rules
        let mut chunked = ScoreVector::uniform(60, "chunk 1\n\n---\n\nrule inside chunk 1");
        for i in 2..=6 {
            chunked = crate::merge::average_pair(
                &chunked,
                &ScoreVector::uniform(60, format!("chunk {}", i)),
            );
        }
        assert_eq!(chunked.reasoning.matches(REASONING_SEPARATOR).count(), 6);

        let mut fresh = result(90, 60, Some("new"), "");
        fresh.scores = chunked;
        let merged = merger.merge(&result(150, 50, Some("old"), "prior cycle assessment"), fresh);

        assert_eq!(merged.reasoning_history.len(), 2);
        assert!(merged.scores.reasoning.contains("**Previous Assessment (150 commits):**"));
        assert!(merged.scores.reasoning.contains("prior cycle assessment"));
        assert!(merged.scores.reasoning.contains("chunk 1"));

        // A second cycle whose text carries rules still keeps the first assessment
        let again = merger.merge(
            &merged,
            result(2, 60, Some("newer"), "fix\n\n---\n\nmore\n\n---\n\nend"),
        );
        assert_eq!(again.reasoning_history.len(), 3);
        assert!(again.scores.reasoning.contains("prior cycle assessment"));
    }

    #[test]
    fn test_plan_initial_caps_commits() {
        let merger = IncrementalMerger::new(150, 6);
        let commits = commits(200);
        match merger.plan(None, &commits) {
            IncrementalPlan::Initial { commits } => {
                assert_eq!(commits.len(), 150);
                assert_eq!(commits[0].sha, "sha0");
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_plan_incremental_and_up_to_date() {
        let merger = IncrementalMerger::default();
        let commits = commits(10);

        let previous = result(7, 60, Some("sha3"), "");
        match merger.plan(Some(&previous), &commits) {
            IncrementalPlan::Incremental { new_commits, .. } => {
                let shas: Vec<&str> = new_commits.iter().map(|c| c.sha.as_str()).collect();
                assert_eq!(shas, vec!["sha0", "sha1", "sha2"]);
            }
            other => panic!("unexpected plan: {:?}", other),
        }

        let current = result(10, 60, Some("sha0"), "");
        assert!(matches!(
            merger.plan(Some(&current), &commits),
            IncrementalPlan::UpToDate { .. }
        ));
    }

    #[test]
    fn test_plan_rebuilds_without_usable_boundary() {
        let merger = IncrementalMerger::default();
        let commits = commits(5);

        for sha in [None, Some(""), Some("rewritten")] {
            let previous = result(40, 60, sha, "");
            match merger.plan(Some(&previous), &commits) {
                IncrementalPlan::Rebuild { commits, .. } => assert_eq!(commits.len(), 5),
                other => panic!("unexpected plan for {:?}: {:?}", sha, other),
            }
        }
    }

    #[test]
    fn test_heal_keeps_count_monotone() {
        let merger = IncrementalMerger::default();
        let previous = result(40, 60, Some("gone"), "");

        let healed = merger.heal(&previous, result(5, 70, Some("sha0"), ""));
        assert_eq!(healed.total_commits_evaluated, 40);
        assert_eq!(healed.scores.leadership, 70);

        let grown = merger.heal(&previous, result(55, 70, Some("sha0"), ""));
        assert_eq!(grown.total_commits_evaluated, 55);
    }

    #[test]
    fn test_commits_since() {
        let commits = commits(4);
        assert_eq!(commits_since(&commits, "sha2").unwrap().len(), 2);
        assert!(commits_since(&commits, "sha0").unwrap().is_empty());
        assert!(commits_since(&commits, "nope").is_none());
    }
}
