use super::*;
use crate::chunking::partition;
use crate::types::{CommitRecord, CommitStats};
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn commits(n: usize) -> Vec<CommitRecord> {
    (0..n)
        .map(|i| CommitRecord {
            sha: format!("sha{:03}", i),
            message: format!("commit {}", i),
            author: "alice".to_string(),
            author_email: None,
            timestamp: Utc::now(),
            files: Vec::new(),
            stats: CommitStats::default(),
        })
        .collect()
}

/// Scores chunk `i` with `scores[i - 1]` on every dimension
struct MockScorer {
    scores: Vec<u8>,
    delays_ms: Vec<u64>,
    failing: HashSet<usize>,
    synthesis: Option<ScoreVector>,
    previous_seen: Mutex<Vec<Option<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    synthesized_order: Mutex<Vec<usize>>,
}

impl MockScorer {
    fn new(scores: Vec<u8>) -> Self {
        let delays_ms = vec![0; scores.len()];
        Self {
            scores,
            delays_ms,
            failing: HashSet::new(),
            synthesis: None,
            previous_seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            synthesized_order: Mutex::new(Vec::new()),
        }
    }

    fn with_random_delays(mut self) -> Self {
        let mut rng = rand::thread_rng();
        self.delays_ms = (0..self.scores.len())
            .map(|_| rng.gen_range(0..25))
            .collect();
        self
    }
}

#[async_trait]
impl ChunkScorer for MockScorer {
    async fn score_chunk(
        &self,
        _username: &str,
        chunk: &Chunk<'_>,
        previous: Option<&ScoreVector>,
    ) -> Result<ChunkEvaluation, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.previous_seen
            .lock()
            .unwrap()
            .push(previous.map(|p| p.leadership));

        tokio::time::sleep(Duration::from_millis(self.delays_ms[chunk.index - 1])).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&chunk.index) {
            return Err(TransportError::RequestFailed {
                target: "mock".to_string(),
                reason: format!("chunk {} failed", chunk.index),
            });
        }

        Ok(ChunkEvaluation {
            index: chunk.index,
            scores: ScoreVector::uniform(
                self.scores[chunk.index - 1],
                format!("reasoning {}", chunk.index),
            ),
            files: vec![format!("file{}.rs", chunk.index % 2)],
        })
    }

    async fn synthesize(
        &self,
        _username: &str,
        results: &[ChunkEvaluation],
    ) -> Result<ScoreVector, TransportError> {
        *self.synthesized_order.lock().unwrap() = results.iter().map(|r| r.index).collect();
        self.synthesis
            .clone()
            .ok_or_else(|| TransportError::NotConfigured("no synthesis".to_string()))
    }
}

#[test]
fn test_average_pair_rounds_half_up() {
    let previous = ScoreVector::uniform(71, "old");
    let new = ScoreVector::uniform(80, "new");
    let merged = average_pair(&previous, &new);
    assert_eq!(merged.ai_fullstack, 76);
    assert_eq!(merged.reasoning, format!("new{}old", REASONING_SEPARATOR));
}

#[test]
fn test_average_pair_skips_empty_reasoning() {
    let merged = average_pair(&ScoreVector::uniform(10, ""), &ScoreVector::uniform(20, "new"));
    assert_eq!(merged.leadership, 15);
    assert_eq!(merged.reasoning, "new");
}

#[test]
fn test_mean_fallback_floors_and_labels() {
    let results = vec![
        ChunkEvaluation {
            index: 1,
            scores: ScoreVector::uniform(50, "first"),
            files: Vec::new(),
        },
        ChunkEvaluation {
            index: 2,
            scores: ScoreVector::uniform(51, ""),
            files: Vec::new(),
        },
        ChunkEvaluation {
            index: 3,
            scores: ScoreVector::uniform(51, "third"),
            files: Vec::new(),
        },
    ];
    let merged = mean_fallback(&results);
    // 152 / 3 = 50.67
    assert_eq!(merged.cloud_native, 50);
    assert_eq!(
        merged.reasoning,
        format!("**Chunk 1:**\nfirst{}**Chunk 3:**\nthird", REASONING_SEPARATOR)
    );
}

#[test]
fn test_mean_fallback_without_reasoning() {
    let results = vec![ChunkEvaluation {
        index: 1,
        scores: ScoreVector::uniform(40, ""),
        files: Vec::new(),
    }];
    assert_eq!(mean_fallback(&results).reasoning, "Multiple chunks evaluated.");
}

#[tokio::test]
async fn test_sequential_threads_previous_vector() {
    let commits = commits(9);
    let chunks = partition(&commits, 3);
    let scorer = MockScorer::new(vec![40, 80, 60]);

    let outcome = merge_sequential(&scorer, "alice", &chunks).await.unwrap();

    // 40 -> avg(40, 80) = 60 -> avg(60, 60) = 60
    assert_eq!(outcome.scores.leadership, 60);
    assert_eq!(outcome.chunks_processed, 3);
    assert_eq!(outcome.strategy, ChunkingStrategy::Sequential);
    assert_eq!(outcome.files_loaded, 2);
    assert_eq!(
        *scorer.previous_seen.lock().unwrap(),
        vec![None, Some(40), Some(60)]
    );
    assert!(outcome.scores.reasoning.starts_with("reasoning 3"));
}

#[tokio::test]
async fn test_sequential_stops_on_first_failure() {
    let commits = commits(9);
    let chunks = partition(&commits, 3);
    let mut scorer = MockScorer::new(vec![40, 80, 60]);
    scorer.failing.insert(2);

    let err = merge_sequential(&scorer, "alice", &chunks).await.unwrap_err();
    assert!(err.to_string().contains("chunk 2 failed"));
    assert_eq!(scorer.previous_seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_parallel_synthesis_sees_index_order_under_random_completion() {
    let commits = commits(40);
    let chunks = partition(&commits, 5);
    let scores: Vec<u8> = (1..=8).map(|i| i * 10).collect();

    for _ in 0..5 {
        let mut scorer = MockScorer::new(scores.clone()).with_random_delays();
        scorer.synthesis = Some(ScoreVector::uniform(77, "synthesized"));

        let outcome = merge_parallel(&scorer, "alice", &chunks, 3).await.unwrap();

        assert_eq!(outcome.scores.ai_architecture, 77);
        assert_eq!(outcome.chunks_processed, 8);
        assert_eq!(outcome.strategy, ChunkingStrategy::Parallel);
        assert_eq!(
            *scorer.synthesized_order.lock().unwrap(),
            (1..=8).collect::<Vec<_>>()
        );
        assert!(scorer.previous_seen.lock().unwrap().iter().all(Option::is_none));
        assert!(scorer.max_in_flight.load(Ordering::SeqCst) <= 3);
    }
}

#[tokio::test]
async fn test_parallel_falls_back_to_mean_when_synthesis_fails() {
    let commits = commits(6);
    let chunks = partition(&commits, 2);
    let scorer = MockScorer::new(vec![30, 60, 91]).with_random_delays();

    let outcome = merge_parallel(&scorer, "alice", &chunks, 2).await.unwrap();

    // 181 / 3 = 60.33
    assert_eq!(outcome.scores.open_source, 60);
    assert!(outcome.scores.reasoning.starts_with("**Chunk 1:**\nreasoning 1"));
    assert!(outcome.scores.reasoning.ends_with("**Chunk 3:**\nreasoning 3"));
}

#[tokio::test]
async fn test_parallel_surfaces_lowest_index_failure() {
    let commits = commits(20);
    let chunks = partition(&commits, 5);
    let mut scorer = MockScorer::new(vec![10, 20, 30, 40]);
    scorer.failing = HashSet::from([2, 4]);
    // chunk 4 fails first, chunk 2 last
    scorer.delays_ms = vec![0, 30, 0, 0];

    let err = merge_parallel(&scorer, "alice", &chunks, 4).await.unwrap_err();

    assert!(err.to_string().contains("chunk 2 failed"));
    assert_eq!(scorer.previous_seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_parallel_single_chunk_skips_synthesis() {
    let commits = commits(3);
    let chunks = partition(&commits, 5);
    let scorer = MockScorer::new(vec![66]);

    let outcome = merge_parallel(&scorer, "alice", &chunks, 3).await.unwrap();

    assert_eq!(outcome.scores.intelligent_dev, 66);
    assert!(scorer.synthesized_order.lock().unwrap().is_empty());
}
