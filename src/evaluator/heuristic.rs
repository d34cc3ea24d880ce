use crate::strategy::ScoringProfile;
use crate::types::{Dimension, ScoreVector};

/// Deterministic keyword-frequency scoring used when the oracle is unavailable
///
/// Each dimension scores the share of its keywords that occur anywhere in the lowercased
/// context, as a floored percentage.
pub fn heuristic_scores(context: &str, profile: &ScoringProfile) -> ScoreVector {
    let text = context.to_lowercase();
    let mut scores = ScoreVector {
        reasoning: profile.heuristic_note.clone(),
        ..ScoreVector::default()
    };

    for dim in Dimension::ALL {
        let Some(spec) = profile.dimension(dim) else {
            continue;
        };
        if spec.keywords.is_empty() {
            continue;
        }
        let hits = spec
            .keywords
            .iter()
            .filter(|kw| text.contains(kw.as_str()))
            .count();
        scores.set(dim, (hits * 100 / spec.keywords.len()) as i64);
    }

    scores
}
