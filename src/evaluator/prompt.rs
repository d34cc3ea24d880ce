//! Prompt assembly
//!
//! Every section of the context has its own bound so one oversized commit, file or
//! previous evaluation cannot crowd out the rest; the assembled context is then cut to the
//! token budget left after the fixed template.

use crate::merge::ChunkEvaluation;
use crate::strategy::ScoringProfile;
use crate::types::{CommitRecord, Dimension, EvaluationResult, ScoreVector};
use std::borrow::Cow;

/// Tokens reserved for the fixed instruction template
pub const PROMPT_TEMPLATE_TOKENS: usize = 900;
/// Estimated characters per token
pub const CHARS_PER_TOKEN: usize = 4;

pub const MAX_COMMITS: usize = 50;
pub const SUBJECT_CHARS: usize = 160;
pub const MAX_FILES_PER_COMMIT: usize = 30;
pub const PATCH_CHARS: usize = 4000;
pub const MAX_CONTEXT_FILES: usize = 25;
pub const FILE_CHARS: usize = 12000;
pub const STRUCTURE_CHARS: usize = 8000;
pub const PREVIOUS_CHARS: usize = 12000;
const RUBRIC_CHARS: usize = 6000;

const CONTEXT_TRUNCATED_MARKER: &str = "\n\n[... Context truncated ...]";

/// Prefix of at most `max_chars` characters, always on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Cut `context` to roughly `max_tokens` estimated tokens
pub fn truncate_context(context: &str, max_tokens: usize) -> Cow<'_, str> {
    if estimate_tokens(context) <= max_tokens {
        return Cow::Borrowed(context);
    }
    let mut truncated = truncate_chars(context, max_tokens * CHARS_PER_TOKEN).to_string();
    truncated.push_str(CONTEXT_TRUNCATED_MARKER);
    Cow::Owned(truncated)
}

/// Inputs for one evaluation context
#[derive(Debug, Clone, Copy)]
pub struct ContextParts<'a> {
    pub username: &'a str,
    pub commits: &'a [CommitRecord],
    /// Referenced repository files, `(path, content)` in first-seen order
    pub files: &'a [(String, String)],
    pub structure: Option<&'a serde_json::Value>,
    /// Accumulated vector carried between sequential chunks
    pub previous: Option<&'a ScoreVector>,
    /// `(index, total)` for chunked calls
    pub chunk: Option<(usize, usize)>,
}

/// Assemble the data section of an evaluation prompt
pub fn build_context(parts: &ContextParts<'_>) -> String {
    let mut context = String::new();

    if let Some((index, total)) = parts.chunk {
        context.push_str(&format!("CHUNK {}/{}\n\n", index, total));
    }

    if let Some(previous) = parts.previous {
        let json = serde_json::to_string(previous).unwrap_or_default();
        context.push_str("PREVIOUS EVALUATION (scores+reasoning):\n");
        context.push_str(truncate_chars(&json, PREVIOUS_CHARS));
        context.push_str("\n\n");
    }

    context.push_str(&format!("User: {}\n", parts.username));
    context.push_str(&format!("Commits: {}\n\n", parts.commits.len()));

    if let Some(structure) = parts.structure {
        let json = serde_json::to_string(structure).unwrap_or_default();
        context.push_str("REPO STRUCTURE (truncated):\n");
        context.push_str(truncate_chars(&json, STRUCTURE_CHARS));
        context.push_str("\n\n");
    }

    if !parts.files.is_empty() {
        context.push_str("RELEVANT FILE CONTENTS:\n");
        for (path, content) in parts.files.iter().take(MAX_CONTEXT_FILES) {
            context.push_str(&format!("\n--- FILE: {} ---\n", path));
            context.push_str(truncate_chars(content, FILE_CHARS));
            context.push('\n');
        }
        context.push('\n');
    }

    context.push_str("COMMITS:\n");
    for commit in parts.commits.iter().take(MAX_COMMITS) {
        context.push_str(&format!(
            "\n- {} {}\n",
            commit.sha,
            truncate_chars(commit.subject(), SUBJECT_CHARS)
        ));
        for file in commit.files.iter().take(MAX_FILES_PER_COMMIT) {
            context.push_str("  * ");
            context.push_str(&file.filename);
            context.push('\n');
            if let Some(patch) = &file.patch {
                context.push_str(truncate_chars(patch, PATCH_CHARS));
                context.push('\n');
            }
        }
    }

    context
}

/// Wrap a context in the scoring instructions for `profile`
pub fn build_evaluation_prompt(
    context: &str,
    username: &str,
    profile: &ScoringProfile,
    chunked: bool,
    max_input_tokens: usize,
) -> String {
    let max_context_tokens = max_input_tokens.saturating_sub(PROMPT_TEMPLATE_TOKENS).max(1);
    let context = truncate_context(context, max_context_tokens);

    let mut prompt = format!(
        "You are an expert engineering evaluator. Analyze data from user \"{}\" and score each dimension 0-100.",
        username
    );
    prompt.push_str("\nNOTE: You may see both commit diffs AND file contents. Use file contents when helpful.");

    if chunked {
        prompt.push_str(
            "\nCHUNKED: Revise the previous assessment by incorporating new evidence. Provide ONE \
             consolidated reasoning with updated Key Strengths, Areas for Growth, and Overall \
             Assessment sections (do not repeat sections).",
        );
    }

    if let Some(rubric) = &profile.rubric {
        prompt.push_str("\n\nRUBRIC / STANDARD:\n");
        prompt.push_str(truncate_chars(rubric, RUBRIC_CHARS));
        if rubric.chars().count() > RUBRIC_CHARS {
            prompt.push_str("\n...[rubric truncated]...");
        }
        prompt.push('\n');
    }

    prompt.push_str("\n\nDATA:\n");
    prompt.push_str(&context);

    prompt.push_str("\n\nDIMENSIONS:\n");
    for (i, dim) in Dimension::ALL.iter().enumerate() {
        let (title, instruction) = profile
            .dimension(*dim)
            .map(|s| (s.title.as_str(), s.instruction.trim()))
            .unwrap_or((dim.key(), ""));
        if instruction.is_empty() {
            prompt.push_str(&format!("{}. **{} ({})**\n", i + 1, title, dim.key()));
        } else {
            prompt.push_str(&format!(
                "{}. **{} ({})**: {}\n",
                i + 1,
                title,
                dim.key(),
                instruction
            ));
        }
    }

    prompt.push_str("\nReturn ONLY valid JSON:\n{\n");
    for dim in Dimension::ALL {
        prompt.push_str(&format!("  \"{}\": <0-100>,\n", dim.key()));
    }
    prompt.push_str(
        "  \"reasoning\": \"Use the rubric. Provide sections with **Key Strengths**, \
         **Areas for Growth**, **Overall Assessment**.\"\n}",
    );

    prompt
}

/// Context asking the oracle to consolidate independent chunk evaluations
pub fn build_synthesis_context(results: &[ChunkEvaluation], username: &str) -> String {
    let chunks_text = results
        .iter()
        .map(|r| {
            format!(
                "Chunk {}: {}",
                r.index,
                serde_json::to_string_pretty(&r.scores).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Below are {} independent evaluations for user \"{}\".\n\n\
         Synthesize all evaluations into a unified final assessment:\n\
         1. For numeric scores: Consider overall trends across all evaluations, provide reasonable \
         consolidated scores (not simple averaging)\n\
         2. For reasoning: Integrate key findings from all evaluations, provide complete **Key \
         Strengths**, **Areas for Growth**, **Overall Assessment** sections\n\n\
         Evaluation Results:\n{}\n\nReturn the same JSON format as before.",
        results.len(),
        username,
        chunks_text
    )
}

/// Per-identity reasoning blocks with commit counts and weight shares
pub fn identity_summaries(parts: &[(usize, &EvaluationResult)]) -> String {
    let total: usize = parts.iter().map(|(weight, _)| weight).sum();
    parts
        .iter()
        .map(|(weight, result)| {
            let share = if total == 0 {
                0.0
            } else {
                *weight as f64 * 100.0 / total as f64
            };
            format!(
                "### {} ({} commits, {:.1}% weight):\n{}\n",
                result.username,
                weight,
                share,
                truncate_chars(result.scores.reasoning.trim(), PREVIOUS_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Free-text prompt folding several identities' analyses into one narrative
pub fn build_identity_merge_prompt(
    parts: &[(usize, &EvaluationResult)],
    merged: &ScoreVector,
    total_commits: usize,
    profile: &ScoringProfile,
) -> String {
    let scores = Dimension::ALL
        .iter()
        .map(|&dim| {
            let title = profile
                .dimension(dim)
                .map(|spec| spec.title.as_str())
                .unwrap_or(dim.key());
            format!("- {}: {}/100", title, merged.get(dim))
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are analyzing a software engineer who uses multiple names/identities in their \
         commits. You have separate evaluations for each identity, and you need to create a \
         unified, comprehensive analysis.\n\n\
         Below are the individual analyses with their weights (based on commit count):\n\n\
         {}\n\
         Total commits: {}\n\
         Weighted average scores:\n{}\n\n\
         Create a unified analysis that:\n\
         1. Synthesizes insights from all identities\n\
         2. Gives more weight to analyses with higher commit counts\n\
         3. Identifies common patterns and themes across all identities\n\
         4. Presents a coherent narrative about this engineer's capabilities\n\
         5. Maintains a professional, objective tone\n\n\
         Write the unified analysis (3-5 paragraphs):",
        identity_summaries(parts),
        total_commits,
        scores
    )
}
