//! Scoring strategies
//!
//! A strategy decides how the six dimensions are described to the oracle (titles,
//! per-dimension guidance, an optional rubric) and which keywords the offline heuristic looks
//! for. Strategies are registered once at startup in a [`StrategyRegistry`]; the
//! `evaluation.enabled_strategies` / `evaluation.default_strategy` config entries decide which
//! ids requests may use.

use crate::config::EvaluationConfig;
use crate::error::{EvalError, StrategyError};
use crate::evaluator::{ChunkEvaluator, EvaluatorContext};
use crate::types::Dimension;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How one dimension is presented to the oracle and the heuristic
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionSpec {
    pub title: String,
    pub instruction: String,
    /// Lowercase substrings counted by the keyword heuristic
    pub keywords: Vec<String>,
}

/// Everything a strategy contributes to an evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringProfile {
    pub strategy_id: String,
    pub dimensions: BTreeMap<Dimension, DimensionSpec>,
    pub rubric: Option<String>,
    /// Reasoning attached to heuristic scores
    pub heuristic_note: String,
}

impl ScoringProfile {
    pub fn dimension(&self, dim: Dimension) -> Option<&DimensionSpec> {
        self.dimensions.get(&dim)
    }
}

fn spec(title: &str, instruction: &str, keywords: &[&str]) -> DimensionSpec {
    DimensionSpec {
        title: title.to_string(),
        instruction: instruction.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

/// A pluggable scoring strategy
pub trait ScoringStrategy: Send + Sync {
    /// Stable id used in cache keys and requests
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn profile(&self) -> ScoringProfile;

    /// Build an evaluator bound to one repository
    fn create_evaluator(&self, ctx: EvaluatorContext) -> ChunkEvaluator {
        ChunkEvaluator::new(ctx, self.profile())
    }
}

/// Default dimension descriptions
pub struct BalancedStrategy;

impl ScoringStrategy for BalancedStrategy {
    fn id(&self) -> &str {
        "balanced"
    }

    fn description(&self) -> &str {
        "Six capability dimensions with neutral, general-purpose guidance"
    }

    fn profile(&self) -> ScoringProfile {
        let dimensions = BTreeMap::from([
            (
                Dimension::AiFullstack,
                spec(
                    "AI Model Full-Stack Development",
                    "Assess AI/ML model development, training, optimization, deployment.",
                    &["model", "training", "tensorflow", "pytorch", "neural", "ml", "ai", "inference"],
                ),
            ),
            (
                Dimension::AiArchitecture,
                spec(
                    "AI Native Architecture Design",
                    "Evaluate AI-first system design, API design, microservices.",
                    &["api", "architecture", "design", "service", "endpoint", "microservice", "schema"],
                ),
            ),
            (
                Dimension::CloudNative,
                spec(
                    "Cloud Native Engineering",
                    "Assess containerization, IaC, CI/CD, deployment automation.",
                    &["docker", "kubernetes", "k8s", "ci/cd", "deploy", "container", "cloud", "terraform"],
                ),
            ),
            (
                Dimension::OpenSource,
                spec(
                    "Open Source Collaboration",
                    "Evaluate collaboration quality, communication, refactoring, bug fixes.",
                    &["fix", "issue", "pr", "review", "merge", "refactor", "improve", "doc"],
                ),
            ),
            (
                Dimension::IntelligentDev,
                spec(
                    "Intelligent Development",
                    "Assess automation, tooling, testing, linting/formatting.",
                    &["test", "unit", "integration", "auto", "script", "tool", "lint", "format", "cli"],
                ),
            ),
            (
                Dimension::Leadership,
                spec(
                    "Engineering Leadership",
                    "Evaluate technical decision-making, performance/security, best practices.",
                    &["optimize", "performance", "security", "best practice", "pattern", "migration"],
                ),
            ),
        ]);

        ScoringProfile {
            strategy_id: self.id().to_string(),
            dimensions,
            rubric: None,
            heuristic_note: "**Note:** Scoring service unavailable; scores come from keyword frequency \
                             in the commit context and are rough indicators only."
                .to_string(),
        }
    }
}

const AI_NATIVE_RUBRIC: &str = "\
You are evaluating an engineer in the AI-assisted coding era. Distinguish a copy-paste operator from a system builder.
Use L1-L5 behavioral profiles as guidance:
- L1: blind copy/paste, cannot explain, low-level errors, no quality gates
- L2: can deliver happy-path, basic norms, basic tests/lint, but shallow system thinking
- L3: one-person full-stack MVP builder, can refactor AI code, stronger type discipline, edge cases
- L4: team anchor, introduces quality gates, defensive validation, CI, docs, cost/ops thinking
- L5: leader/maintainer, defines patterns/standards, affects ecosystem, deep architecture decisions

Evidence to look for (prefer repo artifacts over claims):
- Spec/quality: refactors, modularity, input validation, tests (unit/integration/property), lint/format, CI
- Reproducibility: dependency locks, one-command run, docker/compose/devcontainer
- Cloud-native: containerization, IaC, deployment configs, resource limits, automation
- AI engineering: agent/tooling, structured prompts, tool abstractions, traces/logs, eval datasets
- Professionalism: docs/ADR, meaningful commits/PRs, careful tradeoffs, security/perf considerations

Scoring mapping: for each dimension, map observed evidence to a rough L1-L5 and convert to 0-100
(L1 10-30, L2 30-50, L3 50-70, L4 70-85, L5 85-100). Be conservative when evidence is missing.";

/// Rubric-biased strategy favouring built-in quality and reproducibility evidence
pub struct AiNative2026Strategy;

impl ScoringStrategy for AiNative2026Strategy {
    fn id(&self) -> &str {
        "ai_native_2026"
    }

    fn description(&self) -> &str {
        "L1-L5 rubric emphasising built-in quality, reproducibility and agent tooling"
    }

    fn profile(&self) -> ScoringProfile {
        let dimensions = BTreeMap::from([
            (
                Dimension::AiFullstack,
                spec(
                    "Practical Delivery & Built-in Quality",
                    "Evidence: refactors, type discipline, edge-case handling, tests, reliable delivery.",
                    &["refactor", "test", "lint", "type", "validation", "error", "edge", "bugfix"],
                ),
            ),
            (
                Dimension::AiArchitecture,
                spec(
                    "Architecture Evolution & Trade-offs",
                    "Evidence: modular boundaries, APIs, ADR/docs, migration strategy, trade-offs.",
                    &["architecture", "adr", "design", "interface", "module", "boundary", "migration", "trade-off"],
                ),
            ),
            (
                Dimension::CloudNative,
                spec(
                    "Reproducibility & Cloud-Native Readiness",
                    "Evidence: docker/compose, CI/CD, IaC, env management, reproducible builds.",
                    &["docker", "compose", "kubernetes", "deploy", "ci", "cd", "terraform", "devcontainer"],
                ),
            ),
            (
                Dimension::OpenSource,
                spec(
                    "Open Source Collaboration & Professionalism",
                    "Evidence: meaningful commits, PR hygiene, reviews, iterative improvements.",
                    &["pr", "review", "issue", "docs", "changelog", "release", "discussion", "community"],
                ),
            ),
            (
                Dimension::IntelligentDev,
                spec(
                    "Intelligent Development & Automation",
                    "Evidence: tooling/scripts, lint/format, test pyramid depth, agent/tool usage.",
                    &["automation", "script", "tool", "agent", "prompt", "eval", "dataset", "trace"],
                ),
            ),
            (
                Dimension::Leadership,
                spec(
                    "Engineering Leadership (Reliability/Security/Perf)",
                    "Evidence: quality gates, defensive programming, perf/security fixes, standards.",
                    &["security", "performance", "optimize", "reliability", "incident", "standard", "best practice"],
                ),
            ),
        ]);

        ScoringProfile {
            strategy_id: self.id().to_string(),
            dimensions,
            rubric: Some(AI_NATIVE_RUBRIC.to_string()),
            heuristic_note: "**Note:** Scoring service unavailable; using rubric-flavored keyword heuristic scoring.\n\n\
                             **Key Strengths:** Scores reflect presence of quality, reproducibility and professionalism signals in artifacts.\n\n\
                             **Areas for Growth:** Configure a working scoring provider for evidence-weighted assessment.\n\n\
                             **Overall Assessment:** Treat these scores as rough indicators only."
                .to_string(),
        }
    }
}

/// Listing entry for `strategies`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyInfo {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    pub default: bool,
}

/// Id → strategy map plus the enabled subset
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn ScoringStrategy>>,
    enabled: BTreeSet<String>,
    default_id: String,
}

impl StrategyRegistry {
    /// Empty registry; `enabled_strategies` empty means everything registered is enabled
    pub fn new(config: &EvaluationConfig) -> Self {
        Self {
            strategies: BTreeMap::new(),
            enabled: config.enabled_strategies.iter().cloned().collect(),
            default_id: config.default_strategy.clone(),
        }
    }

    /// Registry with the built-in strategies, validated against the manifest
    pub fn with_builtins(config: &EvaluationConfig) -> Result<Self, EvalError> {
        let mut registry = Self::new(config);
        registry.register(Arc::new(BalancedStrategy));
        registry.register(Arc::new(AiNative2026Strategy));
        registry.validate()?;
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn ScoringStrategy>) {
        tracing::debug!("Registered scoring strategy '{}'", strategy.id());
        self.strategies.insert(strategy.id().to_string(), strategy);
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.strategies.contains_key(id) && (self.enabled.is_empty() || self.enabled.contains(id))
    }

    /// Check the manifest: unknown enabled ids are dropped, the default must resolve
    pub fn validate(&mut self) -> Result<(), EvalError> {
        let unknown: Vec<String> = self
            .enabled
            .iter()
            .filter(|id| !self.strategies.contains_key(*id))
            .cloned()
            .collect();
        for id in &unknown {
            tracing::warn!("Ignoring unknown strategy '{}' in enabled_strategies", id);
            self.enabled.remove(id);
        }

        if !unknown.is_empty() && self.enabled.is_empty() {
            return Err(StrategyError::NoneEnabled.into());
        }
        if self.strategies.is_empty() {
            return Err(StrategyError::NoneEnabled.into());
        }

        self.resolve(None)?;
        Ok(())
    }

    /// Strategy for `id`, or the default when `None`
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn ScoringStrategy>, StrategyError> {
        let id = id.unwrap_or(&self.default_id);
        let strategy = self
            .strategies
            .get(id)
            .ok_or_else(|| StrategyError::Unknown(id.to_string()))?;

        if !self.is_enabled(id) {
            return Err(StrategyError::Disabled(id.to_string()));
        }
        Ok(Arc::clone(strategy))
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn list(&self) -> Vec<StrategyInfo> {
        self.strategies
            .values()
            .map(|s| StrategyInfo {
                id: s.id().to_string(),
                description: s.description().to_string(),
                enabled: self.is_enabled(s.id()),
                default: s.id() == self.default_id,
            })
            .collect()
    }
}
