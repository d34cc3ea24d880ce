/// Configuration system for commit-eval
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, EvalError};
use crate::types::ChunkingStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Scoring oracle connection and model chain
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Chunked evaluation settings
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Evaluation policy (budgets, caps, strategy manifest)
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Commit synchronisation settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// On-disk locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Scoring oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Explicit chat-completions URL (overrides `{api_base_url}/chat/completions`)
    #[serde(default)]
    pub chat_completions_url: Option<String>,

    /// Bearer token; usually supplied through the environment instead
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Primary model
    #[serde(default = "default_model")]
    pub model: String,

    /// Models tried in order after the primary fails at the transport level
    #[serde(default)]
    pub fallback_models: Vec<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,

    /// Score with the keyword heuristic once every model failed, instead of failing
    #[serde(default)]
    pub allow_heuristic_fallback: bool,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Split large commit sets into chunks at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Commit count above which chunking kicks in
    #[serde(default = "default_chunk_threshold")]
    pub threshold: usize,

    /// Commits per chunk when file contents are included
    #[serde(default = "default_chunk_size_with_files")]
    pub size_with_files: usize,

    /// Commits per chunk when only diffs are included
    #[serde(default = "default_chunk_size_without_files")]
    pub size_without_files: usize,

    /// How chunk vectors are combined
    #[serde(default = "default_chunking_strategy")]
    pub strategy: ChunkingStrategy,

    /// Worker pool size for the parallel strategy
    #[serde(default = "default_parallel_workers")]
    pub max_parallel_workers: usize,

    /// Include referenced repository file contents in prompts
    #[serde(default = "default_true")]
    pub load_files: bool,
}

/// Evaluation policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Estimated input token budget per oracle call
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    /// Commit ceiling for a first (non-incremental) evaluation
    #[serde(default = "default_initial_commit_cap")]
    pub initial_commit_cap: usize,

    /// Evaluation cycles whose reasoning is kept across incremental merges (newest first)
    #[serde(default = "default_reasoning_section_limit")]
    pub reasoning_section_limit: usize,

    /// Strategy used when a request names none
    #[serde(default = "default_strategy_id")]
    pub default_strategy: String,

    /// Strategy ids available to requests; empty means every registered strategy
    #[serde(default)]
    pub enabled_strategies: Vec<String>,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Commits requested per remote list page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Sync history entries retained in the sync state
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Timeout in seconds for each commit source call
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of synced repository data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of cached evaluations
    #[serde(default = "default_evaluations_dir")]
    pub evaluations_dir: PathBuf,
}

// Default value functions
fn default_api_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.3
}

fn default_oracle_timeout() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_chunk_threshold() -> usize {
    20
}

fn default_chunk_size_with_files() -> usize {
    15
}

fn default_chunk_size_without_files() -> usize {
    20
}

fn default_chunking_strategy() -> ChunkingStrategy {
    ChunkingStrategy::Parallel
}

fn default_parallel_workers() -> usize {
    3
}

fn default_max_input_tokens() -> usize {
    190_000
}

fn default_initial_commit_cap() -> usize {
    150
}

fn default_reasoning_section_limit() -> usize {
    6
}

fn default_strategy_id() -> String {
    "balanced".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_history_limit() -> usize {
    50
}

fn default_source_timeout() -> u64 {
    60
}

fn default_data_dir() -> PathBuf {
    crate::paths::PlatformPaths::default_repo_data_root()
}

fn default_evaluations_dir() -> PathBuf {
    crate::paths::PlatformPaths::default_evaluations_root()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            chat_completions_url: None,
            api_key: None,
            model: default_model(),
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_oracle_timeout(),
            allow_heuristic_fallback: false,
        }
    }
}

impl OracleConfig {
    /// Resolved chat-completions endpoint
    pub fn completions_url(&self) -> String {
        match &self.chat_completions_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!("{}/chat/completions", self.api_base_url.trim_end_matches('/')),
        }
    }

    /// Primary model followed by the fallbacks, without duplicates
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::with_capacity(1 + self.fallback_models.len());
        for model in std::iter::once(&self.model).chain(self.fallback_models.iter()) {
            let model = model.trim();
            if !model.is_empty() && !chain.iter().any(|m| m == model) {
                chain.push(model.to_string());
            }
        }
        chain
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_chunk_threshold(),
            size_with_files: default_chunk_size_with_files(),
            size_without_files: default_chunk_size_without_files(),
            strategy: default_chunking_strategy(),
            max_parallel_workers: default_parallel_workers(),
            load_files: true,
        }
    }
}

impl ChunkingConfig {
    /// Chunk size for the given context mode
    pub fn chunk_size(&self, with_files: bool) -> usize {
        if with_files {
            self.size_with_files
        } else {
            self.size_without_files
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            initial_commit_cap: default_initial_commit_cap(),
            reasoning_section_limit: default_reasoning_section_limit(),
            default_strategy: default_strategy_id(),
            enabled_strategies: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            history_limit: default_history_limit(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            evaluations_dir: default_evaluations_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, EvalError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, EvalError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), EvalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EvalError> {
        fn positive(key: &str, value: usize) -> Result<(), EvalError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than 0".to_string(),
                }
                .into());
            }
            Ok(())
        }

        if self.oracle.model_chain().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "oracle.model".to_string(),
                reason: "at least one model is required".to_string(),
            }
            .into());
        }

        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "oracle.temperature".to_string(),
                reason: format!("must be between 0.0 and 2.0, got {}", self.oracle.temperature),
            }
            .into());
        }

        positive("oracle.max_tokens", self.oracle.max_tokens as usize)?;
        positive("oracle.timeout_secs", self.oracle.timeout_secs as usize)?;
        positive("chunking.threshold", self.chunking.threshold)?;
        positive("chunking.size_with_files", self.chunking.size_with_files)?;
        positive("chunking.size_without_files", self.chunking.size_without_files)?;
        positive("chunking.max_parallel_workers", self.chunking.max_parallel_workers)?;
        positive("evaluation.initial_commit_cap", self.evaluation.initial_commit_cap)?;
        positive(
            "evaluation.reasoning_section_limit",
            self.evaluation.reasoning_section_limit,
        )?;
        positive("sync.page_size", self.sync.page_size)?;
        positive("sync.history_limit", self.sync.history_limit)?;
        positive("sync.timeout_secs", self.sync.timeout_secs as usize)?;

        // The prompt template alone reserves 900 tokens
        if self.evaluation.max_input_tokens <= 900 {
            return Err(ConfigError::InvalidValue {
                key: "evaluation.max_input_tokens".to_string(),
                reason: format!(
                    "must be greater than 900, got {}",
                    self.evaluation.max_input_tokens
                ),
            }
            .into());
        }

        if self.evaluation.default_strategy.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "evaluation.default_strategy".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // API key: explicit config wins, then the usual provider variables
        if self.oracle.api_key.is_none() {
            self.oracle.api_key = ["COMMIT_EVAL_LLM_API_KEY", "OPENAI_API_KEY", "OPEN_ROUTER_KEY"]
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|value| !value.trim().is_empty());
        }

        if let Ok(url) = std::env::var("COMMIT_EVAL_LLM_BASE_URL") {
            self.oracle.api_base_url = url;
        }

        if let Ok(url) = std::env::var("COMMIT_EVAL_LLM_CHAT_COMPLETIONS_URL") {
            self.oracle.chat_completions_url = Some(url);
        }

        if let Ok(model) = std::env::var("COMMIT_EVAL_MODEL") {
            self.oracle.model = model;
        }

        if let Ok(flag) = std::env::var("COMMIT_EVAL_ALLOW_FALLBACK") {
            self.oracle.allow_heuristic_fallback = matches!(
                flag.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "y"
            );
        }

        if let Ok(strategy) = std::env::var("COMMIT_EVAL_CHUNKING_STRATEGY") {
            match strategy.trim().to_lowercase().as_str() {
                "sequential" => self.chunking.strategy = ChunkingStrategy::Sequential,
                "parallel" => self.chunking.strategy = ChunkingStrategy::Parallel,
                other => tracing::warn!("Ignoring unknown COMMIT_EVAL_CHUNKING_STRATEGY '{}'", other),
            }
        }

        if let Ok(workers) = std::env::var("COMMIT_EVAL_MAX_WORKERS")
            && let Ok(workers) = workers.parse()
        {
            self.chunking.max_parallel_workers = workers;
        }

        if let Ok(dir) = std::env::var("COMMIT_EVAL_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("COMMIT_EVAL_EVALUATIONS_DIR") {
            self.storage.evaluations_dir = PathBuf::from(dir);
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, EvalError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
