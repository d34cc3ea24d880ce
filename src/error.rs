/// Centralized error types for commit-eval using thiserror
///
/// Only real failures live here. Expected domain outcomes (an author with no commits,
/// a repository that is already up to date) are modelled as variants of the result types
/// in `client` and `sync`, and malformed oracle output degrades inside the evaluator.
use thiserror::Error;

/// Main error type for the evaluation pipeline
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Network, timeout and HTTP failures talking to the commit source or the scoring oracle
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Request to {target} failed: {reason}")]
    RequestFailed { target: String, reason: String },

    #[error("HTTP {status} from {target}: {body}")]
    Http {
        target: String,
        status: u16,
        body: String,
    },

    #[error("Request to {target} timed out after {secs} seconds")]
    Timeout { target: String, secs: u64 },

    #[error("Malformed transport payload from {target}: {reason}")]
    MalformedPayload { target: String, reason: String },

    #[error("All {attempts} oracle models failed, last error: {last_error}")]
    ModelsExhausted { attempts: usize, last_error: String },

    #[error("Scoring oracle is not configured: {0}")]
    NotConfigured(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors related to input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("No local data found for {0}, run a sync first")]
    RepositoryNotSynced(String),

    #[error("Invalid repository identifier: {0}")]
    InvalidRepository(String),

    #[error("Empty {0}")]
    Empty(String),

    #[error("At least {min} {what} required, got {actual}")]
    TooFew {
        what: String,
        min: usize,
        actual: usize,
    },

    #[error("At most {max} {what} allowed, got {actual}")]
    TooMany {
        what: String,
        max: usize,
        actual: usize,
    },

    #[error("Total weight of {0} is zero")]
    ZeroWeight(String),
}

/// Errors related to persisted state (sync state, commit index, evaluation cache)
///
/// Reads never produce these: unreadable state degrades to "absent". Only writes fail.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to save '{path}': {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Failed to delete '{path}': {reason}")]
    DeleteFailed { path: String, reason: String },

    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(String),
}

/// Errors related to scoring strategy resolution
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Unknown scoring strategy '{0}'")]
    Unknown(String),

    #[error("Scoring strategy '{0}' is registered but not enabled")]
    Disabled(String),

    #[error("No scoring strategies are enabled")]
    NoneEnabled,
}

// Conversion from anyhow::Error to EvalError
impl From<anyhow::Error> for EvalError {
    fn from(err: anyhow::Error) -> Self {
        EvalError::Other(format!("{:#}", err))
    }
}

impl EvalError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        EvalError::Other(msg.into())
    }

    /// Check if this is a user error (bad input, unknown strategy) vs system error
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EvalError::Validation(_)
                | EvalError::Strategy(_)
                | EvalError::Config(ConfigError::InvalidValue { .. })
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            EvalError::Transport(e) => e.is_retryable(),
            EvalError::Io(_) => true,
            _ => false,
        }
    }
}

impl TransportError {
    /// Transient failures worth retrying on a later cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. }
            | TransportError::RequestFailed { .. }
            | TransportError::ModelsExhausted { .. } => true,
            TransportError::Http { status, .. } => *status == 429 || *status >= 500,
            TransportError::MalformedPayload { .. } | TransportError::NotConfigured(_) => false,
        }
    }
}
