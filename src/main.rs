use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use commit_eval::client::{EvalClient, EvaluationRequest};
use commit_eval::config::Config;
use commit_eval::error::EvalError;
use commit_eval::git::LocalGitSource;
use commit_eval::paths::PlatformPaths;
use commit_eval::types::{ChunkingStrategy, RepoKey};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, debug, error};
use tracing_subscriber::EnvFilter;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "commit-eval", version, long_version = LONG_VERSION)]
#[command(about = "Score engineers' commit history on six capability dimensions")]
struct Cli {
    /// Config file (defaults to the platform config path)
    #[arg(long, global = true, env = "COMMIT_EVAL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull new commits of a local repository into storage
    Sync {
        /// Path inside the repository
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Evaluate one author of a synced repository
    Evaluate {
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Author name as recorded in commits
        #[arg(long)]
        author: String,

        /// Additional identities of the same author
        #[arg(long = "alias")]
        aliases: Vec<String>,

        /// Scoring strategy id
        #[arg(long)]
        strategy: Option<String>,

        /// Accumulate chunks sequentially instead of in parallel
        #[arg(long)]
        sequential: bool,

        /// Ignore the cached evaluation and score from scratch
        #[arg(long)]
        no_cache: bool,

        /// Score all commits in a single call
        #[arg(long)]
        no_chunking: bool,

        /// Sync before evaluating
        #[arg(long)]
        sync: bool,
    },

    /// Drop cached evaluations
    Invalidate {
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Author whose evaluations to drop; every author when omitted
        #[arg(long)]
        author: Option<String>,

        /// Only this strategy's evaluation
        #[arg(long, requires = "author")]
        strategy: Option<String>,
    },

    /// List authors of a synced repository with their commit counts
    Authors {
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Evaluate several identities of one person and merge them by commit count
    Merge {
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Identity to include; give at least two
        #[arg(long = "author", required = true, num_args = 1)]
        authors: Vec<String>,

        #[arg(long)]
        strategy: Option<String>,
    },

    /// Compare one contributor across several repositories
    Compare {
        /// Author name as recorded in commits
        #[arg(long)]
        author: String,

        /// Additional identities of the same author
        #[arg(long = "alias")]
        aliases: Vec<String>,

        /// Repository path; repeat for each repository
        #[arg(long = "repo", required = true, num_args = 1)]
        repos: Vec<PathBuf>,

        #[arg(long)]
        strategy: Option<String>,

        /// Sync each repository before evaluating
        #[arg(long)]
        sync: bool,
    },

    /// List scoring strategies
    Strategies,

    /// Write the effective configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Exit status for scripted callers: 2 for bad input, 75 (EX_TEMPFAIL) for transient failures
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<EvalError>() {
        Some(e) if e.is_user_error() => 2,
        Some(e) if e.is_retryable() => 75,
        _ => 1,
    }
}

fn open_repo(path: &Path) -> Result<(LocalGitSource, RepoKey)> {
    let source = LocalGitSource::discover(path)?;
    let key = source.repo_key();
    Ok((source, key))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(&path)?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "commit_eval={},hyper=warn,reqwest=warn",
            level.as_str().to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("commit-eval {} starting", LONG_VERSION);

    match run(cli.config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(config_path: Option<PathBuf>, command: Commands) -> Result<()> {
    if let Commands::InitConfig { force } = command {
        let path = config_path.unwrap_or_else(PlatformPaths::default_config_path);
        if path.exists() && !force {
            bail!("{} already exists, pass --force to overwrite", path.display());
        }
        let mut config = Config::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        // Keys come from the environment, never from the written file
        config.oracle.api_key = None;
        config.save(&path)?;
        return print_json(&serde_json::json!({ "config": path.display().to_string() }));
    }

    let client = EvalClient::with_config(load_config(config_path)?)?;

    match command {
        Commands::Sync { path } => {
            let (source, key) = open_repo(&path)?;
            let report = client.sync(&source, &key).await?;
            print_json(&report)?;
        }
        Commands::Evaluate {
            path,
            author,
            aliases,
            strategy,
            sequential,
            no_cache,
            no_chunking,
            sync,
        } => {
            let (source, key) = open_repo(&path)?;
            if sync {
                client.sync(&source, &key).await?;
            }

            let request = EvaluationRequest {
                author,
                aliases,
                strategy,
                chunking_strategy: sequential.then_some(ChunkingStrategy::Sequential),
                use_cache: !no_cache,
                use_chunking: !no_chunking,
            };
            let evaluation = client.evaluate(&key, &request).await?;
            print_json(&evaluation)?;
        }
        Commands::Invalidate {
            path,
            author,
            strategy,
        } => {
            let (_, key) = open_repo(&path)?;
            let removed = match author {
                Some(author) => client.invalidate(&key, &author, strategy.as_deref())?,
                None => client.invalidate_repo(&key)?,
            };
            print_json(&serde_json::json!({ "repository": key.to_string(), "removed": removed }))?;
        }
        Commands::Authors { path } => {
            let (_, key) = open_repo(&path)?;
            print_json(&client.authors(&key)?)?;
        }
        Commands::Merge {
            path,
            authors,
            strategy,
        } => {
            let (_, key) = open_repo(&path)?;
            let mut parts = Vec::with_capacity(authors.len());
            for author in authors {
                let request = EvaluationRequest {
                    strategy: strategy.clone(),
                    ..EvaluationRequest::new(author)
                };
                let result = client.evaluate(&key, &request).await?.result().clone();
                parts.push((result.total_commits_evaluated, result));
            }
            let merged = client.merge_evaluations(&parts, strategy.as_deref()).await?;
            print_json(&merged)?;
        }
        Commands::Compare {
            author,
            aliases,
            repos,
            strategy,
            sync,
        } => {
            let mut keys = Vec::with_capacity(repos.len());
            for path in &repos {
                let (source, key) = open_repo(path)?;
                if sync {
                    client.sync(&source, &key).await?;
                }
                keys.push(key);
            }
            let request = EvaluationRequest {
                aliases,
                strategy,
                ..EvaluationRequest::new(author)
            };
            print_json(&client.compare_across(&keys, &request).await?)?;
        }
        Commands::Strategies => {
            print_json(&client.strategies())?;
        }
        // Written above, before a client exists
        Commands::InitConfig { .. } => {}
    }

    client.shutdown().await;
    Ok(())
}
