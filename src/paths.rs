/// Centralized platform-specific path computation
///
/// Provides consistent path handling across Windows, macOS, and Linux following
/// XDG Base Directory specification on Unix-like systems.
use crate::types::RepoKey;
use std::path::{Path, PathBuf};

const PROJECT_DIR_NAME: &str = "commit-eval";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate data directory for the current platform
    ///
    /// - Windows: %LOCALAPPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_DATA_HOME or ~/.local/share
    pub fn data_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            std::env::var("LOCALAPPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join("Library/Application Support"))
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            // Linux/Unix - follow XDG Base Directory specification
            std::env::var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|_| {
                    std::env::var("HOME").map(|home| PathBuf::from(home).join(".local/share"))
                })
                .unwrap_or_else(|_| PathBuf::from("."))
        }
    }

    /// Get the appropriate config directory for the current platform
    ///
    /// - Windows: %APPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_CONFIG_HOME or ~/.config
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get default project-specific data directory
    ///
    /// Returns: {data_dir}/commit-eval
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(PROJECT_DIR_NAME)
    }

    /// Get default project-specific config directory
    ///
    /// Returns: {config_dir}/commit-eval
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(PROJECT_DIR_NAME)
    }

    /// Get default root for synced repository data
    ///
    /// Returns: {data_dir}/commit-eval/data
    pub fn default_repo_data_root() -> PathBuf {
        Self::project_data_dir().join("data")
    }

    /// Get default root for cached evaluations
    ///
    /// Returns: {data_dir}/commit-eval/evaluations
    pub fn default_evaluations_root() -> PathBuf {
        Self::project_data_dir().join("evaluations")
    }

    /// Get default config file path
    ///
    /// Returns: {config_dir}/commit-eval/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }

    /// Namespace a root directory by repository: {root}/{platform}/{owner}/{repo}
    pub fn repo_dir(root: &Path, key: &RepoKey) -> PathBuf {
        root.join(sanitize_component(&key.platform))
            .join(sanitize_component(&key.owner))
            .join(sanitize_component(&key.repo))
    }
}

/// Make a single path component safe: no separators, no parent references
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_not_empty() {
        let dir = PlatformPaths::data_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_config_dir_not_empty() {
        let dir = PlatformPaths::config_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_project_paths_contain_project_name() {
        let data_dir = PlatformPaths::project_data_dir();
        let config_dir = PlatformPaths::project_config_dir();

        assert!(data_dir.to_string_lossy().contains("commit-eval"));
        assert!(config_dir.to_string_lossy().contains("commit-eval"));
    }

    #[test]
    fn test_default_roots() {
        let data = PlatformPaths::default_repo_data_root();
        let evals = PlatformPaths::default_evaluations_root();
        assert!(data.ends_with("commit-eval/data"));
        assert!(evals.ends_with("commit-eval/evaluations"));
    }

    #[test]
    fn test_default_config_path() {
        let path = PlatformPaths::default_config_path();
        assert!(path.to_string_lossy().contains("commit-eval"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_repo_dir_layout() {
        let key = RepoKey::new("github", "octo", "hello-world");
        let dir = PlatformPaths::repo_dir(Path::new("/root"), &key);
        assert_eq!(dir, PathBuf::from("/root/github/octo/hello-world"));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("a/b"), "a_b");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("my repo"), "my_repo");
        assert_eq!(sanitize_component("plain-name"), "plain-name");
    }

    #[test]
    fn test_paths_are_absolute_or_relative() {
        // Paths should either be absolute or fallback to "."
        let data_dir = PlatformPaths::data_dir();
        assert!(data_dir.is_absolute() || data_dir == PathBuf::from("."));
    }
}
