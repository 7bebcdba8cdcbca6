use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::{ModelOptions, ProcessOutput};

/// Errors that can occur while invoking a model
#[derive(Error, Debug)]
pub enum ModelCallError {
    #[error("Failed to spawn model backend: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model backend not available: {0}")]
    Unavailable(String),

    #[error("No model name provided or configured")]
    NoModel,

    #[error("Model {model} failed: {message}")]
    Backend { model: String, message: String },

    #[error("Model {model} failed and fallback model {fallback} also failed: {message}")]
    FallbackFailed {
        model: String,
        fallback: String,
        message: String,
    },
}

/// Configuration for backend process execution
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Working directory for the backend process
    pub working_dir: PathBuf,
    /// Optional per-call timeout (None = no limit)
    pub timeout: Option<Duration>,
    /// Additional environment variables
    pub env_vars: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
            env_vars: HashMap::new(),
        }
    }
}

impl BackendConfig {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: String, value: String) -> Self {
        self.env_vars.insert(key, value);
        self
    }
}

/// Supported backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    ClaudeCode,
    OpenCode,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::ClaudeCode => write!(f, "claude-code"),
            BackendType::OpenCode => write!(f, "opencode"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "claude-code" | "claudecode" => Ok(BackendType::ClaudeCode),
            "opencode" | "open-code" => Ok(BackendType::OpenCode),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

/// A text-generation backend driven as an external CLI process
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Human-readable name of the backend (e.g., "Claude Code", "OpenCode")
    fn name(&self) -> &str;

    /// The backend type
    fn backend_type(&self) -> BackendType;

    /// Run one completion and capture the process output
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        options: &ModelOptions,
        config: &BackendConfig,
    ) -> Result<ProcessOutput, ModelCallError>;

    /// Check if the backend CLI is available on the system
    async fn is_available(&self) -> bool;

    /// Get the path to the backend binary
    fn binary_path(&self) -> &Path;
}

/// Extra CLI arguments passed through the `extra_args` option
pub(crate) fn extra_args(options: &ModelOptions) -> Vec<String> {
    options
        .get("extra_args")
        .and_then(|v| v.as_array())
        .map(|args| {
            args.iter()
                .filter_map(|a| a.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_from_str() {
        assert_eq!(
            "claude".parse::<BackendType>().unwrap(),
            BackendType::ClaudeCode
        );
        assert_eq!(
            "Open-Code".parse::<BackendType>().unwrap(),
            BackendType::OpenCode
        );
        assert!("gemini".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_extra_args_ignores_non_strings() {
        let mut options = ModelOptions::new();
        options.insert(
            "extra_args".to_string(),
            serde_json::json!(["--verbose", 3, "--quiet"]),
        );
        assert_eq!(extra_args(&options), vec!["--verbose", "--quiet"]);
        assert!(extra_args(&ModelOptions::new()).is_empty());
    }
}
