use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::traits::extra_args;
use crate::{
    BackendConfig, BackendType, ModelBackend, ModelCallError, ModelOptions, ProcessOutput,
    ProcessSpawner,
};

/// Claude Code CLI backend
pub struct ClaudeCodeBackend {
    binary_path: PathBuf,
}

impl ClaudeCodeBackend {
    pub fn new() -> Self {
        Self {
            binary_path: PathBuf::from("claude"),
        }
    }

    pub fn with_binary_path(path: PathBuf) -> Self {
        Self { binary_path: path }
    }
}

impl Default for ClaudeCodeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for ClaudeCodeBackend {
    fn name(&self) -> &str {
        "Claude Code"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::ClaudeCode
    }

    fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary_path)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        options: &ModelOptions,
        config: &BackendConfig,
    ) -> Result<ProcessOutput, ModelCallError> {
        debug!(
            backend = self.name(),
            model,
            prompt_len = prompt.len(),
            "Calling model"
        );

        // Non-interactive mode, output only
        let mut args = vec!["--print", "--model", model];

        if let Some(system_prompt) = system_prompt {
            args.push("--system-prompt");
            args.push(system_prompt);
        }

        let extra = extra_args(options);
        args.extend(extra.iter().map(String::as_str));

        // `--` keeps prompts starting with '-' from being read as options
        args.push("--");
        args.push(prompt);

        ProcessSpawner::spawn(&self.binary_path, &args, config).await
    }
}
