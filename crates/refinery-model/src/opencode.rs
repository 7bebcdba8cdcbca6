use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::traits::extra_args;
use crate::{
    BackendConfig, BackendType, ModelBackend, ModelCallError, ModelOptions, ProcessOutput,
    ProcessSpawner,
};

/// OpenCode CLI backend
pub struct OpenCodeBackend {
    binary_path: PathBuf,
}

impl OpenCodeBackend {
    pub fn new() -> Self {
        Self {
            binary_path: PathBuf::from("opencode"),
        }
    }

    pub fn with_binary_path(path: PathBuf) -> Self {
        Self { binary_path: path }
    }
}

impl Default for OpenCodeBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// OpenCode has no system prompt flag, so the instructions lead the prompt
fn compose_prompt(prompt: &str, system_prompt: Option<&str>) -> String {
    match system_prompt {
        Some(system) if !system.trim().is_empty() => {
            format!("{}\n\n---\n\n{}", system.trim_end(), prompt)
        }
        _ => prompt.to_string(),
    }
}

#[async_trait]
impl ModelBackend for OpenCodeBackend {
    fn name(&self) -> &str {
        "OpenCode"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::OpenCode
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

        let full_prompt = compose_prompt(prompt, system_prompt);

        // OpenCode uses the "run" subcommand for non-interactive execution
        let mut args = vec!["run", "--model", model];

        let extra = extra_args(options);
        args.extend(extra.iter().map(String::as_str));

        args.push("--prompt");
        args.push(&full_prompt);

        ProcessSpawner::spawn(&self.binary_path, &args, config).await
    }
}
