//! Project configuration file support for refinery.
//!
//! Loads configuration from `refinery.toml` in the working directory and
//! resolves it against command line flags into a [`RunConfig`].
//! Precedence is CLI flag > selected strategy > config file > built-in default.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use refinery_core::{BrainstormConfig, RunConfig};
use refinery_logging::{LogFormat, Redactor};
use refinery_model::{BackendConfig, BackendType, ModelOptions};

/// The config file name
pub const CONFIG_FILE_NAME: &str = "refinery.toml";

pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_META_CRITIC_ROLE: &str = "meta_critic";
pub const DEFAULT_TEMPLATES_DIR: &str = "prompts";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_REVIEW_DIR: &str = "reviews/self-improve";
pub const DEFAULT_ARCHIVE_DAYS: u64 = 7;
pub const DEFAULT_PRIOR_REVIEWS: usize = 3;
pub const DEFAULT_INSIGHTS_LIMIT: usize = 5;

/// Strategy role that turns on the brainstorm pre-pass instead of critiquing
const BRAINSTORMER_ROLE: &str = "brainstormer";

/// Project-level configuration loaded from `refinery.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default, rename = "loop")]
    pub run_loop: LoopConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    /// Passed through untouched to every model call
    #[serde(default)]
    pub options: toml::Table,
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    /// Model for any role without its own entry
    pub default: Option<String>,
    pub generator: Option<String>,
    pub critic: Option<String>,
    pub refiner: Option<String>,
    pub meta_critic: Option<String>,
    /// Tried once when a call to the primary model fails
    pub fallback: Option<String>,
    /// `claude` or `opencode`
    pub backend: Option<String>,
    /// Per-call process timeout
    pub timeout_secs: Option<u64>,
    /// Extra environment for backend processes
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    pub max_rounds: Option<usize>,
    pub stop_threshold: Option<u32>,
    pub critic_role: Option<String>,
    pub refiner_role: Option<String>,
    pub meta_critic_role: Option<String>,
    pub disable_meta_critic: Option<bool>,
    pub critique_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TemplatesConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
    pub level: Option<String>,
    pub format: Option<String>,
    /// Scrub run logs with the `[redaction]` rules
    pub redact: Option<bool>,
    /// Also append loop events as JSON lines to this file
    pub events_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RedactionConfig {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<RedactionPattern>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactionPattern {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ReviewConfig {
    pub output_dir: Option<PathBuf>,
    /// File prepended to every reviewed document
    pub project_context: Option<PathBuf>,
    pub critic_role: Option<String>,
    pub refiner_role: Option<String>,
    pub strategy: Option<String>,
    pub prior_reviews: Option<usize>,
    pub insights_limit: Option<usize>,
    pub archive_dir: Option<PathBuf>,
    pub archive_days: Option<u64>,
}

/// A named bundle of overrides selected with `--strategy`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    /// Critic roles to fan out to; `brainstormer` enables the brainstorm pass
    #[serde(default)]
    pub roles: Vec<String>,
    pub max_rounds: Option<usize>,
    pub stop_threshold: Option<u32>,
    pub refiner_role: Option<String>,
    pub brainstorm_rounds: Option<usize>,
    pub generator_model: Option<String>,
    pub critic_model: Option<String>,
    pub refiner_model: Option<String>,
    pub meta_critic_model: Option<String>,
    pub disable_meta_critic: Option<bool>,
}

/// Run settings given on the command line
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub strategy: Option<String>,
    /// Model for every role
    pub model: Option<String>,
    pub critic_role: Option<String>,
    pub refiner_role: Option<String>,
    pub multi_critic_roles: Option<Vec<String>>,
    pub max_rounds: Option<usize>,
    pub no_meta_critic: bool,
    pub dry_run: bool,
    pub critique_timeout_secs: Option<u64>,
}

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Build the engine configuration for one run.
    pub fn resolve_run(&self, overrides: &RunOverrides) -> Result<RunConfig> {
        let strategy = match overrides.strategy.as_deref() {
            Some(name) => Some(self.strategies.get(name).with_context(|| {
                format!("Strategy '{}' not found in {}", name, CONFIG_FILE_NAME)
            })?),
            None => None,
        };
        if let Some(name) = overrides.strategy.as_deref() {
            tracing::info!("Applying strategy: {}", name);
        }

        let cli_model = overrides.model.as_deref();
        let pick = |strategy_model: Option<&String>, file_model: &Option<String>| -> String {
            cli_model
                .or(strategy_model.map(String::as_str))
                .or(file_model.as_deref())
                .or(self.models.default.as_deref())
                .unwrap_or(DEFAULT_MODEL)
                .to_string()
        };

        let mut builder = RunConfig::builder()
            .generator_model(pick(
                strategy.and_then(|s| s.generator_model.as_ref()),
                &self.models.generator,
            ))
            .critic_model(pick(
                strategy.and_then(|s| s.critic_model.as_ref()),
                &self.models.critic,
            ))
            .refiner_model(pick(
                strategy.and_then(|s| s.refiner_model.as_ref()),
                &self.models.refiner,
            ));

        // Without an explicit meta-critic model the critic model is used
        if let Some(model) = cli_model
            .or(strategy.and_then(|s| s.meta_critic_model.as_deref()))
            .or(self.models.meta_critic.as_deref())
        {
            builder = builder.meta_critic_model(model);
        }

        let mut critic_role = self
            .run_loop
            .critic_role
            .clone()
            .unwrap_or_else(|| "critic".to_string());
        let mut refiner_role = self
            .run_loop
            .refiner_role
            .clone()
            .unwrap_or_else(|| "refiner".to_string());
        let mut multi_critic_roles: Option<Vec<String>> = None;
        let mut brainstorm = None;

        if let Some(strategy) = strategy {
            let (brainstormers, critics): (Vec<String>, Vec<String>) = strategy
                .roles
                .iter()
                .cloned()
                .partition(|role| role == BRAINSTORMER_ROLE);
            if !brainstormers.is_empty() {
                brainstorm = Some(BrainstormConfig::new(strategy.brainstorm_rounds.unwrap_or(1)));
            }
            if !critics.is_empty() {
                multi_critic_roles = Some(critics);
            }
            if let Some(role) = &strategy.refiner_role {
                refiner_role = role.clone();
            }
        }

        if let Some(role) = &overrides.critic_role {
            tracing::info!("Overriding critic role with CLI argument: {}", role);
            critic_role = role.clone();
            if multi_critic_roles.take().is_some() {
                tracing::warn!("--critic-role overrides the multi-critic strategy");
            }
        }
        if let Some(role) = &overrides.refiner_role {
            refiner_role = role.clone();
        }
        if let Some(roles) = &overrides.multi_critic_roles {
            multi_critic_roles = Some(roles.clone());
        }

        builder = builder
            .critic_role(critic_role)
            .refiner_role(refiner_role)
            .meta_critic_role(Some(
                self.run_loop
                    .meta_critic_role
                    .clone()
                    .unwrap_or_else(|| DEFAULT_META_CRITIC_ROLE.to_string()),
            ))
            .brainstorm(brainstorm)
            .dry_run(overrides.dry_run)
            .options(self.model_options()?);

        if let Some(roles) = multi_critic_roles {
            builder = builder.multi_critic_roles(roles);
        }

        if let Some(max_rounds) = overrides
            .max_rounds
            .or(strategy.and_then(|s| s.max_rounds))
            .or(self.run_loop.max_rounds)
        {
            builder = builder.max_rounds(max_rounds);
        }
        if let Some(threshold) = strategy
            .and_then(|s| s.stop_threshold)
            .or(self.run_loop.stop_threshold)
        {
            builder = builder.stop_threshold(threshold);
        }
        if let Some(secs) = overrides
            .critique_timeout_secs
            .or(self.run_loop.critique_timeout_secs)
        {
            builder = builder.critique_timeout(Duration::from_secs(secs));
        }

        let disable_meta_critic = overrides.no_meta_critic
            || strategy
                .and_then(|s| s.disable_meta_critic)
                .or(self.run_loop.disable_meta_critic)
                .unwrap_or(false);
        builder = builder.disable_meta_critic(disable_meta_critic);

        builder.build().context("Invalid run configuration")
    }

    /// The `[options]` table as model passthrough options
    pub fn model_options(&self) -> Result<ModelOptions> {
        self.options
            .iter()
            .map(|(key, value)| Ok((key.clone(), serde_json::to_value(value)?)))
            .collect::<Result<ModelOptions, serde_json::Error>>()
            .context("Failed to convert [options] table")
    }

    pub fn backend_type(&self, cli: Option<BackendType>) -> Result<BackendType> {
        if let Some(backend) = cli {
            return Ok(backend);
        }
        match self.models.backend.as_deref() {
            Some(name) => name.parse().map_err(anyhow::Error::msg),
            None => Ok(BackendType::ClaudeCode),
        }
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.models.fallback.as_deref()
    }

    /// Process settings shared by every backend call
    pub fn backend_config(&self, working_dir: &Path) -> BackendConfig {
        let mut config = BackendConfig::new(working_dir.to_path_buf());
        if let Some(secs) = self.models.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        for (key, value) in &self.models.env {
            config = config.with_env(key.clone(), value.clone());
        }
        config
    }

    pub fn log_format(&self, cli: Option<LogFormat>) -> Result<LogFormat> {
        if let Some(format) = cli {
            return Ok(format);
        }
        match self.logging.format.as_deref() {
            Some(name) => name.parse().map_err(anyhow::Error::msg),
            None => Ok(LogFormat::Pretty),
        }
    }

    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("warn")
    }

    pub fn templates_dir(&self, working_dir: &Path) -> PathBuf {
        resolve_path(working_dir, self.templates.dir.as_deref(), DEFAULT_TEMPLATES_DIR)
    }

    pub fn log_dir(&self, working_dir: &Path) -> PathBuf {
        resolve_path(working_dir, self.logging.log_dir.as_deref(), DEFAULT_LOG_DIR)
    }

    pub fn events_file(&self, working_dir: &Path) -> Option<PathBuf> {
        self.logging
            .events_file
            .as_deref()
            .map(|path| working_dir.join(expand_home(path)))
    }

    pub fn review_dir(&self, working_dir: &Path) -> PathBuf {
        resolve_path(working_dir, self.review.output_dir.as_deref(), DEFAULT_REVIEW_DIR)
    }

    pub fn archive_dir(&self, working_dir: &Path) -> PathBuf {
        match self.review.archive_dir.as_deref() {
            Some(dir) => working_dir.join(expand_home(dir)),
            None => self.review_dir(working_dir).join("archive"),
        }
    }

    pub fn project_context(&self, working_dir: &Path) -> Option<PathBuf> {
        self.review
            .project_context
            .as_deref()
            .map(|path| working_dir.join(expand_home(path)))
    }

    /// Directories searched by the `logs` commands
    pub fn history_dirs(&self, working_dir: &Path) -> Vec<PathBuf> {
        vec![self.log_dir(working_dir), self.review_dir(working_dir)]
    }

    /// The redactor to apply to run logs, if redaction is on.
    pub fn redactor(&self, cli_redact: bool) -> Result<Option<Redactor>> {
        if !(cli_redact || self.logging.redact.unwrap_or(false)) {
            return Ok(None);
        }

        let mut redactor = Redactor::new().with_keys(self.redaction.keys.iter().cloned());
        for rule in &self.redaction.patterns {
            redactor = redactor
                .with_pattern(&rule.pattern, &rule.replacement)
                .with_context(|| format!("Invalid redaction pattern '{}'", rule.pattern))?;
        }

        if redactor.is_empty() {
            tracing::warn!("Log redaction requested but no [redaction] rules are configured");
        }
        Ok(Some(redactor))
    }
}

fn resolve_path(working_dir: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    working_dir.join(expand_home(configured.unwrap_or(Path::new(default))))
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(content: &str) -> ProjectConfig {
        toml::from_str(content).unwrap()
    }

    const FULL: &str = r#"
[models]
default = "haiku"
critic = "opus"
fallback = "sonnet"
backend = "opencode"
timeout_secs = 90
env = { OPENCODE_PROFILE = "review" }

[loop]
max_rounds = 4
critic_role = "editor"
critique_timeout_secs = 30

[options]
temperature = 0.2

[strategies.deep]
roles = ["style", "security"]
max_rounds = 6
refiner_model = "opus"

[strategies.ideas]
roles = ["brainstormer", "style"]
brainstorm_rounds = 2
"#;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[loop]\nmax_rounds = \"x\"").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: Result<ProjectConfig, _> = toml::from_str("[loop]\nrounds = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ProjectConfig::default()
            .resolve_run(&RunOverrides::default())
            .unwrap();

        assert_eq!(config.generator_model(), DEFAULT_MODEL);
        assert_eq!(config.meta_critic_model(), DEFAULT_MODEL);
        assert_eq!(config.max_rounds(), refinery_core::DEFAULT_MAX_ROUNDS);
        assert_eq!(config.critic_roles(), ["critic".to_string()]);
        assert_eq!(config.meta_critic_role(), Some(DEFAULT_META_CRITIC_ROLE));
        assert!(!config.disable_meta_critic());
    }

    #[test]
    fn test_file_values_apply() {
        let config = parse(FULL).resolve_run(&RunOverrides::default()).unwrap();

        assert_eq!(config.generator_model(), "haiku");
        assert_eq!(config.critic_model(), "opus");
        assert_eq!(config.meta_critic_model(), "opus");
        assert_eq!(config.max_rounds(), 4);
        assert_eq!(config.critic_roles(), ["editor".to_string()]);
        assert_eq!(config.critique_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.options().get("temperature"),
            Some(&serde_json::json!(0.2))
        );
    }

    #[test]
    fn test_strategy_overrides_file() {
        let overrides = RunOverrides {
            strategy: Some("deep".to_string()),
            ..Default::default()
        };
        let config = parse(FULL).resolve_run(&overrides).unwrap();

        assert_eq!(config.max_rounds(), 6);
        assert_eq!(config.refiner_model(), "opus");
        assert_eq!(
            config.critic_roles(),
            ["style".to_string(), "security".to_string()]
        );
    }

    #[test]
    fn test_cli_overrides_strategy() {
        let overrides = RunOverrides {
            strategy: Some("deep".to_string()),
            model: Some("mock-model".to_string()),
            max_rounds: Some(2),
            critic_role: Some("pedant".to_string()),
            no_meta_critic: true,
            ..Default::default()
        };
        let config = parse(FULL).resolve_run(&overrides).unwrap();

        assert_eq!(config.max_rounds(), 2);
        assert_eq!(config.generator_model(), "mock-model");
        assert_eq!(config.refiner_model(), "mock-model");
        assert_eq!(config.meta_critic_model(), "mock-model");
        // --critic-role drops the strategy's multi-critic list
        assert_eq!(config.critic_roles(), ["pedant".to_string()]);
        assert!(config.disable_meta_critic());
    }

    #[test]
    fn test_cli_multi_critic_roles_replace_critic_role() {
        let overrides = RunOverrides {
            multi_critic_roles: Some(vec!["a".to_string(), "b".to_string()]),
            ..Default::default()
        };
        let config = parse(FULL).resolve_run(&overrides).unwrap();
        assert_eq!(config.critic_roles(), ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_brainstormer_role_enables_brainstorm() {
        let overrides = RunOverrides {
            strategy: Some("ideas".to_string()),
            ..Default::default()
        };
        let config = parse(FULL).resolve_run(&overrides).unwrap();

        assert_eq!(config.brainstorm().map(|b| b.rounds), Some(2));
        assert_eq!(config.critic_roles(), ["style".to_string()]);
    }

    #[test]
    fn test_unknown_strategy_is_error() {
        let overrides = RunOverrides {
            strategy: Some("missing".to_string()),
            ..Default::default()
        };
        let err = parse(FULL).resolve_run(&overrides).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_backend_and_paths() {
        let config = parse(FULL);
        assert_eq!(config.backend_type(None).unwrap(), BackendType::OpenCode);
        assert_eq!(
            config.backend_type(Some(BackendType::ClaudeCode)).unwrap(),
            BackendType::ClaudeCode
        );
        assert_eq!(config.fallback_model(), Some("sonnet"));

        let backend = config.backend_config(Path::new("/work"));
        assert_eq!(backend.working_dir, PathBuf::from("/work"));
        assert_eq!(backend.timeout, Some(Duration::from_secs(90)));
        assert_eq!(
            backend.env_vars.get("OPENCODE_PROFILE").map(String::as_str),
            Some("review")
        );

        let root = Path::new("/work");
        assert_eq!(config.log_dir(root), PathBuf::from("/work/logs"));
        assert_eq!(
            config.archive_dir(root),
            PathBuf::from("/work/reviews/self-improve/archive")
        );
    }

    #[test]
    fn test_redactor_only_when_enabled() {
        let config = parse(
            r#"
[redaction]
keys = ["api_key"]
patterns = [{ pattern = "sk-[a-z0-9]+", replacement = "[KEY]" }]
"#,
        );
        assert!(config.redactor(false).unwrap().is_none());
        let redactor = config.redactor(true).unwrap().unwrap();
        assert_eq!(
            redactor.redact(&serde_json::json!({"note": "use SK-abc123"})),
            serde_json::json!({"note": "use [KEY]"})
        );
    }

    #[test]
    fn test_invalid_redaction_pattern() {
        let config = parse(
            "[logging]\nredact = true\n[redaction]\npatterns = [{ pattern = \"(\", replacement = \"\" }]",
        );
        assert!(config.redactor(false).is_err());
    }
}
