use refinery_model::ModelOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Ceiling on a whole critique fan-out, not on each sub-request
pub const DEFAULT_CRITIQUE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ROUNDS: usize = 3;
pub const DEFAULT_STOP_THRESHOLD: u32 = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No {0} model configured")]
    MissingModel(&'static str),

    #[error("max_rounds must be greater than zero")]
    ZeroMaxRounds,

    #[error("Multi-critic mode needs at least one critic role")]
    EmptyCriticRoles,

    #[error("Blank {0} role identifier")]
    BlankRole(&'static str),

    #[error("Critique timeout must be greater than zero")]
    ZeroTimeout,
}

/// Optional pre-loop pass that rewrites the initial text with the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainstormConfig {
    pub rounds: usize,
    #[serde(default = "default_brainstorm_role")]
    pub role: String,
}

fn default_brainstorm_role() -> String {
    "brainstormer".to_string()
}

impl BrainstormConfig {
    pub fn new(rounds: usize) -> Self {
        Self {
            rounds,
            role: default_brainstorm_role(),
        }
    }
}

/// Immutable configuration for one critique-refine run.
///
/// Only obtainable through [`RunConfig::builder`], which validates it.
#[derive(Debug, Clone)]
pub struct RunConfig {
    generator_model: String,
    critic_model: String,
    refiner_model: String,
    meta_critic_model: String,
    max_rounds: usize,
    stop_threshold: u32,
    critic_role: String,
    refiner_role: String,
    meta_critic_role: Option<String>,
    multi_critic_roles: Option<Vec<String>>,
    disable_meta_critic: bool,
    dry_run: bool,
    critique_timeout: Duration,
    brainstorm: Option<BrainstormConfig>,
    options: ModelOptions,
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    pub fn generator_model(&self) -> &str {
        &self.generator_model
    }

    pub fn critic_model(&self) -> &str {
        &self.critic_model
    }

    pub fn refiner_model(&self) -> &str {
        &self.refiner_model
    }

    pub fn meta_critic_model(&self) -> &str {
        &self.meta_critic_model
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Reserved for actionability scoring; carried through to the run log only
    pub fn stop_threshold(&self) -> u32 {
        self.stop_threshold
    }

    pub fn critic_role(&self) -> &str {
        &self.critic_role
    }

    pub fn refiner_role(&self) -> &str {
        &self.refiner_role
    }

    pub fn meta_critic_role(&self) -> Option<&str> {
        self.meta_critic_role.as_deref()
    }

    pub fn multi_critic_roles(&self) -> Option<&[String]> {
        self.multi_critic_roles.as_deref()
    }

    /// Roles consulted in each critique phase, in configured order
    pub fn critic_roles(&self) -> &[String] {
        match &self.multi_critic_roles {
            Some(roles) => roles,
            None => std::slice::from_ref(&self.critic_role),
        }
    }

    pub fn disable_meta_critic(&self) -> bool {
        self.disable_meta_critic
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn critique_timeout(&self) -> Duration {
        self.critique_timeout
    }

    pub fn brainstorm(&self) -> Option<&BrainstormConfig> {
        self.brainstorm.as_ref()
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }
}

#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    generator_model: String,
    critic_model: String,
    refiner_model: String,
    meta_critic_model: Option<String>,
    max_rounds: usize,
    stop_threshold: u32,
    critic_role: String,
    refiner_role: String,
    meta_critic_role: Option<String>,
    multi_critic_roles: Option<Vec<String>>,
    disable_meta_critic: bool,
    dry_run: bool,
    critique_timeout: Duration,
    brainstorm: Option<BrainstormConfig>,
    options: ModelOptions,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            generator_model: String::new(),
            critic_model: String::new(),
            refiner_model: String::new(),
            meta_critic_model: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            critic_role: "critic".to_string(),
            refiner_role: "refiner".to_string(),
            meta_critic_role: None,
            multi_critic_roles: None,
            disable_meta_critic: false,
            dry_run: false,
            critique_timeout: DEFAULT_CRITIQUE_TIMEOUT,
            brainstorm: None,
            options: ModelOptions::new(),
        }
    }
}

impl RunConfigBuilder {
    /// Use one model for every role
    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.generator_model = model.clone();
        self.critic_model = model.clone();
        self.refiner_model = model.clone();
        self.meta_critic_model = Some(model);
        self
    }

    pub fn generator_model(mut self, model: impl Into<String>) -> Self {
        self.generator_model = model.into();
        self
    }

    pub fn critic_model(mut self, model: impl Into<String>) -> Self {
        self.critic_model = model.into();
        self
    }

    pub fn refiner_model(mut self, model: impl Into<String>) -> Self {
        self.refiner_model = model.into();
        self
    }

    /// Defaults to the critic model
    pub fn meta_critic_model(mut self, model: impl Into<String>) -> Self {
        self.meta_critic_model = Some(model.into());
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn stop_threshold(mut self, threshold: u32) -> Self {
        self.stop_threshold = threshold;
        self
    }

    pub fn critic_role(mut self, role: impl Into<String>) -> Self {
        self.critic_role = role.into();
        self
    }

    pub fn refiner_role(mut self, role: impl Into<String>) -> Self {
        self.refiner_role = role.into();
        self
    }

    pub fn meta_critic_role(mut self, role: Option<String>) -> Self {
        self.meta_critic_role = role;
        self
    }

    pub fn multi_critic_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.multi_critic_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn disable_meta_critic(mut self, disable: bool) -> Self {
        self.disable_meta_critic = disable;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn critique_timeout(mut self, timeout: Duration) -> Self {
        self.critique_timeout = timeout;
        self
    }

    pub fn brainstorm(mut self, brainstorm: Option<BrainstormConfig>) -> Self {
        self.brainstorm = brainstorm.filter(|b| b.rounds > 0);
        self
    }

    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let meta_critic_model = self
            .meta_critic_model
            .unwrap_or_else(|| self.critic_model.clone());

        for (name, model) in [
            ("generator", &self.generator_model),
            ("critic", &self.critic_model),
            ("refiner", &self.refiner_model),
            ("meta-critic", &meta_critic_model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::MissingModel(name));
            }
        }

        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroMaxRounds);
        }
        if self.critique_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(roles) = &self.multi_critic_roles {
            if roles.is_empty() {
                return Err(ConfigError::EmptyCriticRoles);
            }
            if roles.iter().any(|r| r.trim().is_empty()) {
                return Err(ConfigError::BlankRole("critic"));
            }
        } else if self.critic_role.trim().is_empty() {
            return Err(ConfigError::BlankRole("critic"));
        }
        if self.refiner_role.trim().is_empty() {
            return Err(ConfigError::BlankRole("refiner"));
        }
        if let Some(brainstorm) = &self.brainstorm {
            if brainstorm.role.trim().is_empty() {
                return Err(ConfigError::BlankRole("brainstormer"));
            }
        }

        Ok(RunConfig {
            generator_model: self.generator_model,
            critic_model: self.critic_model,
            refiner_model: self.refiner_model,
            meta_critic_model,
            max_rounds: self.max_rounds,
            stop_threshold: self.stop_threshold,
            critic_role: self.critic_role,
            refiner_role: self.refiner_role,
            meta_critic_role: self.meta_critic_role.filter(|r| !r.trim().is_empty()),
            multi_critic_roles: self.multi_critic_roles,
            disable_meta_critic: self.disable_meta_critic,
            dry_run: self.dry_run,
            critique_timeout: self.critique_timeout,
            brainstorm: self.brainstorm,
            options: self.options,
        })
    }
}
