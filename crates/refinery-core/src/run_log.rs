use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::RunConfig;

/// Model identifier recorded when the text under review was supplied by the caller
pub const PROVIDED_CONTENT_MARKER: &str = "N/A (provided content for review)";

/// Why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    NonActionable {
        round: usize,
    },
    MaxRoundsReached {
        max_rounds: usize,
    },
    Timeout {
        round: usize,
    },
    Error {
        #[serde(default)]
        round: Option<usize>,
        message: String,
    },
}

impl StopReason {
    pub fn kind(&self) -> &'static str {
        match self {
            StopReason::NonActionable { .. } => "non_actionable",
            StopReason::MaxRoundsReached { .. } => "max_rounds_reached",
            StopReason::Timeout { .. } => "timeout",
            StopReason::Error { .. } => "error",
        }
    }

    /// Process exit code for a run that ended this way
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::NonActionable { .. } | StopReason::MaxRoundsReached { .. } => 0,
            StopReason::Timeout { .. } => 1,
            StopReason::Error { .. } => 2,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::Error { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NonActionable { round } => {
                write!(f, "Non-actionable critique received in round {}.", round)
            }
            StopReason::MaxRoundsReached { max_rounds } => {
                write!(f, "Max rounds ({}) reached.", max_rounds)
            }
            StopReason::Timeout { round } => write!(f, "Timeout in round {}", round),
            StopReason::Error {
                round: Some(round),
                message,
            } => write!(f, "Error in round {}: {}", round, message),
            StopReason::Error {
                round: None,
                message,
            } => write!(f, "Error: {}", message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialGeneration {
    pub text: String,
    pub model_used: String,
}

impl InitialGeneration {
    pub fn provided(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model_used: PROVIDED_CONTENT_MARKER.to_string(),
        }
    }

    pub fn is_provided(&self) -> bool {
        self.model_used == PROVIDED_CONTENT_MARKER
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueRecord {
    pub round: usize,
    pub text: String,
    pub model_used: String,
    pub roles_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRecord {
    pub round: usize,
    pub text: String,
    pub model_used: String,
    pub role_used: String,
}

/// Echo of the configuration a run used
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUsed {
    pub generator_model: String,
    pub critic_model: String,
    pub refiner_model: String,
    pub meta_critic_model: String,
    pub max_rounds: usize,
    pub stop_threshold: u32,
    pub critic_role: String,
    pub refiner_role: String,
    pub meta_critic_role: Option<String>,
    pub multi_critic_roles: Option<Vec<String>>,
    pub disable_meta_critic: bool,
    pub dry_run: bool,
    pub critique_timeout_secs: f64,
    #[serde(default)]
    pub brainstorm_rounds: usize,
}

impl From<&RunConfig> for ConfigUsed {
    fn from(config: &RunConfig) -> Self {
        Self {
            generator_model: config.generator_model().to_string(),
            critic_model: config.critic_model().to_string(),
            refiner_model: config.refiner_model().to_string(),
            meta_critic_model: config.meta_critic_model().to_string(),
            max_rounds: config.max_rounds(),
            stop_threshold: config.stop_threshold(),
            critic_role: config.critic_role().to_string(),
            refiner_role: config.refiner_role().to_string(),
            meta_critic_role: config.meta_critic_role().map(str::to_string),
            multi_critic_roles: config.multi_critic_roles().map(<[String]>::to_vec),
            disable_meta_critic: config.disable_meta_critic(),
            dry_run: config.dry_run(),
            critique_timeout_secs: config.critique_timeout().as_secs_f64(),
            brainstorm_rounds: config.brainstorm().map(|b| b.rounds).unwrap_or(0),
        }
    }
}

/// Structured record of one critique-refine run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub original_user_prompt: String,
    pub initial_generation: Option<InitialGeneration>,
    pub critiques: Vec<CritiqueRecord>,
    pub refinements: Vec<RefinementRecord>,
    pub reason_for_stopping: Option<StopReason>,
    pub final_output: String,
    pub runtime_secs: f64,
    pub config_used: ConfigUsed,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RunLog {
    pub fn new(prompt: impl Into<String>, config: &RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            original_user_prompt: prompt.into(),
            config_used: ConfigUsed::from(config),
            ..Self::default()
        }
    }

    /// Attach extra typed data; values that fail to serialize are skipped
    pub fn insert_metadata<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
    }

    pub fn rounds_completed(&self) -> usize {
        self.critiques.len()
    }

    pub fn stop_reason_text(&self) -> String {
        self.reason_for_stopping
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}
