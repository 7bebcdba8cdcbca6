use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ModelCallError;

/// Passthrough configuration handed to the model backend untouched
pub type ModelOptions = BTreeMap<String, serde_json::Value>;

/// Role tag attached to every model call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Generator,
    Critic,
    MetaCritic,
    Refiner,
    Brainstormer,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Generator => "generator",
            ModelRole::Critic => "critic",
            ModelRole::MetaCritic => "meta_critic",
            ModelRole::Refiner => "refiner",
            ModelRole::Brainstormer => "brainstormer",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single model invocation
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub role: ModelRole,
    pub dry_run: bool,
    pub options: ModelOptions,
}

impl ModelRequest {
    pub fn new(role: ModelRole, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            system_prompt: None,
            role,
            dry_run: false,
            options: ModelOptions::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }
}

/// What a model call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelResponse {
    Text(String),
    Structured(serde_json::Value),
}

impl ModelResponse {
    /// Render the response as text; structured results are serialized as JSON
    pub fn as_text(&self) -> String {
        match self {
            ModelResponse::Text(text) => text.clone(),
            ModelResponse::Structured(value) => value.to_string(),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ModelResponse::Text(text) => text,
            ModelResponse::Structured(value) => value.to_string(),
        }
    }
}

/// The capability to call a text-generation model
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelCallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(ModelRole::MetaCritic.to_string(), "meta_critic");
        assert_eq!(ModelRole::Generator.as_str(), "generator");
    }

    #[test]
    fn test_structured_response_renders_as_json() {
        let response = ModelResponse::Structured(serde_json::json!({"actionable": true}));
        assert_eq!(response.as_text(), r#"{"actionable":true}"#);
        assert_eq!(
            ModelResponse::Text("plain".into()).into_text(),
            "plain".to_string()
        );
    }
}
