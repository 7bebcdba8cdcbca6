use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    BackendConfig, ModelBackend, ModelCallError, ModelInvoker, ModelRequest, ModelResponse,
};

/// Routes model calls to a backend, handling dry runs, mock models and fallback
pub struct ModelRouter {
    backend: Box<dyn ModelBackend>,
    config: BackendConfig,
    fallback_model: Option<String>,
}

impl ModelRouter {
    pub fn new(backend: Box<dyn ModelBackend>, config: BackendConfig) -> Self {
        Self {
            backend,
            config,
            fallback_model: None,
        }
    }

    pub fn with_fallback(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.fallback_model = if model.trim().is_empty() {
            None
        } else {
            Some(model)
        };
        self
    }

    pub fn backend(&self) -> &dyn ModelBackend {
        self.backend.as_ref()
    }

    async fn complete(
        &self,
        model: &str,
        request: &ModelRequest,
    ) -> Result<String, ModelCallError> {
        let output = self
            .backend
            .complete(
                &request.prompt,
                request.system_prompt.as_deref(),
                model,
                &request.options,
                &self.config,
            )
            .await?;

        if !output.success() {
            return Err(ModelCallError::Backend {
                model: model.to_string(),
                message: output.failure_message(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl ModelInvoker for ModelRouter {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelCallError> {
        let model = request.model.trim();
        if model.is_empty() {
            return Err(ModelCallError::NoModel);
        }

        debug!(
            role = %request.role,
            model,
            options = ?request.options,
            "Routing model call"
        );

        if request.dry_run {
            info!(model, role = %request.role, "Dry run: skipping model call");
            return Ok(ModelResponse::Text(format!(
                "DRY_RUN_RESPONSE: This is a mocked response for model {}.",
                model
            )));
        }

        if model.starts_with("mock") {
            return Ok(ModelResponse::Text(format!(
                "MOCK_RESPONSE: This is a mocked response for model {}.",
                model
            )));
        }

        match self.complete(model, request).await {
            Ok(text) => Ok(ModelResponse::Text(text)),
            Err(primary) => {
                warn!(model, error = %primary, "Model call failed");

                let fallback = match self.fallback_model.as_deref() {
                    Some(fallback) if fallback != model => fallback,
                    _ => return Err(primary),
                };

                info!(model = fallback, "Falling back to model");
                self.complete(fallback, request)
                    .await
                    .map(ModelResponse::Text)
                    .map_err(|e| ModelCallError::FallbackFailed {
                        model: model.to_string(),
                        fallback: fallback.to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }
}
