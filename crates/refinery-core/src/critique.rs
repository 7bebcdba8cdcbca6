use futures::future::try_join_all;
use refinery_critic::{LoopPrompts, RoleTemplateStore};
use refinery_model::{ModelInvoker, ModelRequest, ModelRole};
use tracing::{debug, warn};

use crate::{LoopError, RunConfig};

/// Combined critique for one round
#[derive(Debug, Clone, PartialEq)]
pub struct Critique {
    pub text: String,
    pub roles_used: Vec<String>,
}

/// Fans the current text out to every configured critic role.
///
/// Sub-requests are polled together inside one timeout; the phase either
/// returns every critique in configured role order or fails as a whole.
pub struct CritiquePhase<'a> {
    invoker: &'a dyn ModelInvoker,
    templates: &'a dyn RoleTemplateStore,
    config: &'a RunConfig,
}

impl<'a> CritiquePhase<'a> {
    pub fn new(
        invoker: &'a dyn ModelInvoker,
        templates: &'a dyn RoleTemplateStore,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            invoker,
            templates,
            config,
        }
    }

    pub async fn run(&self, text: &str) -> Result<Critique, LoopError> {
        let roles = self.config.critic_roles();
        let limit = self.config.critique_timeout();

        debug!(roles = ?roles, timeout_secs = limit.as_secs_f64(), "Requesting critiques");

        let requests = roles.iter().map(|role| self.critique_as(role, text));
        let critiques = tokio::time::timeout(limit, try_join_all(requests))
            .await
            .map_err(|_| {
                warn!(timeout_secs = limit.as_secs_f64(), "Critique fan-out timed out");
                LoopError::Timeout(limit)
            })??;

        Ok(Critique {
            text: LoopPrompts::combine_critiques(&critiques),
            roles_used: roles.to_vec(),
        })
    }

    async fn critique_as(&self, role: &str, text: &str) -> Result<String, LoopError> {
        let template = self.templates.load(role).map_err(|e| {
            LoopError::CritiquePhase(format!("one or more templates failed to load: {}", e))
        })?;

        let request = ModelRequest::new(ModelRole::Critic, self.config.critic_model(), text)
            .with_system_prompt(template)
            .with_dry_run(self.config.dry_run())
            .with_options(self.config.options().clone());

        let response = self.invoker.call(&request).await.map_err(|e| {
            LoopError::CritiquePhase(format!("critic role '{}' failed: {}", role, e))
        })?;
        debug!(role, "Critique received");
        Ok(response.into_text())
    }
}
