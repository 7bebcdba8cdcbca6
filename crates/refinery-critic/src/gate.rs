use refinery_model::{ModelInvoker, ModelOptions, ModelRequest, ModelRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{ActionabilityVerdict, RoleTemplateStore};

/// How the meta-critic is to be consulted for one critique
#[derive(Clone, Copy)]
pub struct GateSettings<'a> {
    pub model: &'a str,
    /// Template role for the meta-critic; `None` means no gate is configured
    pub template_role: Option<&'a str>,
    pub disabled: bool,
    pub dry_run: bool,
    pub options: &'a ModelOptions,
}

/// Outcome of the actionability gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateDecision {
    /// Gate disabled or its template unavailable; the critique passes through
    Bypassed { reason: String },
    /// The meta-critic answered with a usable verdict
    Judged { verdict: ActionabilityVerdict },
    /// The meta-critic failed or answered in an unexpected shape
    Unreliable { error: String },
}

impl GateDecision {
    pub fn is_actionable(&self) -> bool {
        match self {
            GateDecision::Bypassed { .. } => true,
            GateDecision::Judged { verdict } => verdict.actionable,
            GateDecision::Unreliable { .. } => false,
        }
    }

    pub fn short_description(&self) -> String {
        match self {
            GateDecision::Bypassed { reason } => format!("BYPASSED ({})", reason),
            GateDecision::Judged { verdict } => verdict.short_description(),
            GateDecision::Unreliable { error } => format!("NOT ACTIONABLE (unreliable: {})", error),
        }
    }
}

/// Meta-critic that decides whether a critique is worth refining against.
///
/// Missing configuration opens the gate: a disabled gate or an unavailable
/// template lets the critique through. A gate that is configured but cannot
/// produce a trustworthy verdict closes it.
pub struct ActionabilityGate<'a> {
    invoker: &'a dyn ModelInvoker,
    templates: &'a dyn RoleTemplateStore,
}

impl<'a> ActionabilityGate<'a> {
    pub fn new(invoker: &'a dyn ModelInvoker, templates: &'a dyn RoleTemplateStore) -> Self {
        Self { invoker, templates }
    }

    pub async fn evaluate(&self, critique: &str, settings: GateSettings<'_>) -> GateDecision {
        if settings.disabled {
            debug!("Meta-critic disabled by configuration");
            return GateDecision::Bypassed {
                reason: "meta-critic disabled".to_string(),
            };
        }

        let Some(role) = settings.template_role else {
            warn!("No meta-critic template configured; treating critique as actionable");
            return GateDecision::Bypassed {
                reason: "no meta-critic template configured".to_string(),
            };
        };

        let template = match self.templates.load(role) {
            Ok(template) => template,
            Err(e) => {
                warn!(
                    error = %e,
                    "Meta-critic template unavailable; treating critique as actionable"
                );
                return GateDecision::Bypassed {
                    reason: e.to_string(),
                };
            }
        };

        let request = ModelRequest::new(ModelRole::MetaCritic, settings.model, critique)
            .with_system_prompt(template)
            .with_dry_run(settings.dry_run)
            .with_options(settings.options.clone());

        let response = match self.invoker.call(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Meta-critic call failed; treating critique as not actionable");
                return GateDecision::Unreliable {
                    error: e.to_string(),
                };
            }
        };

        match ActionabilityVerdict::from_response(&response) {
            Ok(verdict) => {
                info!(verdict = %verdict.short_description(), "Meta-critic verdict");
                GateDecision::Judged { verdict }
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Malformed meta-critic response; treating critique as not actionable"
                );
                GateDecision::Unreliable {
                    error: e.to_string(),
                }
            }
        }
    }
}
