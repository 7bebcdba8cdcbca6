use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use refinery_critic::{ActionabilityGate, GateSettings, LoopPrompts, RoleTemplateStore};
use refinery_logging::{EventSink, LogEvent, NullSink};
use refinery_model::{ModelInvoker, ModelRequest, ModelRole};

use crate::critique::CritiquePhase;
use crate::guard::{RunGuard, RunLogger};
use crate::run_log::{CritiqueRecord, InitialGeneration, RefinementRecord, RunLog, StopReason};
use crate::{LoopError, RunConfig};

/// What a single round produced
enum RoundOutcome {
    Refined(String),
    NotActionable,
}

/// Drives generate, critique, gate and refine until a stop condition fires.
///
/// One instance serves one run at a time; it holds no per-run state, so the
/// same engine can be reused sequentially.
pub struct CritiqueRefineLoop<'a> {
    config: RunConfig,
    invoker: &'a dyn ModelInvoker,
    templates: &'a dyn RoleTemplateStore,
    run_logger: &'a dyn RunLogger,
    events: Arc<dyn EventSink>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl<'a> CritiqueRefineLoop<'a> {
    pub fn new(
        config: RunConfig,
        invoker: &'a dyn ModelInvoker,
        templates: &'a dyn RoleTemplateStore,
        run_logger: &'a dyn RunLogger,
    ) -> Self {
        Self {
            config,
            invoker,
            templates,
            run_logger,
            events: Arc::new(NullSink),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Extra data copied into every run log this engine produces
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the loop on `prompt`, reviewing `content` instead of generating when given.
    ///
    /// Failures inside a round stop the loop gracefully and are reported in the
    /// returned log. Failures before any text exists are returned as errors;
    /// the run log is persisted either way.
    pub async fn run(
        &self,
        prompt: &str,
        content: Option<&str>,
    ) -> Result<(String, RunLog), LoopError> {
        let mut log = RunLog::new(prompt, &self.config);
        log.metadata = self.metadata.clone();
        let mut guard = RunGuard::new(log, self.run_logger);

        self.emit(LogEvent::RunStarted {
            run_id: guard.log().run_id.to_string(),
            prompt: prompt.to_string(),
            max_rounds: self.config.max_rounds(),
            critic_roles: self.config.critic_roles().to_vec(),
            dry_run: self.config.dry_run(),
        });

        let initial = match self.initial_text(prompt, content).await {
            Ok(initial) => initial,
            Err(e) => return Err(self.abort(guard, e)),
        };
        let text = initial.text.clone();
        guard.log_mut().initial_generation = Some(initial);

        let text = match self.brainstorm(&mut guard, text).await {
            Ok(text) => text,
            Err(e) => return Err(self.abort(guard, e)),
        };

        let (final_output, reason) = self.run_rounds(&mut guard, text).await;

        info!(reason = %reason, rounds = guard.log().rounds_completed(), "Run stopped");
        self.emit(LogEvent::RunStopped {
            reason: reason.to_string(),
            rounds: guard.log().rounds_completed(),
            duration_secs: guard.elapsed_secs(),
        });

        let log = guard.finish(final_output.clone(), reason);
        Ok((final_output, log))
    }

    async fn initial_text(
        &self,
        prompt: &str,
        content: Option<&str>,
    ) -> Result<InitialGeneration, LoopError> {
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            debug!(chars = content.len(), "Using provided content");
            self.emit(LogEvent::GenerationCompleted {
                model_used: crate::PROVIDED_CONTENT_MARKER.to_string(),
                provided: true,
                chars: content.len(),
            });
            return Ok(InitialGeneration::provided(content));
        }

        let model = self.config.generator_model();
        let request = self.request(
            ModelRole::Generator,
            model,
            LoopPrompts::generation_prompt(prompt),
        );
        let text = self
            .invoker
            .call(&request)
            .await
            .map_err(LoopError::Generation)?
            .into_text();

        self.emit(LogEvent::GenerationCompleted {
            model_used: model.to_string(),
            provided: false,
            chars: text.len(),
        });

        Ok(InitialGeneration {
            text,
            model_used: model.to_string(),
        })
    }

    async fn brainstorm(
        &self,
        guard: &mut RunGuard<'_>,
        text: String,
    ) -> Result<String, LoopError> {
        let Some(brainstorm) = self.config.brainstorm() else {
            return Ok(text);
        };

        let template = self.load_template(&brainstorm.role)?;
        let model = self.config.generator_model();
        let mut current = text;

        for pass in 1..=brainstorm.rounds {
            debug!(pass, "Brainstorm pass");
            let request = self
                .request(ModelRole::Brainstormer, model, current)
                .with_system_prompt(template.clone());
            current = self.invoker.call(&request).await?.into_text();

            self.emit(LogEvent::BrainstormCompleted {
                pass,
                model_used: model.to_string(),
                chars: current.len(),
            });
        }

        guard
            .log_mut()
            .insert_metadata("brainstorm_passes", brainstorm.rounds);
        Ok(current)
    }

    async fn run_rounds(
        &self,
        guard: &mut RunGuard<'_>,
        mut text: String,
    ) -> (String, StopReason) {
        for round in 1..=self.config.max_rounds() {
            self.emit(LogEvent::RoundStarted { round });

            match self.run_round(guard.log_mut(), &text, round).await {
                Ok(RoundOutcome::Refined(refined)) => text = refined,
                Ok(RoundOutcome::NotActionable) => {
                    return (text, StopReason::NonActionable { round });
                }
                Err(LoopError::Timeout(limit)) => {
                    warn!(round, timeout_secs = limit.as_secs_f64(), "Round timed out");
                    self.emit(LogEvent::ErrorEncountered {
                        round: Some(round),
                        error: format!("critique timed out after {}s", limit.as_secs_f64()),
                    });
                    return (text, StopReason::Timeout { round });
                }
                Err(e) => {
                    error!(round, error = %e, "Round failed");
                    self.emit(LogEvent::ErrorEncountered {
                        round: Some(round),
                        error: e.to_string(),
                    });
                    return (
                        text,
                        StopReason::Error {
                            round: Some(round),
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        (
            text,
            StopReason::MaxRoundsReached {
                max_rounds: self.config.max_rounds(),
            },
        )
    }

    async fn run_round(
        &self,
        log: &mut RunLog,
        text: &str,
        round: usize,
    ) -> Result<RoundOutcome, LoopError> {
        let critique = CritiquePhase::new(self.invoker, self.templates, &self.config)
            .run(text)
            .await?;

        let critic_model = self.config.critic_model();
        self.emit(LogEvent::CritiqueObtained {
            round,
            model_used: critic_model.to_string(),
            roles_used: critique.roles_used.clone(),
            chars: critique.text.len(),
        });
        log.critiques.push(CritiqueRecord {
            round,
            text: critique.text.clone(),
            model_used: critic_model.to_string(),
            roles_used: critique.roles_used,
        });

        let gate = ActionabilityGate::new(self.invoker, self.templates);
        let decision = gate
            .evaluate(
                &critique.text,
                GateSettings {
                    model: self.config.meta_critic_model(),
                    template_role: self.config.meta_critic_role(),
                    disabled: self.config.disable_meta_critic(),
                    dry_run: self.config.dry_run(),
                    options: self.config.options(),
                },
            )
            .await;

        self.emit(LogEvent::GateDecision {
            round,
            actionable: decision.is_actionable(),
            decision: decision.short_description(),
        });
        if !decision.is_actionable() {
            return Ok(RoundOutcome::NotActionable);
        }

        let refined = self.refine(text, &critique.text).await?;

        let refiner_model = self.config.refiner_model();
        self.emit(LogEvent::RefinementObtained {
            round,
            model_used: refiner_model.to_string(),
            role_used: self.config.refiner_role().to_string(),
            chars: refined.len(),
        });
        log.refinements.push(RefinementRecord {
            round,
            text: refined.clone(),
            model_used: refiner_model.to_string(),
            role_used: self.config.refiner_role().to_string(),
        });

        Ok(RoundOutcome::Refined(refined))
    }

    async fn refine(&self, text: &str, critique: &str) -> Result<String, LoopError> {
        let template = self.load_template(self.config.refiner_role())?;
        let request = self
            .request(
                ModelRole::Refiner,
                self.config.refiner_model(),
                LoopPrompts::refinement_prompt(text, critique),
            )
            .with_system_prompt(template);

        Ok(self.invoker.call(&request).await?.into_text())
    }

    fn load_template(&self, role: &str) -> Result<String, LoopError> {
        self.templates
            .load(role)
            .map_err(|source| LoopError::TemplateResolution {
                role: role.to_string(),
                source,
            })
    }

    fn request(&self, role: ModelRole, model: &str, prompt: String) -> ModelRequest {
        ModelRequest::new(role, model, prompt)
            .with_dry_run(self.config.dry_run())
            .with_options(self.config.options().clone())
    }

    fn abort(&self, guard: RunGuard<'_>, e: LoopError) -> LoopError {
        error!(error = %e, "Run failed before the first round");
        self.emit(LogEvent::ErrorEncountered {
            round: None,
            error: e.to_string(),
        });
        guard.abort(StopReason::Error {
            round: None,
            message: e.to_string(),
        });
        e
    }

    fn emit(&self, event: LogEvent) {
        self.events.emit(&event);
    }
}
