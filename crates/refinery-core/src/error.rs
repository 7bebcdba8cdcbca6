use refinery_critic::TemplateError;
use refinery_model::ModelCallError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Initial generation failed: {0}")]
    Generation(#[source] ModelCallError),

    #[error("One or more templates failed to load: {source}")]
    TemplateResolution {
        role: String,
        #[source]
        source: TemplateError,
    },

    #[error("Critique phase failed: {0}")]
    CritiquePhase(String),

    #[error("Model call failed: {0}")]
    ModelCall(#[from] ModelCallError),

    #[error("Critique timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}
