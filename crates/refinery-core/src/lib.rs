//! The critique-refine loop engine.
//!
//! [`CritiqueRefineLoop::run`] produces an initial text, then critiques,
//! gates and refines it round by round until a [`StopReason`] fires,
//! accumulating a [`RunLog`] that is handed to a [`RunLogger`] on every exit
//! path.

mod config;
mod critique;
mod error;
mod guard;
mod loop_runner;
mod run_log;

pub use config::{
    BrainstormConfig, ConfigError, RunConfig, RunConfigBuilder, DEFAULT_CRITIQUE_TIMEOUT,
    DEFAULT_MAX_ROUNDS, DEFAULT_STOP_THRESHOLD,
};
pub use critique::{Critique, CritiquePhase};
pub use error::LoopError;
pub use guard::{NullRunLogger, RunGuard, RunLogger, INTERRUPTED_MESSAGE};
pub use loop_runner::CritiqueRefineLoop;
pub use run_log::{
    ConfigUsed, CritiqueRecord, InitialGeneration, RefinementRecord, RunLog, StopReason,
    PROVIDED_CONTENT_MARKER,
};
