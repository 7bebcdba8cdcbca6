//! # refinery-model
//!
//! Model invocation for the refinery critique-refine loop.
//!
//! ## Key Types
//!
//! - [`ModelInvoker`] - The capability the loop engine consumes
//! - [`ModelRouter`] - Invoker over a CLI backend with dry-run, mock and fallback handling
//! - [`ModelBackend`] - A text-generation CLI driven as a child process

mod claude;
mod invoker;
mod opencode;
mod output;
mod router;
mod spawner;
mod traits;

pub use claude::ClaudeCodeBackend;
pub use invoker::{ModelInvoker, ModelOptions, ModelRequest, ModelResponse, ModelRole};
pub use opencode::OpenCodeBackend;
pub use output::ProcessOutput;
pub use router::ModelRouter;
pub use spawner::ProcessSpawner;
pub use traits::{BackendConfig, BackendType, ModelBackend, ModelCallError};

/// Create a backend by type
pub fn create_backend(backend_type: BackendType) -> Box<dyn ModelBackend> {
    match backend_type {
        BackendType::ClaudeCode => Box::new(ClaudeCodeBackend::new()),
        BackendType::OpenCode => Box::new(OpenCodeBackend::new()),
    }
}
