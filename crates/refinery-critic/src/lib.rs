//! Critique-side collaborators for the refinement loop: role templates,
//! meta-critic verdicts and the actionability gate built on them.

mod gate;
mod prompts;
mod roles;
mod verdict;

pub use gate::{ActionabilityGate, GateDecision, GateSettings};
pub use prompts::LoopPrompts;
pub use roles::{FileTemplateStore, InMemoryTemplateStore, RoleTemplateStore, TemplateError};
pub use verdict::{ActionabilityVerdict, VerdictParseError};
