//! Reading persisted refinery run logs back: listing, lookup, insights
//! across recent runs, and archival of old log files.

pub mod parser;
pub mod store;
pub mod types;

pub use parser::{parse_runs, summarize};
pub use store::{RunStore, SHORT_CRITIQUE_CHARS};
pub use types::{Insights, RunFilter, RunSummary};
