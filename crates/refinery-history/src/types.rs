use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One persisted run, condensed for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    /// Stem of the file the run was read from
    pub file: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub prompt_preview: String,
    pub stop_kind: Option<String>,
    pub reason: String,
    pub critiques: usize,
    pub refinements: usize,
    pub runtime_secs: f64,
    pub exit_code: Option<i32>,
}

/// Filter parameters for listing runs.
#[derive(Debug, Default)]
pub struct RunFilter {
    /// Stop reason kind, e.g. `timeout` or `non_actionable`
    pub stop_kind: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

/// Patterns found across recent runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insights {
    pub runs_analyzed: usize,
    /// Most frequent stop reason and how many runs ended with it
    pub most_common_reason: Option<(String, usize)>,
    pub short_critiques: bool,
}

impl Insights {
    /// Render the findings as improvement suggestions
    pub fn report(&self) -> String {
        if self.runs_analyzed == 0 {
            return "No past review logs found for analysis.".to_string();
        }

        let mut suggestions = Vec::new();
        if let Some((reason, _)) = &self.most_common_reason {
            suggestions.push(format!(
                "- The most common reason for stopping in recent runs was: '{}'. Consider adjusting `max_rounds` or `stop_threshold`, or improving the relevant role prompts.",
                reason
            ));
        }
        if self.short_critiques {
            suggestions.push(
                "- Some critiques are very short. Review the meta-critic or critic role prompts to encourage more detailed and actionable feedback."
                    .to_string(),
            );
        }

        if suggestions.is_empty() {
            return "Analysis of recent logs did not reveal immediate tool improvement suggestions."
                .to_string();
        }

        format!(
            "Based on recent review logs, here are some potential areas for tool improvement:\n{}",
            suggestions.join("\n")
        )
    }
}
