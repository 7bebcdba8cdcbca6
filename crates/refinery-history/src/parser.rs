use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use refinery_core::RunLog;

use crate::types::RunSummary;

const PREVIEW_CHARS: usize = 100;

/// Whether a path looks like a persisted run log
pub fn is_run_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("jsonl") | Some("json")
    )
}

/// Parse every run stored in a file.
///
/// `.jsonl` files hold one run per line; anything else is read as a single
/// JSON document. Unparseable lines are skipped with a warning.
pub fn parse_runs(path: &Path) -> Result<Vec<RunLog>> {
    let file = File::open(path).with_context(|| format!("Failed to open run log: {:?}", path))?;

    if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
        let log: RunLog = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse run log: {:?}", path))?;
        return Ok(vec![log]);
    }

    let mut runs = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| "Failed to read line from run log")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunLog>(&line) {
            Ok(log) => runs.push(log),
            Err(e) => tracing::warn!("Skipping line {} of {:?}: {}", index + 1, path, e),
        }
    }
    Ok(runs)
}

/// Condense a run for list views.
pub fn summarize(log: &RunLog, path: &Path) -> RunSummary {
    let file = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    RunSummary {
        id: log.run_id.to_string(),
        file,
        path: path.to_path_buf(),
        timestamp: log.timestamp,
        prompt_preview: preview(&log.original_user_prompt),
        stop_kind: log.reason_for_stopping.as_ref().map(|r| r.kind().to_string()),
        reason: log.stop_reason_text(),
        critiques: log.critiques.len(),
        refinements: log.refinements.len(),
        runtime_secs: log.runtime_secs,
        exit_code: log.reason_for_stopping.as_ref().map(|r| r.exit_code()),
    }
}

fn preview(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() > PREVIEW_CHARS {
        let head: String = prompt.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        prompt.to_string()
    }
}
