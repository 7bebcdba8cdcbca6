use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use refinery_core::RunLog;

use crate::parser::{is_run_file, parse_runs, summarize};
use crate::types::{Insights, RunFilter, RunSummary};

/// Critiques shorter than this are flagged by [`RunStore::insights`]
pub const SHORT_CRITIQUE_CHARS: usize = 50;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Read access to persisted run logs across one or more directories.
pub struct RunStore {
    dirs: Vec<PathBuf>,
}

impl RunStore {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Store over a single directory (useful for testing).
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dirs: vec![dir] }
    }

    /// List runs matching the given filter, newest first.
    pub fn list(&self, filter: &RunFilter) -> Result<Vec<RunSummary>> {
        let mut summaries: Vec<RunSummary> = Vec::new();

        for path in self.run_files()? {
            match parse_runs(&path) {
                Ok(runs) => summaries.extend(
                    runs.iter()
                        .map(|log| summarize(log, &path))
                        .filter(|s| self.matches_filter(s, filter)),
                ),
                Err(e) => tracing::warn!("Failed to parse run log {:?}: {}", path, e),
            }
        }

        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Full run logs for an id.
    ///
    /// The id is either a file stem, returning every run in that file, or a
    /// run id prefix of at least four characters.
    pub fn get(&self, id: &str) -> Result<Vec<RunLog>> {
        for path in self.run_files()? {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if stem == id {
                return parse_runs(&path);
            }
        }

        if id.len() >= 4 {
            let mut found = Vec::new();
            for path in self.run_files()? {
                if let Ok(runs) = parse_runs(&path) {
                    found.extend(
                        runs.into_iter()
                            .filter(|log| log.run_id.to_string().starts_with(id)),
                    );
                }
            }
            if !found.is_empty() {
                return Ok(found);
            }
        }

        anyhow::bail!("No run log found for '{}'", id)
    }

    /// Look for recurring problems in the `limit` most recent runs.
    pub fn insights(&self, limit: usize) -> Result<Insights> {
        let recent: Vec<RunLog> = {
            let mut runs = Vec::new();
            for path in self.run_files()? {
                if let Ok(logs) = parse_runs(&path) {
                    runs.extend(logs);
                }
            }
            runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            runs.truncate(limit);
            runs
        };

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        for log in &recent {
            let reason = log.stop_reason_text();
            if reason.is_empty() {
                continue;
            }
            let count = counts.entry(reason.clone()).or_insert(0);
            if *count == 0 {
                order.push(reason);
            }
            *count += 1;
        }

        // Ties go to the most recent reason
        let most_common_reason = order
            .into_iter()
            .map(|reason| {
                let count = counts.get(&reason).copied().unwrap_or(0);
                (reason, count)
            })
            .fold(None, |best: Option<(String, usize)>, candidate| match best {
                Some(best) if best.1 >= candidate.1 => Some(best),
                _ => Some(candidate),
            });

        let short_critiques = recent.iter().any(|log| {
            log.critiques
                .iter()
                .any(|c| c.text.trim().chars().count() < SHORT_CRITIQUE_CHARS)
        });

        Ok(Insights {
            runs_analyzed: recent.len(),
            most_common_reason,
            short_critiques,
        })
    }

    /// Move run logs last modified more than `days` days ago into
    /// `archive_dir/<YYYY-MM-DD>/`, returning their new locations.
    pub fn archive_older_than(&self, days: u64, archive_dir: &Path) -> Result<Vec<PathBuf>> {
        let now = SystemTime::now();
        let mut archived = Vec::new();

        for path in self.run_files()? {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .with_context(|| format!("Failed to read mtime of {:?}", path))?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age.as_secs() / SECS_PER_DAY <= days {
                continue;
            }

            let day = DateTime::<Local>::from(modified).format("%Y-%m-%d").to_string();
            let target_dir = archive_dir.join(day);
            fs::create_dir_all(&target_dir)
                .with_context(|| format!("Failed to create archive dir {:?}", target_dir))?;

            let Some(name) = path.file_name() else {
                continue;
            };
            let target = target_dir.join(name);
            match move_file(&path, &target) {
                Ok(()) => {
                    tracing::info!("Archived {:?} to {:?}", path, target);
                    archived.push(target);
                }
                Err(e) => tracing::error!("Failed to archive {:?}: {}", path, e),
            }
        }

        Ok(archived)
    }

    fn run_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in &self.dirs {
            if !dir.exists() {
                tracing::debug!("Log directory {:?} does not exist, skipping", dir);
                continue;
            }
            let entries = fs::read_dir(dir)
                .with_context(|| format!("Failed to read log dir: {:?}", dir))?;
            for entry in entries {
                let path = entry?.path();
                if path.is_file() && is_run_file(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn matches_filter(&self, summary: &RunSummary, filter: &RunFilter) -> bool {
        if let Some(ref kind) = filter.stop_kind {
            if summary.stop_kind.as_deref() != Some(kind.as_str()) {
                return false;
            }
        }

        if let Some(after) = filter.after {
            if summary.timestamp < after {
                return false;
            }
        }

        if let Some(before) = filter.before {
            if summary.timestamp > before {
                return false;
            }
        }

        if let Some(ref search) = filter.search {
            let search_lower = search.to_lowercase();
            if !summary
                .prompt_preview
                .to_lowercase()
                .contains(&search_lower)
            {
                return false;
            }
        }

        true
    }
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(from, to)?;
    fs::remove_file(from)
}
