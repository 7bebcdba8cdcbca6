//! Batch self-review of files through the critique-refine loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use futures::future::join_all;

use refinery_core::{CritiqueRefineLoop, RunConfig, RunLog, RunLogger};
use refinery_critic::{RoleTemplateStore, TemplateError};
use refinery_history::RunStore;
use refinery_logging::EventSink;
use refinery_model::{ModelInvoker, ModelRequest, ModelRole};

/// Template for the optional critique of the tool itself
const SELF_IMPROVE_ROLE: &str = "self_improve_critic";

/// Where review output goes and what context is prepended
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub output_dir: PathBuf,
    pub project_context: Option<PathBuf>,
    pub prior_reviews: usize,
    pub insights_limit: usize,
    pub save_improvement: bool,
}

/// Reviews files concurrently, one engine and run log per file
pub struct ReviewTool<'a> {
    config: RunConfig,
    invoker: &'a dyn ModelInvoker,
    templates: &'a dyn RoleTemplateStore,
    run_logger: &'a dyn RunLogger,
    events: Arc<dyn EventSink>,
    settings: ReviewSettings,
}

impl<'a> ReviewTool<'a> {
    pub fn new(
        config: RunConfig,
        invoker: &'a dyn ModelInvoker,
        templates: &'a dyn RoleTemplateStore,
        run_logger: &'a dyn RunLogger,
        events: Arc<dyn EventSink>,
        settings: ReviewSettings,
    ) -> Self {
        Self {
            config,
            invoker,
            templates,
            run_logger,
            events,
            settings,
        }
    }

    /// Review every file, returning one result line per saved artifact or failure.
    ///
    /// A failing file is reported in the results; the others still complete.
    pub async fn run(&self, files: &[PathBuf]) -> Vec<String> {
        tracing::info!("Starting self-review run for {} files", files.len());

        if !self.config.dry_run() {
            if let Err(e) = tokio::fs::create_dir_all(&self.settings.output_dir).await {
                return vec![format!(
                    "Error creating review directory {}: {}",
                    self.settings.output_dir.display(),
                    e
                )];
            }
        }

        let reviews = files.iter().map(|path| self.review_one(path));
        join_all(reviews).await.into_iter().flatten().collect()
    }

    async fn review_one(&self, path: &Path) -> Vec<String> {
        match self.try_review(path).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Self-review of {} failed: {:#}", path.display(), e);
                vec![format!(
                    "Error during self-review of {}: {:#}",
                    path.display(),
                    e
                )]
            }
        }
    }

    async fn try_review(&self, path: &Path) -> Result<Vec<String>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Target file not found: {}", path.display()))?;

        let project_context = self.project_context().await;
        let prior_context = self.prior_review_context().await;
        let full_content = compose_review_content(&project_context, &prior_context, &content);

        let engine = CritiqueRefineLoop::new(
            self.config.clone(),
            self.invoker,
            self.templates,
            self.run_logger,
        )
        .with_events(self.events.clone())
        .with_metadata("reviewed_file", serde_json::json!(path.display().to_string()));

        let prompt = format!("Self-review of {}", path.display());
        let (final_output, log) = engine.run(&prompt, Some(&full_content)).await?;

        println!(
            "\n{}\n{}\n",
            format!("--- Final Output for {} ---", path.display()).bright_blue(),
            final_output
        );
        println!("Reason for stopping: {}\n", log.stop_reason_text());

        if self.config.dry_run() {
            return Ok(vec![format!(
                "Dry run mode for {}: No files saved.",
                path.display()
            )]);
        }

        let mut results = self.save_output(path, &content, &final_output, &log).await;

        if let Some(suggestions) = self
            .self_improvement_critique(path, &full_content, &final_output, &log)
            .await
        {
            println!(
                "\n{}\n{}\n",
                "--- Self-Improvement Suggestions for the Tool ---".bright_blue(),
                suggestions
            );
            results.push(format!(
                "Self-improvement suggestions generated for {}.",
                file_name(path)
            ));
        }

        Ok(results)
    }

    async fn project_context(&self) -> String {
        let Some(path) = &self.settings.project_context else {
            return String::new();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(context) => {
                tracing::info!("Loaded project context from {}", path.display());
                context
            }
            Err(e) => {
                tracing::warn!(
                    "Project context file {} unreadable ({}); proceeding without context",
                    path.display(),
                    e
                );
                String::new()
            }
        }
    }

    /// Most recent saved reviews plus suggestions drawn from past run logs
    async fn prior_review_context(&self) -> String {
        let mut parts = Vec::new();

        let dir = self.settings.output_dir.clone();
        let count = self.settings.prior_reviews;
        let reviews = tokio::task::spawn_blocking(move || latest_reviews(&dir, count))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Could not scan previous reviews: {}", e);
                Vec::new()
            });
        if !reviews.is_empty() {
            parts.push(format!(
                "--- PREVIOUS REVIEWS ---\n\n{}",
                reviews.join("\n\n---\n\n")
            ));
        }

        match self.insights_report().await {
            Ok(report) => parts.push(format!(
                "--- TOOL IMPROVEMENT SUGGESTIONS FROM PAST REVIEWS ---\n\n{}",
                report
            )),
            Err(e) => tracing::warn!("Could not analyze past reviews: {:#}", e),
        }

        parts.join("\n\n")
    }

    /// Insights over past run logs in the review directory; the scan runs on the blocking pool
    async fn insights_report(&self) -> Result<String> {
        let dir = self.settings.output_dir.clone();
        let limit = self.settings.insights_limit;
        tokio::task::spawn_blocking(move || {
            RunStore::with_dir(dir)
                .insights(limit)
                .map(|insights| insights.report())
        })
        .await
        .context("Insights task failed")?
    }

    async fn save_output(
        &self,
        path: &Path,
        original: &str,
        final_output: &str,
        log: &RunLog,
    ) -> Vec<String> {
        let mut results = Vec::new();
        let now = Local::now();
        let stamp = now.format("%Y%m%d_%H%M%S");
        let name = file_name(path);

        let review_path = self
            .settings
            .output_dir
            .join(format!("review_of_{}_{}.md", name, stamp));
        let review = format!(
            "# Self-Review of {}\n\n**Timestamp:** {}\n\n**Original Content:**\n```\n{}\n```\n\n**Critique-Refine Output:**\n{}\n",
            path.display(),
            now.to_rfc3339(),
            original,
            final_output
        );
        results.push(match tokio::fs::write(&review_path, review).await {
            Ok(()) => format!("Review saved to: {}", review_path.display()),
            Err(e) => format!("Error saving review to {}: {}", review_path.display(), e),
        });

        let log_path = self
            .settings
            .output_dir
            .join(format!("log_of_{}_{}.json", name, stamp));
        let written = match serde_json::to_string_pretty(log) {
            Ok(json) => tokio::fs::write(&log_path, json)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        results.push(match written {
            Ok(()) => format!("Structured log saved to: {}", log_path.display()),
            Err(e) => format!(
                "Error saving structured log to {}: {}",
                log_path.display(),
                e
            ),
        });

        if self.settings.save_improvement {
            let suggested_path = suggested_path(path);
            results.push(match tokio::fs::write(&suggested_path, final_output).await {
                Ok(()) => format!(
                    "Suggested improvement saved to: {}",
                    suggested_path.display()
                ),
                Err(e) => format!(
                    "Error saving suggested improvement to {}: {}",
                    suggested_path.display(),
                    e
                ),
            });
        }

        results
    }

    /// Ask for suggestions on the tool itself; skipped when no template exists
    async fn self_improvement_critique(
        &self,
        path: &Path,
        reviewed: &str,
        final_output: &str,
        log: &RunLog,
    ) -> Option<String> {
        let template = match self.templates.load(SELF_IMPROVE_ROLE) {
            Ok(template) => template,
            Err(TemplateError::NotFound { .. }) => {
                tracing::debug!("No {} template; skipping tool critique", SELF_IMPROVE_ROLE);
                return None;
            }
            Err(e) => return Some(format!("Error generating self-improvement suggestions: {}", e)),
        };

        let insights = self.insights_report().await.unwrap_or_default();
        let log_json = serde_json::to_string_pretty(log).unwrap_or_default();

        let prompt = format!(
            "Review of file: {}\n\nOriginal content:\n{}\n\nFinal refined output:\n{}\n\nRun log summary:\n{}\n\nPast review insights:\n{}\n\nBased on this information, provide concrete suggestions to improve this critique-refine tool itself (e.g., adjust strategy parameters, suggest new roles, refine prompts).",
            file_name(path),
            reviewed,
            final_output,
            log_json,
            insights
        );

        let request = ModelRequest::new(ModelRole::Critic, self.config.generator_model(), prompt)
            .with_system_prompt(template)
            .with_options(self.config.options().clone());

        match self.invoker.call(&request).await {
            Ok(response) => Some(response.into_text()),
            Err(e) => {
                tracing::error!("Self-improvement critique failed: {}", e);
                Some(format!("Error generating self-improvement suggestions: {}", e))
            }
        }
    }
}

/// Text handed to the loop for one file
pub fn compose_review_content(
    project_context: &str,
    prior_context: &str,
    content: &str,
) -> String {
    format!("{}\n\n{}\n\n---\n\n{}", project_context, prior_context, content)
}

/// `<stem>.suggested<.ext>` next to the original
pub fn suggested_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.suggested.{}", stem, ext.to_string_lossy()),
        None => format!("{}.suggested", stem),
    };
    path.with_file_name(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Contents of the newest `review_of_*.md` files in a directory
fn latest_reviews(dir: &Path, count: usize) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut reviews: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.starts_with("review_of_") && name.ends_with(".md")
        })
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .collect();
    reviews.sort_by(|a, b| b.0.cmp(&a.0));

    reviews
        .into_iter()
        .take(count)
        .filter_map(|(_, path)| match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!("Could not read review file {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use refinery_core::NullRunLogger;
    use refinery_critic::InMemoryTemplateStore;
    use refinery_logging::NullSink;
    use refinery_model::{ModelCallError, ModelResponse};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Critiques once, then the meta-critic declares the critique not actionable
    #[derive(Default)]
    struct StubInvoker {
        roles: Mutex<Vec<ModelRole>>,
    }

    #[async_trait]
    impl ModelInvoker for StubInvoker {
        async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelCallError> {
            self.roles.lock().unwrap().push(request.role);
            match request.role {
                ModelRole::MetaCritic => Ok(ModelResponse::Structured(
                    serde_json::json!({"actionable": false}),
                )),
                ModelRole::Critic if request.system_prompt.as_deref() == Some("IMPROVE") => {
                    Ok(ModelResponse::Text("add a --verbose flag".into()))
                }
                _ => Ok(ModelResponse::Text("looks fine overall".into())),
            }
        }
    }

    fn templates() -> InMemoryTemplateStore {
        InMemoryTemplateStore::new()
            .with_template("critic", "CRITIC")
            .with_template("refiner", "REFINER")
            .with_template("meta_critic", "META")
    }

    fn config(dry_run: bool) -> RunConfig {
        RunConfig::builder()
            .model("stub")
            .max_rounds(2)
            .meta_critic_role(Some("meta_critic".into()))
            .dry_run(dry_run)
            .build()
            .unwrap()
    }

    fn settings(dir: &Path, save_improvement: bool) -> ReviewSettings {
        ReviewSettings {
            output_dir: dir.join("reviews"),
            project_context: None,
            prior_reviews: 3,
            insights_limit: 5,
            save_improvement,
        }
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn test_compose_review_content() {
        assert_eq!(
            compose_review_content("CTX", "PRIOR", "fn main() {}"),
            "CTX\n\nPRIOR\n\n---\n\nfn main() {}"
        );
    }

    #[test]
    fn test_suggested_path() {
        assert_eq!(
            suggested_path(Path::new("src/main.rs")),
            PathBuf::from("src/main.suggested.rs")
        );
        assert_eq!(
            suggested_path(Path::new("NOTES")),
            PathBuf::from("NOTES.suggested")
        );
    }

    #[tokio::test]
    async fn test_review_saves_outputs() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("notes.md");
        std::fs::write(&target, "# Notes\n").unwrap();

        let invoker = StubInvoker::default();
        let store = templates();
        let tool = ReviewTool::new(
            config(false),
            &invoker,
            &store,
            &NullRunLogger,
            Arc::new(NullSink),
            settings(dir.path(), true),
        );

        let results = tool.run(&[target.clone()]).await;

        assert_eq!(results.len(), 3, "{:?}", results);
        assert!(results[0].starts_with("Review saved to:"));
        assert!(results[1].starts_with("Structured log saved to:"));
        assert!(results[2].starts_with("Suggested improvement saved to:"));

        let saved = names(&dir.path().join("reviews"));
        assert_eq!(saved.len(), 2);
        assert!(saved[0].starts_with("log_of_notes.md_") && saved[0].ends_with(".json"));
        assert!(saved[1].starts_with("review_of_notes.md_") && saved[1].ends_with(".md"));

        let review =
            std::fs::read_to_string(dir.path().join("reviews").join(&saved[1])).unwrap();
        assert!(review.starts_with(&format!("# Self-Review of {}", target.display())));
        assert!(review.contains("**Original Content:**\n```\n# Notes\n\n```"));

        let suggested = std::fs::read_to_string(dir.path().join("notes.suggested.md")).unwrap();
        assert!(suggested.ends_with("---\n\n# Notes\n"));

        let log: RunLog = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("reviews").join(&saved[0])).unwrap(),
        )
        .unwrap();
        assert_eq!(log.metadata["reviewed_file"], serde_json::json!(target.display().to_string()));
    }

    #[tokio::test]
    async fn test_prior_review_context_from_saved_reviews() {
        let dir = TempDir::new().unwrap();
        let reviews = dir.path().join("reviews");
        std::fs::create_dir_all(&reviews).unwrap();
        std::fs::write(reviews.join("review_of_a.md_20260101_000000.md"), "EARLIER").unwrap();

        let invoker = StubInvoker::default();
        let store = templates();
        let tool = ReviewTool::new(
            config(false),
            &invoker,
            &store,
            &NullRunLogger,
            Arc::new(NullSink),
            settings(dir.path(), false),
        );

        let context = tool.prior_review_context().await;

        assert!(context.starts_with("--- PREVIOUS REVIEWS ---\n\nEARLIER"), "{}", context);
        assert!(context.contains("--- TOOL IMPROVEMENT SUGGESTIONS FROM PAST REVIEWS ---"));
        assert!(context.contains("No past review logs found for analysis."));
    }

    #[tokio::test]
    async fn test_dry_run_saves_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        std::fs::write(&target, "text").unwrap();

        let invoker = StubInvoker::default();
        let store = templates();
        let tool = ReviewTool::new(
            config(true),
            &invoker,
            &store,
            &NullRunLogger,
            Arc::new(NullSink),
            settings(dir.path(), true),
        );

        let results = tool.run(&[target]).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].contains("No files saved"));
        assert!(!dir.path().join("reviews").exists());
        assert!(!dir.path().join("a.suggested.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_file_does_not_abort_others() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "content").unwrap();
        let missing = dir.path().join("missing.txt");

        let invoker = StubInvoker::default();
        let store = templates();
        let tool = ReviewTool::new(
            config(false),
            &invoker,
            &store,
            &NullRunLogger,
            Arc::new(NullSink),
            settings(dir.path(), false),
        );

        let results = tool.run(&[missing, good]).await;

        assert!(results[0].starts_with("Error during self-review of"));
        assert!(results[0].contains("missing.txt"));
        assert_eq!(results.len(), 3);
        assert!(results[1].starts_with("Review saved to:"));
    }

    #[tokio::test]
    async fn test_self_improvement_critique_when_template_exists() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.rs");
        std::fs::write(&target, "pub fn f() {}").unwrap();

        let invoker = StubInvoker::default();
        let store = templates().with_template(SELF_IMPROVE_ROLE, "IMPROVE");
        let tool = ReviewTool::new(
            config(false),
            &invoker,
            &store,
            &NullRunLogger,
            Arc::new(NullSink),
            settings(dir.path(), false),
        );

        let results = tool.run(&[target]).await;

        assert_eq!(
            results.last().map(String::as_str),
            Some("Self-improvement suggestions generated for lib.rs.")
        );
        let roles = invoker.roles.lock().unwrap();
        assert_eq!(roles.iter().filter(|r| **r == ModelRole::Critic).count(), 2);
    }

    #[test]
    fn test_latest_reviews_only_reads_review_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("review_of_a.md_1.md"), "A").unwrap();
        std::fs::write(dir.path().join("log_of_a.md_1.json"), "{}").unwrap();
        std::fs::write(dir.path().join("other.md"), "B").unwrap();

        assert_eq!(latest_reviews(dir.path(), 3), vec!["A".to_string()]);
        assert!(latest_reviews(&dir.path().join("none"), 3).is_empty());
    }
}
