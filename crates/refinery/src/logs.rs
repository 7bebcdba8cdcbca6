use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use refinery_core::{RunLog, StopReason};
use refinery_history::{RunFilter, RunStore, RunSummary};

#[derive(Subcommand, Debug)]
pub enum LogsAction {
    /// List past runs, newest first
    List {
        /// Filter by stop reason (non_actionable, max_rounds_reached, timeout, error)
        #[arg(long)]
        reason: Option<String>,

        /// Show runs after this date (YYYY-MM-DD)
        #[arg(long)]
        after: Option<String>,

        /// Show runs before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,

        /// Search prompt text
        #[arg(long)]
        search: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every run in a log file, or one run by id prefix
    Show {
        /// Log file stem or run id prefix
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Suggest tool improvements from recent runs
    Insights {
        /// Number of recent runs to analyze
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Move old log files into the archive directory
    Archive {
        /// Archive files older than this many days
        #[arg(long)]
        days: Option<u64>,
    },
}

/// Defaults for the `logs` subcommands taken from the project configuration
pub struct LogsDefaults<'a> {
    pub insights_limit: usize,
    pub archive_days: u64,
    pub archive_dir: &'a Path,
}

pub fn handle_logs_command(
    action: LogsAction,
    store: &RunStore,
    defaults: LogsDefaults<'_>,
) -> Result<()> {
    match action {
        LogsAction::List {
            reason,
            after,
            before,
            search,
            json,
        } => {
            let filter = build_filter(reason, after, before, search)?;
            let summaries = store.list(&filter)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if summaries.is_empty() {
                println!("{}", "No runs found.".dimmed());
            } else {
                print_runs_table(&summaries);
            }
        }
        LogsAction::Show { id, json } => {
            let runs = store.get(&id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else {
                for (index, run) in runs.iter().enumerate() {
                    if index > 0 {
                        println!();
                    }
                    print_run_detail(run);
                }
            }
        }
        LogsAction::Insights { limit } => {
            let insights = store.insights(limit.unwrap_or(defaults.insights_limit))?;
            println!("{}", insights.report());
        }
        LogsAction::Archive { days } => {
            let days = days.unwrap_or(defaults.archive_days);
            let archived = store.archive_older_than(days, defaults.archive_dir)?;

            if archived.is_empty() {
                println!(
                    "{}",
                    format!("No log files older than {} days.", days).dimmed()
                );
            } else {
                for path in &archived {
                    println!("Archived: {}", path.display());
                }
            }
        }
    }

    Ok(())
}

fn build_filter(
    reason: Option<String>,
    after: Option<String>,
    before: Option<String>,
    search: Option<String>,
) -> Result<RunFilter> {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    let parse_day = |flag: &str, value: &str, time: NaiveTime| {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(|d| Utc.from_utc_datetime(&d.and_time(time)))
            .map_err(|e| anyhow::anyhow!("Invalid --{} date: {}", flag, e))
    };

    let after = after
        .map(|s| parse_day("after", &s, NaiveTime::MIN))
        .transpose()?;

    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    let before = before
        .map(|s| parse_day("before", &s, end_of_day))
        .transpose()?;

    Ok(RunFilter {
        stop_kind: reason,
        after,
        before,
        search,
    })
}

fn colored_kind(kind: &str) -> String {
    match kind {
        "non_actionable" | "max_rounds_reached" => kind.bright_green().to_string(),
        "timeout" => kind.bright_yellow().to_string(),
        "error" => kind.bright_red().to_string(),
        _ => kind.dimmed().to_string(),
    }
}

fn print_runs_table(summaries: &[RunSummary]) {
    println!(
        "{:<20} {:<10} {:<20} {:<7} {:<8} {}",
        "TIMESTAMP".dimmed(),
        "RUN".dimmed(),
        "STOP".dimmed(),
        "ROUNDS".dimmed(),
        "RUNTIME".dimmed(),
        "PROMPT".dimmed(),
    );

    for s in summaries {
        let ts = s.timestamp.format("%Y-%m-%d %H:%M").to_string();
        let kind = s.stop_kind.as_deref().unwrap_or("unknown");
        let prompt: String = if s.prompt_preview.chars().count() > 50 {
            format!("{}...", s.prompt_preview.chars().take(50).collect::<String>())
        } else {
            s.prompt_preview.clone()
        };

        println!(
            "{:<20} {:<10} {:<20} {:<7} {:<8} {}",
            ts,
            &s.id[..s.id.len().min(8)],
            colored_kind(kind),
            s.critiques,
            format_duration(s.runtime_secs),
            prompt
        );
    }
}

fn print_run_detail(run: &RunLog) {
    println!("{}", "=== Run Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), run.run_id);
    println!(
        "{}  {}",
        "Started:".dimmed(),
        run.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "{}  {}",
        "Runtime:".dimmed(),
        format_duration(run.runtime_secs)
    );
    let config = &run.config_used;
    println!("{}  {}", "Generator:".dimmed(), config.generator_model);
    println!("{}  {}", "Critic:".dimmed(), config.critic_model);
    println!("{}  {}", "Refiner:".dimmed(), config.refiner_model);
    println!("{}  {}", "Meta-critic:".dimmed(), config.meta_critic_model);
    println!();
    println!("{}", "Prompt:".dimmed());
    println!("  {}", run.original_user_prompt);
    println!();

    match &run.reason_for_stopping {
        Some(reason) => println!(
            "{}  {} ({})",
            "Stopped:".dimmed(),
            colored_kind(reason.kind()),
            reason
        ),
        None => println!("{}  {}", "Stopped:".dimmed(), "unknown".dimmed()),
    }
    if let Some(StopReason::Error { message, .. }) = &run.reason_for_stopping {
        println!("{}  {}", "Error:".dimmed(), message.bright_red());
    }

    if !run.critiques.is_empty() {
        println!();
        println!(
            "{}",
            format!("--- Rounds ({}) ---", run.critiques.len()).dimmed()
        );
        for critique in &run.critiques {
            println!();
            println!(
                "  {} {} [{}]",
                format!("[{}]", critique.round).bright_blue(),
                critique.model_used,
                critique.roles_used.join(", ")
            );
            println!("    {} {}", "Critique:".dimmed(), preview(&critique.text));
            if let Some(refinement) = run.refinements.iter().find(|r| r.round == critique.round) {
                println!("    {} {}", "Refined:".dimmed(), preview(&refinement.text));
            }
        }
    }

    println!();
    println!("{}", "Final output:".dimmed());
    println!("{}", run.final_output);
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 120 {
        format!("{}...", flat.chars().take(120).collect::<String>())
    } else {
        flat
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    }
}
