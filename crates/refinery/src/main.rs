mod config;
mod logs;
mod review;
mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use refinery_core::{CritiqueRefineLoop, RunConfig, RunLog, StopReason};
use refinery_critic::FileTemplateStore;
use refinery_history::RunStore;
use refinery_logging::{EventSink, LogFormat, Logger, RunLogWriter};
use refinery_model::{create_backend, BackendType, ModelRouter};

use config::{
    ProjectConfig, RunOverrides, DEFAULT_ARCHIVE_DAYS, DEFAULT_INSIGHTS_LIMIT,
    DEFAULT_PRIOR_REVIEWS,
};
use logs::{handle_logs_command, LogsAction, LogsDefaults};
use review::{ReviewSettings, ReviewTool};
use serve::ToolServer;

/// Conventional exit status for a run stopped by SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "refinery",
    about = "Generate, critique and refine text with language models",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Working directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    working_dir: Option<PathBuf>,

    /// Event output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatChoice>,

    /// Diagnostic log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the critique-refine loop on a prompt or an input file
    Run(RunArgs),

    /// Review files and save the results
    Review(ReviewArgs),

    /// Serve the loop as an MCP tool over stdio
    Serve(ServeArgs),

    /// Inspect past run logs
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
}

/// Loop settings shared by `run` and `review`
#[derive(Args, Debug)]
struct LoopArgs {
    /// Strategy from refinery.toml
    #[arg(long)]
    strategy: Option<String>,

    /// Model to use for every role
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum critique-refine rounds
    #[arg(short = 'n', long)]
    max_rounds: Option<usize>,

    /// Skip the meta-critic gate
    #[arg(long)]
    no_meta_critic: bool,

    /// Critique phase time limit in seconds
    #[arg(long)]
    critique_timeout: Option<u64>,

    /// Backend used for model calls
    #[arg(long, value_enum)]
    backend: Option<BackendChoice>,

    /// Redact sensitive data from saved run logs
    #[arg(long)]
    redact_logs: bool,

    /// Return mocked responses instead of calling models
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Prompt for the initial generation
    #[arg(short, long)]
    prompt: Option<String>,

    /// Read the prompt from a file (default: ./prompt.md)
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Review this file's content instead of generating
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Critic role template
    #[arg(long)]
    critic_role: Option<String>,

    /// Refiner role template
    #[arg(long)]
    refiner_role: Option<String>,

    /// Critic roles to run together, comma separated
    #[arg(long, value_delimiter = ',')]
    multi_critic_roles: Option<Vec<String>>,

    /// Write the final output to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output the final result as JSON
    #[arg(long)]
    json_output: bool,

    #[command(flatten)]
    common: LoopArgs,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    /// Files to review
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Save the refined text as <name>.suggested.<ext> next to each file
    #[arg(long)]
    save_improvement: bool,

    #[command(flatten)]
    common: LoopArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Backend used for model calls
    #[arg(long, value_enum)]
    backend: Option<BackendChoice>,

    /// Redact sensitive data from saved run logs
    #[arg(long)]
    redact_logs: bool,

    /// Return mocked responses instead of calling models
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendChoice {
    Claude,
    Opencode,
}

impl From<BackendChoice> for BackendType {
    fn from(choice: BackendChoice) -> Self {
        match choice {
            BackendChoice::Claude => BackendType::ClaudeCode,
            BackendChoice::Opencode => BackendType::OpenCode,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

/// Everything a command needs from the environment
struct Env {
    working_dir: PathBuf,
    project: ProjectConfig,
    format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = match cli.working_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let project = ProjectConfig::load(&working_dir)?.unwrap_or_default();
    let format = project.log_format(cli.log_format.map(Into::into))?;

    // Diagnostic file logs only for commands that run the loop
    let tracing_dir = match cli.command {
        Command::Logs { .. } => None,
        _ => Some(project.log_dir(&working_dir)),
    };
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| project.log_level().to_string());
    let tracing_guard = refinery_logging::init_tracing(&level, format, tracing_dir.as_deref());

    let env = Env {
        working_dir,
        project,
        format,
    };

    let exit_code = match cli.command {
        Command::Run(args) => run_command(&env, args).await?,
        Command::Review(args) => review_command(&env, args).await?,
        Command::Serve(args) => serve_command(&env, args).await?,
        Command::Logs { action } => {
            logs_command(&env, action)?;
            0
        }
    };

    // process::exit skips destructors; flush file logs first
    drop(tracing_guard);
    std::process::exit(exit_code);
}

async fn run_command(env: &Env, args: RunArgs) -> Result<i32> {
    let content = match &args.input {
        Some(path) => Some(
            std::fs::read_to_string(env.working_dir.join(path))
                .with_context(|| format!("Failed to read input file {}", path.display()))?,
        ),
        None => None,
    };
    let prompt = get_prompt(&args, &env.working_dir, content.is_some())?;

    let overrides = RunOverrides {
        critic_role: args.critic_role.clone(),
        refiner_role: args.refiner_role.clone(),
        multi_critic_roles: args.multi_critic_roles.clone(),
        ..overrides_from(&args.common)
    };
    let config = env.project.resolve_run(&overrides)?;

    let router = build_router(env, args.common.backend)?;
    ensure_backend(&router, &config).await?;
    let templates = FileTemplateStore::new(env.project.templates_dir(&env.working_dir));
    let run_logger = run_log_writer(env, args.common.redact_logs)?;
    let events = event_sink(env)?;

    let engine = CritiqueRefineLoop::new(config, &router, &templates, &run_logger)
        .with_events(events);

    // Losing the race drops the run future; its guard saves the partial log
    let outcome = tokio::select! {
        outcome = engine.run(&prompt, content.as_deref()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", "Interrupted; run log saved.".bright_yellow());
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };
    let (final_output, log) = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{} {}", "Error:".bright_red().bold(), e);
            return Ok(2);
        }
    };

    if let Some(path) = &args.output {
        let path = env.working_dir.join(path);
        std::fs::write(&path, &final_output)
            .with_context(|| format!("Failed to write output to {}", path.display()))?;
        eprintln!("Final output written to {}", path.display());
    }

    if args.json_output {
        let json = serde_json::json!({
            "final_output": final_output,
            "reason_for_stopping": log.stop_reason_text(),
            "run_log": log,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", final_output);
        print_outcome(&log);
    }

    Ok(log
        .reason_for_stopping
        .as_ref()
        .map(StopReason::exit_code)
        .unwrap_or(2))
}

async fn review_command(env: &Env, args: ReviewArgs) -> Result<i32> {
    let review = &env.project.review;
    let overrides = RunOverrides {
        strategy: args.common.strategy.clone().or_else(|| review.strategy.clone()),
        critic_role: review.critic_role.clone(),
        refiner_role: review.refiner_role.clone(),
        ..overrides_from(&args.common)
    };
    let config = env.project.resolve_run(&overrides)?;

    let router = build_router(env, args.common.backend)?;
    ensure_backend(&router, &config).await?;
    let templates = FileTemplateStore::new(env.project.templates_dir(&env.working_dir));
    let run_logger = run_log_writer(env, args.common.redact_logs)?;
    let events = event_sink(env)?;

    let settings = ReviewSettings {
        output_dir: env.project.review_dir(&env.working_dir),
        project_context: env.project.project_context(&env.working_dir),
        prior_reviews: review.prior_reviews.unwrap_or(DEFAULT_PRIOR_REVIEWS),
        insights_limit: review.insights_limit.unwrap_or(DEFAULT_INSIGHTS_LIMIT),
        save_improvement: args.save_improvement,
    };
    let files: Vec<PathBuf> = args
        .files
        .iter()
        .map(|path| env.working_dir.join(path))
        .collect();

    let tool = ReviewTool::new(config, &router, &templates, &run_logger, events, settings);
    let results = tokio::select! {
        results = tool.run(&files) => results,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", "Interrupted; run logs saved.".bright_yellow());
            return Ok(INTERRUPTED_EXIT_CODE);
        }
    };

    println!("{}", "=== Review Results ===".bright_blue().bold());
    for line in &results {
        println!("{}", line);
    }

    let failed = results.iter().any(|line| line.starts_with("Error"));
    Ok(if failed { 2 } else { 0 })
}

async fn serve_command(env: &Env, args: ServeArgs) -> Result<i32> {
    let router = build_router(env, args.backend)?;
    if !args.dry_run && !router.backend().is_available().await {
        tracing::warn!(
            "Backend '{}' is not available; tool calls will fail until it is installed",
            router.backend().name()
        );
    }
    let templates = FileTemplateStore::new(env.project.templates_dir(&env.working_dir));
    let run_logger = run_log_writer(env, args.redact_logs)?;
    let events = event_sink(env)?;

    let server = ToolServer::new(&env.project, &router, &templates, &run_logger, events)
        .with_dry_run(args.dry_run);

    tracing::info!("Serving {} over stdio", serve::LOOP_TOOL);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        served = server.serve(stdin, tokio::io::stdout()) => served?,
        _ = tokio::signal::ctrl_c() => return Ok(INTERRUPTED_EXIT_CODE),
    }

    Ok(0)
}

fn logs_command(env: &Env, action: LogsAction) -> Result<()> {
    let store = RunStore::new(env.project.history_dirs(&env.working_dir));
    let archive_dir = env.project.archive_dir(&env.working_dir);
    let review = &env.project.review;

    handle_logs_command(
        action,
        &store,
        LogsDefaults {
            insights_limit: review.insights_limit.unwrap_or(DEFAULT_INSIGHTS_LIMIT),
            archive_days: review.archive_days.unwrap_or(DEFAULT_ARCHIVE_DAYS),
            archive_dir: &archive_dir,
        },
    )
}

fn overrides_from(args: &LoopArgs) -> RunOverrides {
    RunOverrides {
        strategy: args.strategy.clone(),
        model: args.model.clone(),
        max_rounds: args.max_rounds,
        no_meta_critic: args.no_meta_critic,
        dry_run: args.dry_run,
        critique_timeout_secs: args.critique_timeout,
        ..Default::default()
    }
}

fn build_router(env: &Env, backend: Option<BackendChoice>) -> Result<ModelRouter> {
    let backend_type = env.project.backend_type(backend.map(Into::into))?;

    let backend_config = env.project.backend_config(&env.working_dir);
    let mut router = ModelRouter::new(create_backend(backend_type), backend_config);
    if let Some(fallback) = env.project.fallback_model() {
        router = router.with_fallback(fallback);
    }

    Ok(router)
}

async fn ensure_backend(router: &ModelRouter, config: &RunConfig) -> Result<()> {
    // Dry runs and mock models never reach the backend
    let all_mock = [
        config.generator_model(),
        config.critic_model(),
        config.refiner_model(),
        config.meta_critic_model(),
    ]
    .iter()
    .all(|model| model.starts_with("mock"));

    if !config.dry_run() && !all_mock && !router.backend().is_available().await {
        anyhow::bail!(
            "Backend '{}' is not available. Make sure it's installed and in PATH.",
            router.backend().name()
        );
    }

    Ok(())
}

fn run_log_writer(env: &Env, cli_redact: bool) -> Result<RunLogWriter> {
    let writer = RunLogWriter::new(env.project.log_dir(&env.working_dir));
    Ok(match env.project.redactor(cli_redact)? {
        Some(redactor) => writer.with_redactor(redactor),
        None => writer,
    })
}

fn event_sink(env: &Env) -> Result<Arc<dyn EventSink>> {
    let logger = match env.project.events_file(&env.working_dir) {
        Some(path) => Logger::with_file(env.format, &path)
            .with_context(|| format!("Failed to open events file {}", path.display()))?,
        None => Logger::new(env.format),
    };
    Ok(Arc::new(logger))
}

fn get_prompt(args: &RunArgs, working_dir: &Path, has_content: bool) -> Result<String> {
    // Prefer --prompt flag
    if let Some(ref prompt) = args.prompt {
        return Ok(prompt.clone());
    }

    let (prompt_path, explicit) = match &args.prompt_file {
        Some(path) => (working_dir.join(path), true),
        None => (working_dir.join("prompt.md"), false),
    };

    if prompt_path.exists() {
        let content =
            std::fs::read_to_string(&prompt_path).context("Failed to read prompt file")?;
        return Ok(content.trim().to_string());
    }

    if explicit {
        anyhow::bail!("Prompt file {} not found", prompt_path.display());
    }
    // Reviewing an input file needs no prompt
    if has_content {
        return Ok(String::new());
    }

    anyhow::bail!("No prompt provided. Use --prompt, --prompt-file or create a prompt.md file")
}

fn print_outcome(log: &RunLog) {
    let Some(reason) = &log.reason_for_stopping else {
        return;
    };

    let banner = match reason {
        StopReason::NonActionable { .. } => "=== DONE ===".bright_green(),
        StopReason::MaxRoundsReached { .. } => "=== MAX ROUNDS ===".bright_yellow(),
        StopReason::Timeout { .. } => "=== TIMEOUT ===".bright_yellow(),
        StopReason::Error { .. } => "=== FAILED ===".bright_red(),
    };

    eprintln!();
    eprintln!("{}", banner);
    eprintln!("Reason for stopping: {}", reason);
    eprintln!("Rounds: {}", log.rounds_completed());
    eprintln!("Duration: {:.1}s", log.runtime_secs);
}
