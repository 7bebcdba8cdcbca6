use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured events emitted by the critique-refine loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        run_id: String,
        prompt: String,
        max_rounds: usize,
        critic_roles: Vec<String>,
        dry_run: bool,
    },
    GenerationCompleted {
        model_used: String,
        provided: bool,
        chars: usize,
    },
    BrainstormCompleted {
        pass: usize,
        model_used: String,
        chars: usize,
    },
    RoundStarted {
        round: usize,
    },
    CritiqueObtained {
        round: usize,
        model_used: String,
        roles_used: Vec<String>,
        chars: usize,
    },
    GateDecision {
        round: usize,
        actionable: bool,
        decision: String,
    },
    RefinementObtained {
        round: usize,
        model_used: String,
        role_used: String,
        chars: usize,
    },
    ErrorEncountered {
        round: Option<usize>,
        error: String,
    },
    RunStopped {
        reason: String,
        rounds: usize,
        duration_secs: f64,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Receives loop events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &LogEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LogEvent) {}
}

/// Keeps events in memory, in emission order
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &LogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Console (and optional file) renderer for loop events
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::RunStarted {
                prompt,
                max_rounds,
                critic_roles,
                dry_run,
                ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╭─────────────────────────────────────────────────────────────────────╮"
                        .bright_blue()
                );
                let title = if *dry_run { "refinery (dry run)" } else { "refinery" };
                let _ = writeln!(
                    stderr,
                    "{}  {}",
                    "│".bright_blue(),
                    title.bold().bright_white()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Prompt:".dimmed(),
                    truncate(prompt, 60).dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}  {} {}",
                    "│".bright_blue(),
                    "Rounds:".dimmed(),
                    max_rounds,
                    "Critics:".dimmed(),
                    critic_roles.join(", ")
                );
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╰─────────────────────────────────────────────────────────────────────╯"
                        .bright_blue()
                );
                let _ = writeln!(stderr);
            }
            LogEvent::GenerationCompleted {
                model_used,
                provided,
                chars,
            } => {
                let source = if *provided {
                    "Using provided content".to_string()
                } else {
                    format!("Generated with {}", model_used)
                };
                let _ = writeln!(
                    stderr,
                    "  {} {} ({} chars)",
                    "✓".bright_green(),
                    source,
                    chars
                );
                let _ = writeln!(stderr);
            }
            LogEvent::BrainstormCompleted {
                pass, model_used, ..
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} Brainstorm pass {} ({})",
                    "✦".bright_cyan(),
                    pass,
                    model_used.dimmed()
                );
            }
            LogEvent::RoundStarted { round } => {
                let text = format!("─ Round {} ", round);
                let padding = "─".repeat(67usize.saturating_sub(text.chars().count()));
                let _ = writeln!(
                    stderr,
                    "{}{}{}",
                    "┌".bright_blue(),
                    text.bright_blue().bold(),
                    padding.bright_blue()
                );
            }
            LogEvent::CritiqueObtained {
                model_used,
                roles_used,
                chars,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {} [{}] ({} chars)",
                    "▶".bright_magenta(),
                    "CRITIQUE".bright_magenta().bold(),
                    model_used.dimmed(),
                    roles_used.join(", "),
                    chars
                );
            }
            LogEvent::GateDecision {
                actionable,
                decision,
                ..
            } => {
                let styled = if *actionable {
                    format!("→ Gate: {}", decision).bright_yellow().to_string()
                } else {
                    format!("■ Gate: {}", decision).bright_green().to_string()
                };
                let _ = writeln!(stderr, "    {}", styled);
            }
            LogEvent::RefinementObtained {
                model_used,
                role_used,
                chars,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {} [{}] ({} chars)",
                    "▶".bright_cyan(),
                    "REFINE".bright_cyan().bold(),
                    model_used.dimmed(),
                    role_used,
                    chars
                );
                let _ = writeln!(
                    stderr,
                    "{}",
                    "└─────────────────────────────────────────────────────────────────────┘"
                        .bright_blue()
                );
                let _ = writeln!(stderr);
            }
            LogEvent::ErrorEncountered { round, error } => {
                let _ = writeln!(stderr);
                match round {
                    Some(round) => {
                        let _ = writeln!(
                            stderr,
                            "{} Error in round {}: {}",
                            "✗".bright_red(),
                            round,
                            error.bright_red()
                        );
                    }
                    None => {
                        let _ = writeln!(
                            stderr,
                            "{} Error: {}",
                            "✗".bright_red(),
                            error.bright_red()
                        );
                    }
                }
            }
            LogEvent::RunStopped { .. } => {
                // Printed by the caller together with the final output
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::RunStarted { max_rounds, .. } => {
                format!("[{}] run:start max_rounds={}", timestamp, max_rounds)
            }
            LogEvent::GenerationCompleted {
                model_used, chars, ..
            } => format!("[{}] generate:done {} {}c", timestamp, model_used, chars),
            LogEvent::BrainstormCompleted { pass, .. } => {
                format!("[{}] brainstorm:{}", timestamp, pass)
            }
            LogEvent::RoundStarted { round } => format!("[{}] round:start:{}", timestamp, round),
            LogEvent::CritiqueObtained {
                round, roles_used, ..
            } => format!(
                "[{}] critique:{} roles={}",
                timestamp,
                round,
                roles_used.join(",")
            ),
            LogEvent::GateDecision {
                round, actionable, ..
            } => format!("[{}] gate:{} actionable={}", timestamp, round, actionable),
            LogEvent::RefinementObtained { round, chars, .. } => {
                format!("[{}] refine:{} {}c", timestamp, round, chars)
            }
            LogEvent::ErrorEncountered { round, error } => match round {
                Some(round) => format!("[{}] error:{}:{}", timestamp, round, error),
                None => format!("[{}] error:{}", timestamp, error),
            },
            LogEvent::RunStopped {
                reason,
                rounds,
                duration_secs,
            } => format!(
                "[{}] run:stop:{} {:.1}s {}",
                timestamp, rounds, duration_secs, reason
            ),
        };
        let _ = writeln!(stderr, "{}", msg);
    }
}

impl EventSink for Logger {
    fn emit(&self, event: &LogEvent) {
        self.log(event);
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_tag() {
        let event = LogEvent::GateDecision {
            round: 2,
            actionable: false,
            decision: "NOT ACTIONABLE".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "gate_decision");
        assert_eq!(json["round"], 2);
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.emit(&LogEvent::RoundStarted { round: 1 });
        sink.emit(&LogEvent::RoundStarted { round: 2 });
        assert_eq!(
            sink.events(),
            vec![
                LogEvent::RoundStarted { round: 1 },
                LogEvent::RoundStarted { round: 2 }
            ]
        );
    }

    #[test]
    fn test_file_output_is_timestamped_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events").join("run.jsonl");
        let logger = Logger::with_file(LogFormat::Compact, &path).unwrap();

        logger.emit(&LogEvent::RoundStarted { round: 1 });

        let content = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(line["event"], "round_started");
        assert!(line.get("timestamp").is_some());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(truncate("abcdef", 5), "ab...");
    }
}
