use refinery_logging::RunLogWriter;
use std::time::Instant;
use tracing::{error, info};

use crate::{RunLog, StopReason};

/// Stop message recorded when a run is dropped before it finishes
pub const INTERRUPTED_MESSAGE: &str = "run interrupted before completion";

/// Persists finished run logs.
///
/// Persistence problems are the implementor's to report; the engine never
/// fails a run because its log could not be stored.
pub trait RunLogger: Send + Sync {
    fn persist(&self, log: &RunLog);
}

/// Drops run logs
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRunLogger;

impl RunLogger for NullRunLogger {
    fn persist(&self, _log: &RunLog) {}
}

impl RunLogger for RunLogWriter {
    fn persist(&self, log: &RunLog) {
        let record = match serde_json::to_value(log) {
            Ok(record) => record,
            Err(e) => {
                error!(run_id = %log.run_id, error = %e, "Failed to serialize run log");
                return;
            }
        };

        match self.write(&log.original_user_prompt, log.timestamp, &record) {
            Ok(path) => info!(run_id = %log.run_id, path = %path.display(), "Run log saved"),
            Err(e) => error!(run_id = %log.run_id, error = %e, "Failed to write run log"),
        }
    }
}

/// Owns the in-progress run log and guarantees it reaches the [`RunLogger`].
///
/// [`finish`](RunGuard::finish) persists a completed run. A guard dropped
/// without finishing (early return, panic, cancelled future) persists what it
/// has with an empty final output and an error stop reason.
pub struct RunGuard<'a> {
    log: RunLog,
    logger: &'a dyn RunLogger,
    started: Instant,
    persisted: bool,
}

impl<'a> RunGuard<'a> {
    pub fn new(log: RunLog, logger: &'a dyn RunLogger) -> Self {
        Self {
            log,
            logger,
            started: Instant::now(),
            persisted: false,
        }
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut RunLog {
        &mut self.log
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Record the outcome, persist, and hand the log back
    pub fn finish(mut self, final_output: String, reason: StopReason) -> RunLog {
        self.log.final_output = final_output;
        self.log.reason_for_stopping = Some(reason);
        self.persist();
        std::mem::take(&mut self.log)
    }

    /// Record an unrecoverable failure and persist
    pub fn abort(mut self, reason: StopReason) {
        self.log.final_output.clear();
        self.log.reason_for_stopping = Some(reason);
        self.persist();
    }

    fn persist(&mut self) {
        self.log.runtime_secs = self.elapsed_secs();
        self.logger.persist(&self.log);
        self.persisted = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.log.final_output.clear();
        if self.log.reason_for_stopping.is_none() {
            self.log.reason_for_stopping = Some(StopReason::Error {
                round: None,
                message: INTERRUPTED_MESSAGE.to_string(),
            });
        }
        self.persist();
    }
}
