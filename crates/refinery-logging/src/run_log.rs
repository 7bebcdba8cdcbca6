use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Redactor;

/// Appends finished run records as JSON lines.
///
/// Each run goes to `<log_dir>/run_<%Y%m%d_%H%M%S>_<hash>.jsonl`, where the
/// hash is the first six hex digits of the prompt's SHA-256.
#[derive(Debug, Clone)]
pub struct RunLogWriter {
    log_dir: PathBuf,
    redactor: Option<Redactor>,
}

impl RunLogWriter {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            redactor: None,
        }
    }

    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn path_for(&self, prompt: &str, timestamp: DateTime<Utc>) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let filename = format!(
            "run_{}_{}.jsonl",
            timestamp.format("%Y%m%d_%H%M%S"),
            &hash[..6]
        );
        self.log_dir.join(filename)
    }

    /// Write one record, returning the file it was appended to
    pub fn write(
        &self,
        prompt: &str,
        timestamp: DateTime<Utc>,
        record: &Value,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.log_dir)?;
        let path = self.path_for(prompt, timestamp);

        let record = match &self.redactor {
            Some(redactor) => redactor.redact(record),
            None => record.clone(),
        };
        let line = serde_json::to_string(&record)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;

        debug!(path = %path.display(), "Run log written");
        Ok(path)
    }
}
