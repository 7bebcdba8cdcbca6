use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output captured from a backend process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Combined stdout output
    pub stdout: String,
    /// Combined stderr output
    pub stderr: String,
    /// Exit code from the process
    pub exit_code: i32,
    /// Duration of execution
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn new(stdout: String, stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            duration,
        }
    }

    /// Check if the process exited successfully
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short description of a failed run, preferring stderr
    pub fn failure_message(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        let detail: String = detail.chars().take(500).collect();
        format!("exited with code {}: {}", self.exit_code, detail)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_stderr() {
        let output = ProcessOutput::new(
            "partial".into(),
            "rate limited\n".into(),
            1,
            Duration::from_secs(1),
        );
        assert!(!output.success());
        assert_eq!(output.failure_message(), "exited with code 1: rate limited");

        let output = ProcessOutput::new("only stdout".into(), String::new(), 2, Duration::ZERO);
        assert_eq!(output.failure_message(), "exited with code 2: only stdout");
    }
}
