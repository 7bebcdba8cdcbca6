use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, trace};

use crate::{BackendConfig, ModelCallError, ProcessOutput};

/// Utility for spawning backend processes
pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Spawn a process and capture its output, honouring the configured timeout
    pub async fn spawn(
        binary: &Path,
        args: &[&str],
        config: &BackendConfig,
    ) -> Result<ProcessOutput, ModelCallError> {
        let start = Instant::now();

        debug!(
            binary = %binary.display(),
            arg_count = args.len(),
            working_dir = %config.working_dir.display(),
            "Spawning backend process"
        );

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(&config.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null()) // Non-interactive
            .kill_on_drop(true);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdout_handle = child.stdout.take().ok_or_else(|| {
            ModelCallError::Backend {
                model: binary.display().to_string(),
                message: "stdout not captured".to_string(),
            }
        })?;
        let stderr_handle = child.stderr.take().ok_or_else(|| {
            ModelCallError::Backend {
                model: binary.display().to_string(),
                message: "stderr not captured".to_string(),
            }
        })?;

        let collect = async {
            let (stdout, stderr) = read_streams(stdout_handle, stderr_handle).await?;
            let status = child.wait().await?;
            Ok::<_, ModelCallError>((stdout, stderr, status))
        };

        let (stdout, stderr, status) = match config.timeout {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .map_err(|_| ModelCallError::Timeout(limit))??,
            None => collect.await?,
        };

        let duration = start.elapsed();

        debug!(
            exit_code = status.code().unwrap_or(-1),
            duration_ms = duration.as_millis(),
            "Backend process completed"
        );

        Ok(ProcessOutput::new(
            stdout,
            stderr,
            status.code().unwrap_or(-1),
            duration,
        ))
    }
}

/// Read both streams concurrently until stdout closes, then drain stderr
async fn read_streams(
    stdout_handle: ChildStdout,
    stderr_handle: ChildStderr,
) -> Result<(String, String), ModelCallError> {
    let mut stdout_reader = BufReader::new(stdout_handle).lines();
    let mut stderr_reader = BufReader::new(stderr_handle).lines();

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stderr_open = true;

    loop {
        tokio::select! {
            biased;

            result = stdout_reader.next_line() => {
                match result {
                    Ok(Some(line)) => {
                        trace!(line = %line, "stdout");
                        push_line(&mut stdout, &line);
                    }
                    Ok(None) => {
                        while let Ok(Some(line)) = stderr_reader.next_line().await {
                            trace!(line = %line, "stderr");
                            push_line(&mut stderr, &line);
                        }
                        break;
                    }
                    Err(e) => {
                        return Err(ModelCallError::Backend {
                            model: String::from("<process>"),
                            message: format!("Failed to read stdout: {}", e),
                        });
                    }
                }
            }
            result = stderr_reader.next_line(), if stderr_open => {
                match result {
                    Ok(Some(line)) => {
                        trace!(line = %line, "stderr");
                        push_line(&mut stderr, &line);
                    }
                    Ok(None) => {
                        stderr_open = false;
                    }
                    Err(e) => {
                        return Err(ModelCallError::Backend {
                            model: String::from("<process>"),
                            message: format!("Failed to read stderr: {}", e),
                        });
                    }
                }
            }
        }
    }

    Ok((stdout, stderr))
}

fn push_line(buffer: &mut String, line: &str) {
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(line);
}
