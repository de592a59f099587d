//! Shell command execution for sync steps.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest stderr/stdout tail carried into a `cui-sync` error detail.
const DETAIL_TAIL_CHARS: usize = 2000;

/// Captured result of one command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code, `-1` when killed or unavailable.
    pub exit_code: i32,
    /// Wall time.
    pub duration_ms: u64,
    /// Whether the run was cancelled before exit.
    pub interrupted: bool,
}

impl CommandOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.interrupted
    }

    /// Short failure description: the tail of stderr, else stdout, else
    /// the exit code.
    pub fn failure_detail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if source.is_empty() {
            if self.interrupted {
                return "interrupted".into();
            }
            return format!("exit code {}", self.exit_code);
        }
        tail(source, DETAIL_TAIL_CHARS).to_string()
    }
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    let start = s.char_indices().nth(skip).map_or(0, |(i, _)| i);
    &s[start..]
}

/// Runs one sync step.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through the shell in `cwd`.
    ///
    /// `Err` means the command could not be started at all; a non-zero exit
    /// is reported through [`CommandOutput::exit_code`].
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, String>;
}

/// [`CommandRunner`] backed by `sh -c`.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, String> {
        let start = Instant::now();
        let mut cmd = tokio::process::Command::new("sh");
        let _ = cmd
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        debug!(command, cwd = %cwd.display(), "spawning sync step");
        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn `{command}`: {e}"))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| format!("wait failed: {e}"))?;
                let stdout = stdout_handle.await.unwrap_or_default();
                let stderr = stderr_handle.await.unwrap_or_default();
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let exit_code = status.code().unwrap_or(-1);
                debug!(command, exit_code, duration_ms, "sync step exited");
                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code,
                    duration_ms,
                    interrupted: false,
                })
            }
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                stdout_handle.abort();
                stderr_handle.abort();
                debug!(command, "sync step cancelled");
                Ok(CommandOutput {
                    exit_code: -1,
                    duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    interrupted: true,
                    ..CommandOutput::default()
                })
            }
        }
    }
}
