//! Test execution
//!
//! `TestExecutor` is the seam between the heal loop and the browser. The
//! Playwright implementation runs the configured runner command with the JSON
//! reporter and enforces the per-run timeout and cancellation.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepwright_compiler::VerifyConfig;

use crate::error::{VerifyError, VerifyResult};
use crate::report::{parse_report, RunOutcome, RunReport};

/// One test run
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Test file, relative to `working_dir`
    pub test_file: PathBuf,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run one test file. Timeouts and cancellation are reported through
    /// `RunReport::outcome`; `Err` means the runner could not be used at all.
    async fn execute(&self, request: &ExecRequest, cancel: CancellationToken) -> VerifyResult<RunReport>;
}

/// Runs tests through the Playwright CLI
#[derive(Debug, Clone)]
pub struct PlaywrightExecutor {
    command: Vec<String>,
    kill_grace: Duration,
}

impl PlaywrightExecutor {
    pub fn new(config: &VerifyConfig) -> Self {
        Self {
            command: config.runner.clone(),
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }

    fn program(&self) -> VerifyResult<(&str, &[String])> {
        match self.command.split_first() {
            Some((program, args)) => Ok((program.as_str(), args)),
            None => Err(VerifyError::RunnerNotFound("empty runner command".to_string())),
        }
    }

    /// SIGTERM, then kill once the grace period runs out
    async fn stop(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(id) = child.id() {
                if kill(Pid::from_raw(id as i32), Signal::SIGTERM).is_ok() {
                    if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
                        return;
                    }
                    debug!("Runner ignored SIGTERM for {:?}", self.kill_grace);
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill runner: {}", e);
        }
    }
}

#[async_trait]
impl TestExecutor for PlaywrightExecutor {
    async fn execute(&self, request: &ExecRequest, cancel: CancellationToken) -> VerifyResult<RunReport> {
        let (program, args) = self.program()?;
        let started = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .arg(&request.test_file)
            .arg("--reporter=json")
            .arg("--trace=retain-on-failure")
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => VerifyError::RunnerNotFound(program.to_string()),
                _ => VerifyError::Spawn {
                    command: self.command.join(" "),
                    message: e.to_string(),
                },
            })?;

        info!("Running {}", request.test_file.display());

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(out) = stdout.as_mut() {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(err) = stderr.as_mut() {
                let _ = err.read_to_end(&mut buf).await;
            }
            buf
        });

        let interrupted = tokio::select! {
            status = tokio::time::timeout(request.timeout, child.wait()) => match status {
                Ok(status) => {
                    let status = status?;
                    debug!("Runner exited with {}", status);
                    None
                }
                Err(_) => Some(RunOutcome::TimedOut),
            },
            _ = cancel.cancelled() => Some(RunOutcome::Cancelled),
        };

        if let Some(outcome) = interrupted {
            warn!(
                "Stopping runner for {} ({:?})",
                request.test_file.display(),
                outcome
            );
            self.stop(&mut child).await;
            stdout_task.abort();
            stderr_task.abort();
            return Ok(RunReport::interrupted(outcome, started.elapsed()));
        }

        let stdout = stdout_task
            .await
            .map_err(|e| VerifyError::Join(e.to_string()))?;
        let stderr = stderr_task
            .await
            .map_err(|e| VerifyError::Join(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&stdout);
        match parse_report(&stdout) {
            Ok(report) => Ok(report),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&stderr);
                warn!("Runner produced no usable report: {}", stderr.trim());
                Err(e)
            }
        }
    }
}
