// External process execution and management-tool invocation.
//
// Commands are always structured argument lists handed straight to the OS (no shell), so
// credentials and paths are never re-parsed. Failed commands are NOT retried.
//
// IMPORTANT:
// - Never log secrets (database password, generated admin password).
// - A hung process blocks the run until the runner's timeout fires.

pub mod files;
pub mod orchestrator;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::error::CaseError;
use crate::utils::logging::mask_cli_arg;

pub use orchestrator::{InstallPlan, InstallStep, InstallationOrchestrator};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn masked_args(args: &[String]) -> String {
    args.iter()
        .map(|a| mask_cli_arg(a))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run an external command once, killing it if it outlives `timeout_dur`.
///
/// Returns captured stdout/stderr even when exit code is non-zero (caller decides success).
pub async fn run_cmd_with_timeout(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();

    debug!(
        "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout entered (operation={}, program={}, args=[{}], timeout_ms={})",
        operation,
        program,
        masked_args(args),
        timeout_dur.as_millis()
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().with_context(|| {
        format!(
            "Failed to spawn command '{}' (operation={})",
            program, operation
        )
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stdout (operation={})", operation))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr (operation={})", operation))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });

    let status = match timeout(timeout_dur, child.wait()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            return Err(anyhow::Error::new(e)).with_context(|| {
                format!(
                    "Command wait failed (operation={}, program={})",
                    operation, program
                )
            });
        }
        Err(_) => {
            warn!(
                "[PHASE: installation] [STEP: cmd] Timeout reached (operation={}, program={}, timeout_ms={}); attempting to kill process",
                operation,
                program,
                timeout_dur.as_millis()
            );

            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: installation] [STEP: cmd] Failed to kill timed-out process (operation={}, program={}): {}",
                    operation, program, e
                );
            }

            // Best-effort reap (avoid zombies)
            let _ = timeout(Duration::from_secs(5), child.wait()).await;

            return Err(anyhow::anyhow!(
                "Command timed out after {}ms (operation={}, program={})",
                timeout_dur.as_millis(),
                operation,
                program
            ));
        }
    };

    let stdout_str = stdout_task
        .await
        .context("stdout join failed")?
        .context("stdout read failed")?;
    let stderr_str = stderr_task
        .await
        .context("stderr join failed")?
        .context("stderr read failed")?;

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: stdout_str,
        stderr: stderr_str,
        duration_ms: started.elapsed().as_millis(),
    };

    info!(
        "[PHASE: installation] [STEP: cmd] run_cmd_with_timeout exit (operation={}, program={}, exit_code={:?}, duration_ms={}, stdout_len={}, stderr_len={})",
        operation,
        program,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );

    Ok(out)
}

/// Process-execution collaborator. Production code uses `HostProcessRunner`; tests use stubs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], operation: &str) -> Result<CommandOutput>;
}

/// Runs commands on the host with a per-command timeout.
pub struct HostProcessRunner {
    timeout: Duration,
}

impl HostProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for HostProcessRunner {
    async fn run(&self, program: &str, args: &[String], operation: &str) -> Result<CommandOutput> {
        run_cmd_with_timeout(program, args, self.timeout, operation).await
    }
}

/// The management tool (a PHP archive) bound to the PHP runtime that executes it.
#[derive(Debug, Clone)]
pub struct ManagementTool {
    runtime: PathBuf,
    tool: PathBuf,
}

impl ManagementTool {
    pub fn new(runtime: impl Into<PathBuf>, tool: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            tool: tool.into(),
        }
    }

    pub fn runtime(&self) -> &Path {
        &self.runtime
    }

    /// Full argv after the program: `<tool> <subcommand args...> --path=<work_dir>`.
    pub fn argv(&self, args: &[String], work_dir: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(self.tool.to_string_lossy().to_string());
        argv.extend(args.iter().cloned());
        argv.push(format!("--path={}", work_dir.to_string_lossy()));
        argv
    }

    /// Run one subcommand against `work_dir`; any failure becomes `InstallationStep`.
    pub async fn invoke(
        &self,
        runner: &dyn ProcessRunner,
        step: &str,
        args: &[String],
        work_dir: &Path,
    ) -> Result<CommandOutput, CaseError> {
        let argv = self.argv(args, work_dir);
        let program = self.runtime.to_string_lossy().to_string();

        let out = runner
            .run(&program, &argv, step)
            .await
            .map_err(|e| CaseError::InstallationStep {
                step: step.to_string(),
                detail: format!("{:#}", e),
            })?;

        if !out.success() {
            let tail = out.stderr.trim();
            let tail = if tail.is_empty() { out.stdout.trim() } else { tail };
            error!(
                "[PHASE: installation] [STEP: {}] Management tool failed (exit_code={:?}, duration_ms={})",
                step, out.exit_code, out.duration_ms
            );
            return Err(CaseError::InstallationStep {
                step: step.to_string(),
                detail: format!(
                    "exit_code={:?}: {}",
                    out.exit_code,
                    tail.lines().last().unwrap_or("")
                ),
            });
        }
        Ok(out)
    }
}
