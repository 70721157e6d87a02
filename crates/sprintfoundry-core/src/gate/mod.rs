//! Quality gate: the stack-appropriate lint/typecheck/build/test bundle run
//! after a developer-role step's agent result is `complete` (§4.6.2).
//!
//! Stack detection and the per-check process execution are grounded in the
//! teacher's `presets::detect_project_type` + `invariant::runner::run_invariant`
//! pair: marker-file sniffing selects a preset list, each command runs as a
//! child process with stdout/stderr captured concurrently via `tokio::join!`
//! so a full pipe buffer can't deadlock the wait. The gate never throws --
//! it always resolves to a `GateOutcome`, whatever happens to the checks
//! themselves; its failures are surfaced by the scheduler as a `needs_rework`
//! on the developer step, not as an error.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::presets::{self, InvariantPreset};

/// Per-check timeout. The gate is meant to catch obviously broken work
/// quickly, not stand in for a full CI run.
const CHECK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub passed: bool,
    pub failures: Vec<String>,
}

impl GateOutcome {
    fn passed() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }
}

/// Run the stack-appropriate quality gate against `workspace_path`.
///
/// Never fails: an undetectable stack, or every check simply passing,
/// both resolve to `passed: true`.
pub async fn run_quality_gate(workspace_path: &Path) -> GateOutcome {
    let Some(project_type) = presets::detect_project_type(workspace_path) else {
        return GateOutcome::passed();
    };

    let checks = presets::presets_for_project_type(&project_type);
    let mut failures = Vec::new();

    for check in &checks {
        match run_check(check, workspace_path).await {
            Ok(result) if result.passed => {}
            Ok(result) => failures.push(describe_failure(check, &result)),
            Err(err) => failures.push(format!("{}: failed to execute ({err})", check.name)),
        }
    }

    GateOutcome {
        passed: failures.is_empty(),
        failures,
    }
}

fn describe_failure(check: &InvariantPreset, result: &CheckResult) -> String {
    match result.exit_code {
        Some(code) => format!("{}: exited {code}\n{}", check.name, tail(&result.stderr, &result.stdout)),
        None => format!("{}: {}", check.name, tail(&result.stderr, &result.stdout)),
    }
}

fn tail(stderr: &str, stdout: &str) -> String {
    let combined = if stderr.trim().is_empty() { stdout } else { stderr };
    let trimmed = combined.trim();
    if trimmed.len() > 2000 {
        format!("...{}", &trimmed[trimmed.len() - 2000..])
    } else {
        trimmed.to_string()
    }
}

struct CheckResult {
    passed: bool,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

async fn run_check(check: &InvariantPreset, working_dir: &Path) -> anyhow::Result<CheckResult> {
    let mut child = Command::new(&check.command)
        .args(&check.args)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };
    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(CHECK_TIMEOUT, async {
        tokio::join!(child.wait(), read_stdout, read_stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => Ok(CheckResult {
            passed: status.success(),
            exit_code: status.code(),
            stdout,
            stderr,
        }),
        Ok((Err(e), _, _)) => Err(e.into()),
        Err(_) => {
            let _ = child.kill().await;
            Ok(CheckResult {
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!("{} timed out after {}s", check.name, CHECK_TIMEOUT.as_secs()),
            })
        }
    }
}
