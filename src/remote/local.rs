//! SX-010: Local subprocess execution.

use super::ExecOutput;
use std::process::{Command, Stdio};

/// Run `program` with `args` and extra environment, capturing both streams.
/// Stdin is closed so an interactive prompt fails fast instead of hanging.
pub fn exec_command(
    program: &str,
    args: &[&str],
    env: &[(&str, &str)],
) -> Result<ExecOutput, String> {
    tracing::debug!(program, ?args, "exec");
    let output = Command::new(program)
        .args(args)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
