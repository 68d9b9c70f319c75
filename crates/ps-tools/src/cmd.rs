//! RUN_CMD: allowlisted subprocess execution with a wall-clock kill.

use std::path::Path;
use std::time::Duration;

use ps_core::{Policy, PsError, PsResult};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// Spawn `cmd args…` with the project root as working directory. The
/// command token must be in the active policy's allowlist. Output is the
/// string `"exit=N\nSTDOUT:…\nSTDERR:…"`.
pub async fn run_cmd(
    root: &Path,
    cmd: &str,
    args: &[String],
    timeout_ms: Option<u64>,
    policy: &Policy,
) -> PsResult<Value> {
    if !policy.allows_command(cmd) {
        return Err(PsError::Policy(format!(
            "command '{cmd}' is not in allowCommands"
        )));
    }

    let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS));
    debug!(cmd, ?timeout, "spawning subprocess");

    let mut command = Command::new(cmd);
    command
        .args(args)
        .current_dir(root)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|err| PsError::Tool(format!("Failed to spawn '{cmd}': {err}")))?;

    // Dropping the in-flight future on timeout kills the child via
    // kill_on_drop.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => {
            result.map_err(|err| PsError::Tool(format!("Failed to wait for '{cmd}': {err}")))?
        }
        Err(_) => {
            return Err(PsError::Timeout(format!(
                "RUN_CMD '{cmd}' exceeded {}ms",
                timeout.as_millis()
            )));
        }
    };

    let exit = output.status.code().unwrap_or(1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(Value::String(format!(
        "exit={exit}\nSTDOUT:{stdout}\nSTDERR:{stderr}"
    )))
}
