// src/platform/command.rs
use crate::error::{MonitorError, Result};
use log::debug;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Runs `binary` to completion and returns its output, failing on a non-zero
/// exit status or when `timeout` elapses first (the child is killed).
pub async fn run_command(binary: &str, args: &[&str], timeout: Option<Duration>) -> Result<Output> {
    let command_line = format!("{} {}", binary, args.join(" "));
    debug!("Running command '{}'", command_line);

    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            MonitorError::CommandExecution(format!(
                "Failed to run command '{}': {}",
                command_line, e
            ))
        })?;

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                MonitorError::CommandExecution(format!(
                    "Command '{}' did not finish within {:?}",
                    command_line, limit
                ))
            })?,
        None => child.wait_with_output().await,
    };
    let output = waited.map_err(|e| {
        MonitorError::CommandExecution(format!(
            "Failed to wait for command '{}': {}",
            command_line, e
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // netsh and ipconfig report errors on stdout
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(MonitorError::CommandExecution(format!(
            "Command '{}' failed with status {}: {}",
            command_line,
            output.status,
            detail.trim()
        )));
    }

    Ok(output)
}
