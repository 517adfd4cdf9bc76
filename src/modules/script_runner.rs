// src/modules/script_runner.rs
use crate::config::ScriptConfig;
use crate::error::{MonitorError, Result};
use crate::status::StatusValue;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

/// Runs the external change handler for a status.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, status: &StatusValue) -> Result<()>;
}

/// Spawns `<interpreter> <interpreter args> <script> -Status <status>` and
/// forwards its output to the log line by line.
pub struct ProcessScriptRunner {
    interpreter: String,
    interpreter_args: Vec<String>,
    script_path: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessScriptRunner {
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            interpreter_args: config.interpreter_args.clone(),
            script_path: config.resolved_path(),
            timeout: config.timeout(),
        }
    }

    pub fn script_path(&self) -> &PathBuf {
        &self.script_path
    }

    fn command(&self, status: &StatusValue) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.interpreter_args)
            .arg(&self.script_path)
            .arg("-Status")
            .arg(status.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn forward_lines<R>(reader: R, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match stream {
                    Stream::Stdout => info!("Script output [stdout]: {}", line),
                    Stream::Stderr => error!("Script output [stderr]: {}", line),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!("Stopped reading script {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl ScriptRunner for ProcessScriptRunner {
    async fn run(&self, status: &StatusValue) -> Result<()> {
        let script = self.script_path.display().to_string();
        debug!(
            "Running '{} {} {} -Status {}'",
            self.interpreter,
            self.interpreter_args.join(" "),
            script,
            status
        );

        let mut child = self.command(status).spawn().map_err(|e| {
            MonitorError::ScriptInvocation(format!(
                "Failed to start '{}' for {}: {}",
                self.interpreter, script, e
            ))
        })?;

        let stdout = child.stdout.take().map(|out| forward_lines(out, Stream::Stdout));
        let stderr = child.stderr.take().map(|err| forward_lines(err, Stream::Stderr));

        let budget = self.timeout.map(|limit| (limit, Instant::now() + limit));
        let exit = match budget {
            Some((limit, deadline)) => match timeout_at(deadline, child.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill script {}: {}", script, e);
                    }
                    return Err(MonitorError::ScriptTimeout {
                        script,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| {
            MonitorError::ScriptInvocation(format!("Failed to wait for {}: {}", script, e))
        })?;

        // Drain what the script wrote before it exited. Processes it left
        // behind may hold the pipes open, so the drain shares the deadline.
        for mut forwarder in [stdout, stderr].into_iter().flatten() {
            match budget {
                Some((_, deadline)) => {
                    if timeout_at(deadline, &mut forwarder).await.is_err() {
                        warn!(
                            "Output of {} still open after the script exited; no longer forwarding it",
                            script
                        );
                        forwarder.abort();
                    }
                }
                None => {
                    let _ = forwarder.await;
                }
            }
        }

        if !exit.success() {
            return Err(MonitorError::ScriptInvocation(format!(
                "{} exited with {}",
                script, exit
            )));
        }
        info!("Script {} completed for status {}", script, status);
        Ok(())
    }
}
