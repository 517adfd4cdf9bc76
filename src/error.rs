// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Failed to read registry value '{name}': {reason}")]
    ValueRead { name: String, reason: String },

    #[error("Script invocation failed: {0}")]
    ScriptInvocation(String),

    #[error("Script '{script}' did not exit within {secs}s")]
    ScriptTimeout { script: String, secs: u64 },

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("Network platform error: {0}")]
    Platform(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Watch worker is already running")]
    AlreadyRunning,

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
