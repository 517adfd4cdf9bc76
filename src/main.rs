// src/main.rs
mod config;
mod error;
mod modules;
mod platform;
mod status;

use crate::config::Config;
use crate::modules::{
    ConfigValueWatcher, NetworkReevaluationStrategy, NetworkReevaluator, ProcessScriptRunner,
    StatusActionDispatcher, WatchLoopController,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{error, info, warn};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

const ERROR_LOG_FILE: &str = "error.log";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger based on RUST_LOG env var, or default to info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    if let Some(ref path) = config_path {
        info!("Loading configuration from: {:?}", path);
    } else {
        info!("Use default configuration");
    }

    if let Err(e) = run(config_path.as_deref()).await {
        error!("NPA status monitor failed: {:#}", e);
        record_fatal_error(&e);
        exit(1);
    }
    Ok(())
}

async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    let store = platform::config_store().context("Registry access unavailable")?;
    let watcher = ConfigValueWatcher::new(store, &config.watch);

    let script = ProcessScriptRunner::new(&config.script);
    info!(
        "Status changes will be handled by {}",
        script.script_path().display()
    );

    let reevaluator: Option<Arc<dyn NetworkReevaluator>> = if config.reevaluation.enable {
        let platform =
            platform::network_platform(&config).context("Network platform unavailable")?;
        let strategy: Arc<dyn NetworkReevaluator> = Arc::new(NetworkReevaluationStrategy::new(
            platform,
            &config.reevaluation,
        ));
        Some(strategy)
    } else {
        info!("Network re-evaluation is disabled. Skipping.");
        None
    };

    let dispatcher = StatusActionDispatcher::new(Arc::new(script), reevaluator);
    let mut controller = WatchLoopController::new(
        watcher,
        dispatcher,
        config.watch.retry_interval(),
        config.watch.stop_timeout(),
    );
    controller.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Stopping NPA status monitor...");
    if !controller.stop().await {
        warn!(
            "Monitor is exiting while the watch worker is still busy ({:?})",
            controller.state()
        );
    }
    Ok(())
}

/// Appends a fatal error to `error.log` next to the executable and echoes it
/// to the console.
fn record_fatal_error(err: &anyhow::Error) {
    let log_path = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(ERROR_LOG_FILE)))
        .unwrap_or_else(|| PathBuf::from(ERROR_LOG_FILE));
    let entry = error_log_entry(Local::now(), err);

    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .and_then(|mut file| file.write_all(entry.as_bytes()));
    match written {
        Ok(()) => eprintln!(
            "Error: {:#}\nDetails have been logged to {}",
            err,
            log_path.display()
        ),
        Err(e) => eprintln!(
            "Error: {:#}\n(could not write {}: {})",
            err,
            log_path.display(),
            e
        ),
    }
}

fn error_log_entry(at: DateTime<Local>, err: &anyhow::Error) -> String {
    format!(
        "{}: {:#}\r\n{:?}\r\n\r\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        err,
        err
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn error_log_entry_starts_with_local_date_and_time() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let err = anyhow::anyhow!("key unreadable").context("Registry access unavailable");
        let entry = error_log_entry(at, &err);
        assert!(entry.starts_with(
            "2024-03-07 09:05:02: Registry access unavailable: key unreadable\r\n"
        ));
        assert!(entry.ends_with("\r\n\r\n"));
    }
}
