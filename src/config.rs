// src/config.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "npa-status-monitor.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub reevaluation: ReevaluationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Sub key below HKEY_LOCAL_MACHINE.
    #[serde(default = "default_key_path")]
    pub key_path: String,
    #[serde(default = "default_value_name")]
    pub value_name: String,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Length of one slice of the change-notification wait. Stop requests are
    /// observed between slices.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScriptConfig {
    /// Overrides the script location under Program Files.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// 0 waits forever.
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReevaluationConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_listener_hold_secs")]
    pub listener_hold_secs: u64,
    #[serde(default = "default_adapter_toggle_pause_ms")]
    pub adapter_toggle_pause_ms: u64,
    #[serde(default = "default_dns_flush_program")]
    pub dns_flush_program: String,
    #[serde(default = "default_dns_flush_args")]
    pub dns_flush_args: Vec<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_key_path() -> String {
    r"SOFTWARE\NetSkope\NpaTunnel".to_string()
}

fn default_value_name() -> String {
    "NpaStatus".to_string()
}

fn default_retry_interval_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    1000
}

fn default_interpreter() -> String {
    "powershell.exe".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    ["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_script_timeout_secs() -> u64 {
    300
}

fn default_listener_hold_secs() -> u64 {
    5
}

fn default_adapter_toggle_pause_ms() -> u64 {
    2000
}

fn default_dns_flush_program() -> String {
    "ipconfig".to_string()
}

fn default_dns_flush_args() -> Vec<String> {
    vec!["/flushdns".to_string()]
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
            value_name: default_value_name(),
            retry_interval_secs: default_retry_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: None,
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            timeout_secs: default_script_timeout_secs(),
        }
    }
}

impl Default for ReevaluationConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            listener_hold_secs: default_listener_hold_secs(),
            adapter_toggle_pause_ms: default_adapter_toggle_pause_ms(),
            dns_flush_program: default_dns_flush_program(),
            dns_flush_args: default_dns_flush_args(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl WatchConfig {
    pub fn retry_interval(&self) -> Duration {
        // Zero would re-open the missing key in a tight loop.
        Duration::from_secs(self.retry_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero slice would turn the wait into a spin.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// The configured script, or `<Program Files>\RegistryMonitor\Scripts\ChangeHandler.ps1`.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let program_files = std::env::var_os("ProgramFiles")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
        program_files
            .join("RegistryMonitor")
            .join("Scripts")
            .join("ChangeHandler.ps1")
    }
}

impl ReevaluationConfig {
    pub fn listener_hold(&self) -> Duration {
        Duration::from_secs(self.listener_hold_secs)
    }

    pub fn adapter_toggle_pause(&self) -> Duration {
        Duration::from_millis(self.adapter_toggle_pause_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

impl Config {
    /// Loads `config_path`, which must exist when given. Without a path the
    /// default file is used if present, otherwise built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Config::default());
                }
                default_path
            }
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {:?}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML from config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
