// src/platform/netsh.rs
//! Adapter management through `netsh interface`, which addresses interfaces
//! by their connection name just like the management API does.
#![cfg_attr(not(windows), allow(dead_code))]

use crate::error::{MonitorError, Result};
use crate::platform::command::run_command;
use log::{debug, info};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

const NETSH: &str = "netsh";

fn admin_state_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^\s*Administrative state:\s*(enabled|disabled)\s*$")
            .expect("admin state pattern is valid")
    })
}

/// Extracts the administrative state from `netsh interface show interface <name>`.
pub fn parse_admin_state(output: &str) -> Option<bool> {
    admin_state_pattern()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("enabled"))
}

pub fn show_interface_args(name: &str) -> Vec<&str> {
    vec!["interface", "show", "interface", name]
}

pub fn set_interface_args(name: &str, enabled: bool) -> Vec<&str> {
    let admin = if enabled { "admin=enabled" } else { "admin=disabled" };
    vec!["interface", "set", "interface", name, admin]
}

pub struct NetshAdapterManager {
    timeout: Option<Duration>,
}

impl NetshAdapterManager {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn is_enabled(&self, name: &str) -> Result<bool> {
        let output = run_command(NETSH, &show_interface_args(name), self.timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let enabled = parse_admin_state(&stdout).ok_or_else(|| {
            MonitorError::Platform(format!(
                "No administrative state reported for adapter '{}'",
                name
            ))
        })?;
        debug!("Adapter '{}' administrative state enabled={}", name, enabled);
        Ok(enabled)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        info!(
            "{} adapter '{}'",
            if enabled { "Enabling" } else { "Disabling" },
            name
        );
        run_command(NETSH, &set_interface_args(name, enabled), self.timeout).await?;
        Ok(())
    }
}
