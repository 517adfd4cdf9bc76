// src/platform/mod.rs
//! OS collaborators of the monitor: the registry key being watched and the
//! network facilities used to make Windows re-evaluate its network state.
//! Everything above this module talks to the traits only.

pub mod command;
pub mod netsh;
pub mod registry_value;
#[cfg(windows)]
pub mod windows;

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Result of one bounded slice of a change-notification wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeWait {
    Changed,
    TimedOut,
}

/// Read-only access to the hierarchical configuration store.
pub trait ConfigStore: Send + Sync {
    /// Opens `key_path`. `Ok(None)` means the key does not exist.
    fn open(&self, key_path: &str) -> Result<Option<Box<dyn KeyHandle>>>;
}

/// An open key. Dropping the handle releases it, together with any pending
/// change notification.
pub trait KeyHandle: Send {
    /// Arms the change notification if it is not already pending and blocks
    /// for at most `timeout`. A notification that fired must be re-armed,
    /// which the next call does.
    fn wait_for_change(&mut self, timeout: Duration) -> Result<ChangeWait>;

    /// Reads a value below the key. `Ok(None)` if the value does not exist.
    fn read_value(&self, name: &str) -> Result<Option<String>>;
}

const IF_TYPE_ETHERNET_CSMACD: u32 = 6;
const IF_TYPE_IEEE80211: u32 = 71;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Ethernet,
    Wireless,
    Other(u32),
}

impl AdapterKind {
    /// Maps an IANA ifType as reported by the IP helper API.
    pub fn from_if_type(if_type: u32) -> Self {
        match if_type {
            IF_TYPE_ETHERNET_CSMACD => AdapterKind::Ethernet,
            IF_TYPE_IEEE80211 => AdapterKind::Wireless,
            other => AdapterKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperStatus {
    Up,
    Down,
    Other,
}

impl OperStatus {
    /// Maps an RFC 2863 operational status value.
    pub fn from_raw(status: i32) -> Self {
        match status {
            1 => OperStatus::Up,
            2 => OperStatus::Down,
            _ => OperStatus::Other,
        }
    }
}

/// Snapshot of one network interface as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub name: String,
    pub kind: AdapterKind,
    pub oper_status: OperStatus,
}

impl AdapterDescriptor {
    pub fn is_refresh_candidate(&self) -> bool {
        self.oper_status == OperStatus::Up
            && matches!(self.kind, AdapterKind::Ethernet | AdapterKind::Wireless)
    }
}

/// A registered "network address changed" listener. Dropping it unregisters
/// the callback.
pub trait AddressChangeSubscription: Send {}

#[async_trait]
pub trait NetworkPlatform: Send + Sync {
    /// Whether the OS is recent enough for the notification based probe.
    fn supports_address_notifications(&self) -> bool;

    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>>;

    /// Registers a listener whose callback only logs.
    fn subscribe_address_changes(&self) -> Result<Box<dyn AddressChangeSubscription>>;

    /// Administrative state of the connection `name` from the management
    /// interface.
    async fn adapter_enabled(&self, name: &str) -> Result<bool>;

    async fn set_adapter_enabled(&self, name: &str, enabled: bool) -> Result<()>;

    async fn flush_dns(&self) -> Result<()>;
}

#[cfg(windows)]
pub fn config_store() -> Result<Arc<dyn ConfigStore>> {
    Ok(Arc::new(windows::RegistryStore::new()))
}

#[cfg(not(windows))]
pub fn config_store() -> Result<Arc<dyn ConfigStore>> {
    Err(crate::error::MonitorError::Unsupported(
        "registry change notifications require Windows",
    ))
}

#[cfg(windows)]
pub fn network_platform(config: &Config) -> Result<Arc<dyn NetworkPlatform>> {
    Ok(Arc::new(windows::WindowsNetworkPlatform::new(
        &config.reevaluation,
    )))
}

#[cfg(not(windows))]
pub fn network_platform(_config: &Config) -> Result<Arc<dyn NetworkPlatform>> {
    Err(crate::error::MonitorError::Unsupported(
        "network re-evaluation requires Windows",
    ))
}
