// src/platform/windows.rs
use crate::config::ReevaluationConfig;
use crate::error::{MonitorError, Result};
use crate::platform::command::run_command;
use crate::platform::netsh::NetshAdapterManager;
use crate::platform::registry_value;
use crate::platform::{
    AdapterDescriptor, AdapterKind, AddressChangeSubscription, ChangeWait, ConfigStore, KeyHandle,
    NetworkPlatform, OperStatus,
};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::ffi::c_void;
use std::ptr;
use std::time::Duration;
use windows_sys::Wdk::System::SystemServices::RtlGetVersion;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_BUFFER_OVERFLOW, ERROR_FILE_NOT_FOUND, ERROR_NO_DATA,
    ERROR_PATH_NOT_FOUND, ERROR_SUCCESS, HANDLE, TRUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::NetworkManagement::IpHelper::{
    CancelMibChangeNotify2, GetAdaptersAddresses, NotifyUnicastIpAddressChange,
    GAA_FLAG_SKIP_ANYCAST, GAA_FLAG_SKIP_DNS_SERVER, GAA_FLAG_SKIP_MULTICAST,
    IP_ADAPTER_ADDRESSES_LH, MIB_NOTIFICATION_TYPE, MIB_UNICASTIPADDRESS_ROW,
};
use windows_sys::Win32::Networking::WinSock::AF_UNSPEC;
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegNotifyChangeKeyValue, RegOpenKeyExW, RegQueryValueExW, HKEY,
    HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_64KEY, REG_VALUE_TYPE,
};
use windows_sys::Win32::System::SystemInformation::OSVERSIONINFOW;
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

/// The address change probe is only used from Windows 10 on.
const MIN_PROBE_MAJOR_VERSION: u32 = 10;
const ADAPTER_BUFFER_ATTEMPTS: usize = 3;

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// # Safety
/// `ptr` must be null or point to a NUL terminated UTF-16 string.
unsafe fn from_wide_ptr(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

pub struct RegistryStore;

impl RegistryStore {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigStore for RegistryStore {
    fn open(&self, key_path: &str) -> Result<Option<Box<dyn KeyHandle>>> {
        let sub_key = to_wide(key_path);
        let mut hkey: HKEY = ptr::null_mut();
        let status = unsafe {
            RegOpenKeyExW(
                HKEY_LOCAL_MACHINE,
                sub_key.as_ptr(),
                0,
                KEY_READ | KEY_WOW64_64KEY,
                &mut hkey,
            )
        };
        match status {
            ERROR_SUCCESS => {}
            ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND => return Ok(None),
            code => {
                return Err(MonitorError::Registry(format!(
                    "Failed to open HKLM\\{} (error {})",
                    key_path, code
                )))
            }
        }

        // From here on the handle closes the key on every path.
        let mut handle = RegistryKeyHandle {
            hkey,
            event: ptr::null_mut(),
            armed: false,
        };
        // Auto-reset, so a fired notification clears itself.
        handle.event = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
        if handle.event.is_null() {
            let code = unsafe { GetLastError() };
            return Err(MonitorError::Registry(format!(
                "Failed to create change event (error {})",
                code
            )));
        }
        Ok(Some(Box::new(handle)))
    }
}

struct RegistryKeyHandle {
    hkey: HKEY,
    event: HANDLE,
    armed: bool,
}

// The key and event handles are plain kernel handles, usable from any thread.
unsafe impl Send for RegistryKeyHandle {}

impl KeyHandle for RegistryKeyHandle {
    fn wait_for_change(&mut self, timeout: Duration) -> Result<ChangeWait> {
        if !self.armed {
            let status = unsafe {
                RegNotifyChangeKeyValue(
                    self.hkey,
                    TRUE,
                    registry_value::NOTIFY_FILTER,
                    self.event,
                    TRUE,
                )
            };
            if status != ERROR_SUCCESS {
                return Err(MonitorError::Registry(format!(
                    "RegNotifyChangeKeyValue failed (error {})",
                    status
                )));
            }
            self.armed = true;
        }

        // u32::MAX would be INFINITE
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        match unsafe { WaitForSingleObject(self.event, millis) } {
            WAIT_OBJECT_0 => {
                self.armed = false;
                Ok(ChangeWait::Changed)
            }
            WAIT_TIMEOUT => Ok(ChangeWait::TimedOut),
            other => {
                let code = unsafe { GetLastError() };
                Err(MonitorError::Registry(format!(
                    "Waiting for registry change returned {} (error {})",
                    other, code
                )))
            }
        }
    }

    fn read_value(&self, name: &str) -> Result<Option<String>> {
        let value_name = to_wide(name);
        let read_error = |reason: String| MonitorError::ValueRead {
            name: name.to_string(),
            reason,
        };

        let mut value_type: REG_VALUE_TYPE = 0;
        let mut size: u32 = 0;
        let status = unsafe {
            RegQueryValueExW(
                self.hkey,
                value_name.as_ptr(),
                ptr::null(),
                &mut value_type,
                ptr::null_mut(),
                &mut size,
            )
        };
        match status {
            ERROR_SUCCESS => {}
            ERROR_FILE_NOT_FOUND => return Ok(None),
            code => return Err(read_error(format!("size query failed (error {})", code))),
        }

        let mut data = vec![0u8; size as usize];
        let status = unsafe {
            RegQueryValueExW(
                self.hkey,
                value_name.as_ptr(),
                ptr::null(),
                &mut value_type,
                data.as_mut_ptr(),
                &mut size,
            )
        };
        match status {
            ERROR_SUCCESS => {}
            ERROR_FILE_NOT_FOUND => return Ok(None),
            code => return Err(read_error(format!("read failed (error {})", code))),
        }
        data.truncate(size as usize);

        registry_value::decode(value_type, &data)
            .map(Some)
            .map_err(read_error)
    }
}

impl Drop for RegistryKeyHandle {
    fn drop(&mut self) {
        // Closing the key also cancels a pending notification.
        unsafe {
            RegCloseKey(self.hkey);
            if !self.event.is_null() {
                CloseHandle(self.event);
            }
        }
    }
}

unsafe extern "system" fn on_address_change(
    _context: *const c_void,
    row: *const MIB_UNICASTIPADDRESS_ROW,
    notification_type: MIB_NOTIFICATION_TYPE,
) {
    let interface_index = row.as_ref().map(|r| r.InterfaceIndex);
    info!(
        "Network address change notification (type {}, interface index {:?})",
        notification_type, interface_index
    );
}

struct UnicastAddressSubscription {
    handle: HANDLE,
}

unsafe impl Send for UnicastAddressSubscription {}

impl AddressChangeSubscription for UnicastAddressSubscription {}

impl Drop for UnicastAddressSubscription {
    fn drop(&mut self) {
        let status = unsafe { CancelMibChangeNotify2(self.handle) };
        if status == ERROR_SUCCESS {
            debug!("Address change listener removed");
        } else {
            warn!("Failed to remove address change listener (error {})", status);
        }
    }
}

fn os_major_version() -> u32 {
    let mut info: OSVERSIONINFOW = unsafe { std::mem::zeroed() };
    info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;
    if unsafe { RtlGetVersion(&mut info) } == 0 {
        info.dwMajorVersion
    } else {
        0
    }
}

pub struct WindowsNetworkPlatform {
    adapters: NetshAdapterManager,
    dns_flush_program: String,
    dns_flush_args: Vec<String>,
    command_timeout: Option<Duration>,
}

impl WindowsNetworkPlatform {
    pub fn new(config: &ReevaluationConfig) -> Self {
        Self {
            adapters: NetshAdapterManager::new(config.command_timeout()),
            dns_flush_program: config.dns_flush_program.clone(),
            dns_flush_args: config.dns_flush_args.clone(),
            command_timeout: config.command_timeout(),
        }
    }
}

/// # Safety
/// `cursor` must be the head of a list filled in by `GetAdaptersAddresses`.
unsafe fn collect_adapters(mut cursor: *const IP_ADAPTER_ADDRESSES_LH) -> Vec<AdapterDescriptor> {
    let mut adapters = Vec::new();
    while let Some(adapter) = cursor.as_ref() {
        adapters.push(AdapterDescriptor {
            name: from_wide_ptr(adapter.FriendlyName),
            kind: AdapterKind::from_if_type(adapter.IfType),
            oper_status: OperStatus::from_raw(adapter.OperStatus),
        });
        cursor = adapter.Next;
    }
    adapters
}

#[async_trait]
impl NetworkPlatform for WindowsNetworkPlatform {
    fn supports_address_notifications(&self) -> bool {
        os_major_version() >= MIN_PROBE_MAJOR_VERSION
    }

    fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        let flags = GAA_FLAG_SKIP_ANYCAST | GAA_FLAG_SKIP_MULTICAST | GAA_FLAG_SKIP_DNS_SERVER;
        let mut size: u32 = 16 * 1024;
        for _ in 0..ADAPTER_BUFFER_ATTEMPTS {
            // u64 storage keeps the structures 8-byte aligned
            let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
            let head = buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH;
            let status = unsafe {
                GetAdaptersAddresses(AF_UNSPEC as u32, flags, ptr::null(), head, &mut size)
            };
            match status {
                ERROR_SUCCESS => return Ok(unsafe { collect_adapters(head) }),
                ERROR_NO_DATA => return Ok(Vec::new()),
                ERROR_BUFFER_OVERFLOW => continue,
                code => {
                    return Err(MonitorError::Platform(format!(
                        "GetAdaptersAddresses failed (error {})",
                        code
                    )))
                }
            }
        }
        Err(MonitorError::Platform(
            "Adapter list kept growing while it was being read".to_string(),
        ))
    }

    fn subscribe_address_changes(&self) -> Result<Box<dyn AddressChangeSubscription>> {
        let mut handle: HANDLE = ptr::null_mut();
        let status = unsafe {
            NotifyUnicastIpAddressChange(
                AF_UNSPEC,
                Some(on_address_change),
                ptr::null(),
                0,
                &mut handle,
            )
        };
        if status != ERROR_SUCCESS {
            return Err(MonitorError::Platform(format!(
                "NotifyUnicastIpAddressChange failed (error {})",
                status
            )));
        }
        debug!("Address change listener registered");
        Ok(Box::new(UnicastAddressSubscription { handle }))
    }

    async fn adapter_enabled(&self, name: &str) -> Result<bool> {
        self.adapters.is_enabled(name).await
    }

    async fn set_adapter_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.adapters.set_enabled(name, enabled).await
    }

    async fn flush_dns(&self) -> Result<()> {
        let args: Vec<&str> = self.dns_flush_args.iter().map(String::as_str).collect();
        let output = run_command(&self.dns_flush_program, &args, self.command_timeout).await?;
        debug!(
            "DNS flush output: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}
