// src/platform/registry_value.rs
//! Registry value decoding and the change notification flags.
#![cfg_attr(not(windows), allow(dead_code))]

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_DWORD: u32 = 4;
pub const REG_QWORD: u32 = 11;

pub const REG_NOTIFY_CHANGE_NAME: u32 = 0x0000_0001;
pub const REG_NOTIFY_CHANGE_LAST_SET: u32 = 0x0000_0004;
pub const REG_NOTIFY_THREAD_AGNOSTIC: u32 = 0x1000_0000;

/// Filter for the key change notification. Wait slices run on whichever
/// blocking pool thread is free, so the registration must not be tied to the
/// thread that armed it: Windows signals a thread-bound registration when
/// that thread exits.
pub const NOTIFY_FILTER: u32 =
    REG_NOTIFY_CHANGE_NAME | REG_NOTIFY_CHANGE_LAST_SET | REG_NOTIFY_THREAD_AGNOSTIC;

pub fn decode(value_type: u32, data: &[u8]) -> std::result::Result<String, String> {
    match value_type {
        REG_SZ | REG_EXPAND_SZ => {
            if data.len() % 2 != 0 {
                return Err(format!("odd string length {}", data.len()));
            }
            let wide: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
            String::from_utf16(&wide[..end]).map_err(|e| e.to_string())
        }
        REG_DWORD => <[u8; 4]>::try_from(data)
            .map(|bytes| u32::from_le_bytes(bytes).to_string())
            .map_err(|_| format!("DWORD value has {} bytes", data.len())),
        REG_QWORD => <[u8; 8]>::try_from(data)
            .map(|bytes| u64::from_le_bytes(bytes).to_string())
            .map_err(|_| format!("QWORD value has {} bytes", data.len())),
        other => Err(format!("unsupported value type {}", other)),
    }
}
