// src/status.rs
use std::fmt;

pub const STATUS_UNKNOWN: &str = "Unknown";
pub const STATUS_ERROR: &str = "Error";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

/// Snapshot of the tunnel status value taken when a change fired. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusValue(String);

impl StatusValue {
    /// Builds a status from the raw registry value; absent or blank values
    /// become `Unknown`.
    pub fn from_raw(raw: Option<String>) -> Self {
        match raw {
            Some(value) if !value.trim().is_empty() => Self(value),
            _ => Self::unknown(),
        }
    }

    pub fn unknown() -> Self {
        Self(STATUS_UNKNOWN.to_string())
    }

    pub fn error() -> Self {
        Self(STATUS_ERROR.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Only definite tunnel transitions warrant a network re-check.
    pub fn triggers_reevaluation(&self) -> bool {
        matches!(self.0.as_str(), STATUS_CONNECTED | STATUS_DISCONNECTED)
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_values_map_to_unknown() {
        assert_eq!(StatusValue::from_raw(None).as_str(), "Unknown");
        assert_eq!(StatusValue::from_raw(Some(String::new())).as_str(), "Unknown");
        assert_eq!(StatusValue::from_raw(Some("  ".into())).as_str(), "Unknown");
    }

    #[test]
    fn raw_value_is_kept_verbatim() {
        let status = StatusValue::from_raw(Some("Connecting".into()));
        assert_eq!(status.to_string(), "Connecting");
        assert!(!status.triggers_reevaluation());
    }

    #[test]
    fn only_connected_and_disconnected_trigger_reevaluation() {
        assert!(StatusValue::from_raw(Some("Connected".into())).triggers_reevaluation());
        assert!(StatusValue::from_raw(Some("Disconnected".into())).triggers_reevaluation());
        assert!(!StatusValue::from_raw(Some("connected".into())).triggers_reevaluation());
        assert!(!StatusValue::unknown().triggers_reevaluation());
        assert!(!StatusValue::error().triggers_reevaluation());
    }
}
