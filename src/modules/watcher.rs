// src/modules/watcher.rs
use crate::config::WatchConfig;
use crate::error::Result;
use crate::platform::{ChangeWait, ConfigStore, KeyHandle};
use crate::status::StatusValue;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one `open_and_wait` cycle observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The change notification fired; carries the value read afterwards.
    Changed(StatusValue),
    /// The watched key does not exist (yet).
    KeyNotFound,
    /// Cancellation was requested while waiting.
    Cancelled,
}

/// Opens the tunnel status key, waits for it to change and reads the status.
/// The key handle lives for exactly one call.
pub struct ConfigValueWatcher {
    store: Arc<dyn ConfigStore>,
    key_path: String,
    value_name: String,
    poll_interval: Duration,
}

impl ConfigValueWatcher {
    pub fn new(store: Arc<dyn ConfigStore>, config: &WatchConfig) -> Self {
        Self {
            store,
            key_path: config.key_path.clone(),
            value_name: config.value_name.clone(),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub async fn open_and_wait(&self, cancel: &CancellationToken) -> Result<WatchOutcome> {
        let Some(mut key) = self.store.open(&self.key_path)? else {
            return Ok(WatchOutcome::KeyNotFound);
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(WatchOutcome::Cancelled);
            }
            let poll_interval = self.poll_interval;
            // The handle travels into the blocking pool and back so it stays
            // owned by this call; a panic there drops (and closes) it.
            let (returned, waited) = tokio::task::spawn_blocking(move || {
                let waited = key.wait_for_change(poll_interval);
                (key, waited)
            })
            .await?;
            key = returned;
            match waited? {
                ChangeWait::Changed => break,
                ChangeWait::TimedOut => continue,
            }
        }

        let status = self.read_status(&*key);
        info!("Registry change detected. Current status: {}", status);
        Ok(WatchOutcome::Changed(status))
    }

    fn read_status(&self, key: &dyn KeyHandle) -> StatusValue {
        match key.read_value(&self.value_name) {
            Ok(raw) => {
                debug!("Raw value of '{}': {:?}", self.value_name, raw);
                StatusValue::from_raw(raw)
            }
            Err(e) => {
                error!("Error reading registry value: {}", e);
                StatusValue::error()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::error::MonitorError;

    fn watcher(registry: &Arc<FakeRegistry>) -> ConfigValueWatcher {
        ConfigValueWatcher::new(Arc::new(FakeStore(registry.clone())), &WatchConfig::default())
    }

    #[tokio::test]
    async fn absent_key_is_reported_without_error() {
        let registry = FakeRegistry::new(false, ValueState::Missing);
        let outcome = watcher(&registry)
            .open_and_wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WatchOutcome::KeyNotFound);
        assert_eq!(registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn change_returns_current_value_and_releases_key() {
        let registry = FakeRegistry::new(true, ValueState::Present("Connected".into()));
        registry.push_changes(1);
        let outcome = watcher(&registry)
            .open_and_wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::Changed(StatusValue::from_raw(Some("Connected".into())))
        );
        assert_eq!(registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn timed_out_slices_keep_waiting_on_the_same_handle() {
        let registry = FakeRegistry::new(true, ValueState::Present("Disconnected".into()));
        registry.push_wait(Ok(ChangeWait::TimedOut));
        registry.push_wait(Ok(ChangeWait::TimedOut));
        registry.push_changes(1);
        let outcome = watcher(&registry)
            .open_and_wait(&CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, WatchOutcome::Changed(_)));
        assert_eq!(registry.open_count(), 1);
    }

    #[tokio::test]
    async fn read_failure_maps_to_error_sentinel() {
        let registry = FakeRegistry::new(true, ValueState::ReadFails);
        registry.push_changes(1);
        let outcome = watcher(&registry)
            .open_and_wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Changed(StatusValue::error()));
        assert_eq!(registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn missing_value_maps_to_unknown_sentinel() {
        let registry = FakeRegistry::new(true, ValueState::Missing);
        registry.push_changes(1);
        let outcome = watcher(&registry)
            .open_and_wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, WatchOutcome::Changed(StatusValue::unknown()));
    }

    #[tokio::test]
    async fn spurious_wake_with_unchanged_value_repeats_status() {
        let registry = FakeRegistry::new(true, ValueState::Present("Connected".into()));
        registry.push_changes(2);
        let watcher = watcher(&registry);
        let token = CancellationToken::new();
        let first = watcher.open_and_wait(&token).await.unwrap();
        let second = watcher.open_and_wait(&token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.open_count(), 2);
        assert_eq!(registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_wait_slices() {
        let registry = FakeRegistry::new(true, ValueState::Present("Connected".into()));
        let token = CancellationToken::new();
        registry.cancel_when_drained(token.clone());
        let outcome = watcher(&registry).open_and_wait(&token).await.unwrap();
        assert_eq!(outcome, WatchOutcome::Cancelled);
        assert_eq!(registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn wait_failure_propagates_and_releases_key() {
        let registry = FakeRegistry::new(true, ValueState::Present("Connected".into()));
        registry.push_wait(Err(MonitorError::Registry("notify failed".into())));
        let result = watcher(&registry).open_and_wait(&CancellationToken::new()).await;
        assert!(matches!(result, Err(MonitorError::Registry(_))));
        assert_eq!(registry.handles_open(), 0);
    }
}
