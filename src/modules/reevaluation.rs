// src/modules/reevaluation.rs
//! Best-effort ways of making Windows re-check its network location after the
//! tunnel state changed. Tactics are tried in order until one succeeds; none
//! of them is allowed to fail the caller.

use crate::config::ReevaluationConfig;
use crate::error::Result;
use crate::platform::{AddressChangeSubscription, NetworkPlatform};
use crate::status::StatusValue;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TacticOutcome {
    Success,
    NotApplicable,
    Failed(String),
}

pub struct ReevaluationContext<'a> {
    pub status: &'a StatusValue,
    pub platform: &'a dyn NetworkPlatform,
    pub cancel: &'a CancellationToken,
    pub listener_hold: Duration,
    pub toggle_pause: Duration,
}

#[async_trait]
pub trait ReevaluationTactic: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, ctx: &ReevaluationContext<'_>) -> TacticOutcome;
}

/// Entry point used by the dispatcher.
#[async_trait]
pub trait NetworkReevaluator: Send + Sync {
    /// Returns whether any tactic claimed success.
    async fn run(&self, status: &StatusValue, cancel: &CancellationToken) -> bool;
}

/// An address change listener that is registered for a bounded time. The
/// registration is removed when the value is dropped, whichever way the
/// holding scope is left.
struct TransientListener {
    _subscription: Box<dyn AddressChangeSubscription>,
}

impl TransientListener {
    fn register(platform: &dyn NetworkPlatform) -> Result<Self> {
        let subscription = platform.subscribe_address_changes()?;
        Ok(Self {
            _subscription: subscription,
        })
    }

    async fn hold(self, duration: Duration, cancel: &CancellationToken) {
        debug!("Holding address change listener for {:?}", duration);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.cancelled() => debug!("Address change listener released early for shutdown"),
        }
    }
}

async fn listen_for_address_changes(ctx: &ReevaluationContext<'_>) -> Result<()> {
    TransientListener::register(ctx.platform)?
        .hold(ctx.listener_hold, ctx.cancel)
        .await;
    Ok(())
}

/// On systems that support it, watching for address changes while the
/// interfaces are enumerated is enough to nudge network location awareness.
pub struct CapabilityProbe;

#[async_trait]
impl ReevaluationTactic for CapabilityProbe {
    fn name(&self) -> &str {
        "CapabilityProbe"
    }

    async fn attempt(&self, ctx: &ReevaluationContext<'_>) -> TacticOutcome {
        if !ctx.platform.supports_address_notifications() {
            return TacticOutcome::NotApplicable;
        }
        let adapters = match ctx.platform.list_adapters() {
            Ok(adapters) => adapters,
            Err(e) => return TacticOutcome::Failed(e.to_string()),
        };
        debug!("Probe enumerated {} interfaces", adapters.len());
        match listen_for_address_changes(ctx).await {
            Ok(()) => TacticOutcome::Success,
            Err(e) => TacticOutcome::Failed(e.to_string()),
        }
    }
}

/// Disables and re-enables the first interface that is up and wired or
/// wireless. Only that one interface is ever touched.
pub struct AdapterSoftRefresh;

#[async_trait]
impl ReevaluationTactic for AdapterSoftRefresh {
    fn name(&self) -> &str {
        "AdapterSoftRefresh"
    }

    async fn attempt(&self, ctx: &ReevaluationContext<'_>) -> TacticOutcome {
        let adapters = match ctx.platform.list_adapters() {
            Ok(adapters) => adapters,
            Err(e) => return TacticOutcome::Failed(e.to_string()),
        };
        let Some(adapter) = adapters.iter().find(|a| a.is_refresh_candidate()) else {
            debug!("No active Ethernet or wireless adapter among {} interfaces", adapters.len());
            return TacticOutcome::NotApplicable;
        };
        let name = adapter.name.as_str();
        info!("Refreshing adapter '{}' ({:?})", name, adapter.kind);

        match ctx.platform.adapter_enabled(name).await {
            Ok(true) => {
                if let Err(e) = ctx.platform.set_adapter_enabled(name, false).await {
                    return TacticOutcome::Failed(format!("disable '{}': {}", name, e));
                }
                // Not cancellable: the adapter must come back up.
                tokio::time::sleep(ctx.toggle_pause).await;
                match ctx.platform.set_adapter_enabled(name, true).await {
                    Ok(()) => TacticOutcome::Success,
                    Err(e) => TacticOutcome::Failed(format!("re-enable '{}': {}", name, e)),
                }
            }
            Ok(false) => {
                info!(
                    "Adapter '{}' is administratively disabled; listening for address changes instead",
                    name
                );
                match listen_for_address_changes(ctx).await {
                    Ok(()) => TacticOutcome::Success,
                    Err(e) => TacticOutcome::Failed(e.to_string()),
                }
            }
            Err(e) => TacticOutcome::Failed(format!("query '{}': {}", name, e)),
        }
    }
}

/// Last resort: listen for address changes and flush the resolver cache.
pub struct StackRefresh;

#[async_trait]
impl ReevaluationTactic for StackRefresh {
    fn name(&self) -> &str {
        "StackRefresh"
    }

    async fn attempt(&self, ctx: &ReevaluationContext<'_>) -> TacticOutcome {
        let listener = match TransientListener::register(ctx.platform) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Could not register address change listener: {}", e);
                None
            }
        };

        let flushed = ctx.platform.flush_dns().await;
        match &flushed {
            Ok(()) => info!("DNS resolver cache flushed"),
            Err(e) => warn!("DNS cache flush failed: {}", e),
        }

        let listened = listener.is_some();
        if let Some(listener) = listener {
            listener.hold(ctx.listener_hold, ctx.cancel).await;
        }

        match flushed {
            Ok(()) => TacticOutcome::Success,
            Err(_) if listened => TacticOutcome::Success,
            Err(e) => TacticOutcome::Failed(e.to_string()),
        }
    }
}

pub struct NetworkReevaluationStrategy {
    platform: Arc<dyn NetworkPlatform>,
    tactics: Vec<Box<dyn ReevaluationTactic>>,
    listener_hold: Duration,
    toggle_pause: Duration,
}

impl NetworkReevaluationStrategy {
    pub fn new(platform: Arc<dyn NetworkPlatform>, config: &ReevaluationConfig) -> Self {
        Self::with_tactics(
            platform,
            config,
            vec![
                Box::new(CapabilityProbe),
                Box::new(AdapterSoftRefresh),
                Box::new(StackRefresh),
            ],
        )
    }

    pub fn with_tactics(
        platform: Arc<dyn NetworkPlatform>,
        config: &ReevaluationConfig,
        tactics: Vec<Box<dyn ReevaluationTactic>>,
    ) -> Self {
        Self {
            platform,
            tactics,
            listener_hold: config.listener_hold(),
            toggle_pause: config.adapter_toggle_pause(),
        }
    }
}

#[async_trait]
impl NetworkReevaluator for NetworkReevaluationStrategy {
    async fn run(&self, status: &StatusValue, cancel: &CancellationToken) -> bool {
        info!("Requesting network re-evaluation for status {}", status);
        let ctx = ReevaluationContext {
            status,
            platform: self.platform.as_ref(),
            cancel,
            listener_hold: self.listener_hold,
            toggle_pause: self.toggle_pause,
        };

        for tactic in &self.tactics {
            match tactic.attempt(&ctx).await {
                TacticOutcome::Success => {
                    info!("Network re-evaluation triggered by {}", tactic.name());
                    return true;
                }
                TacticOutcome::NotApplicable => debug!("{} not applicable", tactic.name()),
                TacticOutcome::Failed(reason) => warn!("{} failed: {}", tactic.name(), reason),
            }
        }

        warn!(
            "Could not trigger network re-evaluation for status {}; all tactics exhausted",
            ctx.status
        );
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::MonitorError;
    use crate::platform::{AdapterDescriptor, AdapterKind, OperStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn adapter(name: &str, kind: AdapterKind, oper_status: OperStatus) -> AdapterDescriptor {
        AdapterDescriptor {
            name: name.to_string(),
            kind,
            oper_status,
        }
    }

    #[derive(Default)]
    pub struct FakePlatform {
        pub probe_supported: bool,
        pub adapters: Vec<AdapterDescriptor>,
        pub adapter_enabled: bool,
        pub fail_subscribe: bool,
        pub fail_flush: bool,
        pub fail_enable: bool,
        pub subscribes: AtomicUsize,
        pub active_subscriptions: Arc<AtomicUsize>,
        pub set_calls: Mutex<Vec<(String, bool)>>,
        pub flushes: AtomicUsize,
    }

    impl FakePlatform {
        pub fn subscribe_count(&self) -> usize {
            self.subscribes.load(Ordering::SeqCst)
        }

        pub fn active(&self) -> usize {
            self.active_subscriptions.load(Ordering::SeqCst)
        }

        pub fn flush_count(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }

        pub fn set_calls(&self) -> Vec<(String, bool)> {
            self.set_calls.lock().unwrap().clone()
        }
    }

    struct FakeSubscription(Arc<AtomicUsize>);

    impl AddressChangeSubscription for FakeSubscription {}

    impl Drop for FakeSubscription {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NetworkPlatform for FakePlatform {
        fn supports_address_notifications(&self) -> bool {
            self.probe_supported
        }

        fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
            Ok(self.adapters.clone())
        }

        fn subscribe_address_changes(&self) -> Result<Box<dyn AddressChangeSubscription>> {
            if self.fail_subscribe {
                return Err(MonitorError::Platform("subscription refused".into()));
            }
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSubscription(self.active_subscriptions.clone())))
        }

        async fn adapter_enabled(&self, _name: &str) -> Result<bool> {
            Ok(self.adapter_enabled)
        }

        async fn set_adapter_enabled(&self, name: &str, enabled: bool) -> Result<()> {
            self.set_calls
                .lock()
                .unwrap()
                .push((name.to_string(), enabled));
            if enabled && self.fail_enable {
                return Err(MonitorError::CommandExecution("netsh refused".into()));
            }
            Ok(())
        }

        async fn flush_dns(&self) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_flush {
                return Err(MonitorError::CommandExecution("ipconfig failed".into()));
            }
            Ok(())
        }
    }
}
