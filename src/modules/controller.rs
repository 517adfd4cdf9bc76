// src/modules/controller.rs
use crate::error::{MonitorError, Result};
use crate::modules::dispatcher::StatusActionDispatcher;
use crate::modules::watcher::{ConfigValueWatcher, WatchOutcome};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Stopped,
    Running,
    StoppingRequested,
}

/// Owns the single watch worker and its lifecycle.
pub struct WatchLoopController {
    watcher: Arc<ConfigValueWatcher>,
    dispatcher: Arc<StatusActionDispatcher>,
    retry_interval: Duration,
    stop_timeout: Duration,
    state: ControllerState,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl WatchLoopController {
    pub fn new(
        watcher: ConfigValueWatcher,
        dispatcher: StatusActionDispatcher,
        retry_interval: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            watcher: Arc::new(watcher),
            dispatcher: Arc::new(dispatcher),
            retry_interval,
            stop_timeout,
            state: ControllerState::Stopped,
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        if let Some(worker) = &self.worker {
            if !worker.is_finished() {
                return Err(MonitorError::AlreadyRunning);
            }
        }
        self.cancel = CancellationToken::new();
        self.worker = Some(tokio::spawn(run_loop(
            self.watcher.clone(),
            self.dispatcher.clone(),
            self.retry_interval,
            self.cancel.clone(),
        )));
        self.state = ControllerState::Running;
        Ok(())
    }

    /// Requests the worker to stop and waits for it up to the stop timeout.
    /// Returns `false` if the worker was still busy when the timeout expired;
    /// it then exits at its next cancellation check.
    pub async fn stop(&mut self) -> bool {
        self.cancel.cancel();
        let Some(worker) = self.worker.as_mut() else {
            self.state = ControllerState::Stopped;
            return true;
        };
        self.state = ControllerState::StoppingRequested;

        match tokio::time::timeout(self.stop_timeout, worker).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    error!("Watch worker ended abnormally: {}", e);
                }
                self.worker = None;
                self.state = ControllerState::Stopped;
                true
            }
            Err(_) => {
                warn!(
                    "Watch worker did not stop within {:?}; it will exit after its current step",
                    self.stop_timeout
                );
                false
            }
        }
    }
}

/// Sleeps for `duration` unless cancelled first. Returns `false` on
/// cancellation.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

async fn run_loop(
    watcher: Arc<ConfigValueWatcher>,
    dispatcher: Arc<StatusActionDispatcher>,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    info!("Starting NetSkope NPA Tunnel status monitoring");

    while !cancel.is_cancelled() {
        match watcher.open_and_wait(&cancel).await {
            Ok(WatchOutcome::Changed(status)) => dispatcher.dispatch(&status, &cancel).await,
            Ok(WatchOutcome::KeyNotFound) => {
                warn!(
                    "Registry key not found: {}. Retrying in {} seconds.",
                    watcher.key_path(),
                    retry_interval.as_secs()
                );
                sleep_unless_cancelled(retry_interval, &cancel).await;
            }
            Ok(WatchOutcome::Cancelled) => break,
            Err(e) => {
                error!(
                    "Error monitoring registry: {}. Retrying in {} seconds.",
                    e,
                    retry_interval.as_secs()
                );
                sleep_unless_cancelled(retry_interval, &cancel).await;
            }
        }
    }

    info!("NetSkope NPA Tunnel status monitoring stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::modules::dispatcher::testing::{RecordingReevaluator, RecordingScript};
    use crate::modules::watcher::testing::{FakeRegistry, FakeStore, ValueState};
    use crate::platform::ChangeWait;
    use tokio::time::Instant;

    const RETRY: Duration = Duration::from_secs(30);

    struct Harness {
        registry: Arc<FakeRegistry>,
        script: Arc<RecordingScript>,
        reevaluator: Arc<RecordingReevaluator>,
        controller: WatchLoopController,
    }

    fn harness(present: bool, value: ValueState) -> Harness {
        let registry = FakeRegistry::new(present, value);
        let script = Arc::new(RecordingScript::default());
        let reevaluator = Arc::new(RecordingReevaluator::default());
        let watcher =
            ConfigValueWatcher::new(Arc::new(FakeStore(registry.clone())), &WatchConfig::default());
        let dispatcher = StatusActionDispatcher::new(script.clone(), Some(reevaluator.clone()));
        Harness {
            registry,
            script,
            reevaluator,
            controller: WatchLoopController::new(watcher, dispatcher, RETRY, Duration::from_secs(1)),
        }
    }

    /// Runs until the fake registry has handed out every queued wait result.
    async fn run_until_drained(h: &mut Harness) {
        h.controller.start().unwrap();
        h.registry.cancel_when_drained(h.controller.cancel.clone());
        let worker = h.controller.worker.take().unwrap();
        worker.await.unwrap();
        h.controller.state = ControllerState::Stopped;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_key_retries_at_fixed_interval_without_dispatch() {
        let mut h = harness(false, ValueState::Present("Connected".into()));
        let started = Instant::now();
        h.controller.start().unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(h.controller.stop().await);

        let opens = h.registry.opens.lock().unwrap().clone();
        let offsets: Vec<u64> = opens.iter().map(|t| (*t - started).as_secs()).collect();
        assert_eq!(offsets, vec![0, 30, 60, 90]);
        assert!(h.script.calls().is_empty());
        assert!(h.reevaluator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_on_first_open_after_key_appears() {
        let mut h = harness(false, ValueState::Present("Connected".into()));
        let started = Instant::now();
        h.controller.start().unwrap();

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(h.script.calls().is_empty());
        h.registry.set_present(true);
        h.registry.push_changes(1);
        h.registry.cancel_when_drained(h.controller.cancel.clone());

        let worker = h.controller.worker.take().unwrap();
        worker.await.unwrap();

        let opens = h.registry.opens.lock().unwrap().clone();
        let offsets: Vec<u64> = opens.iter().map(|t| (*t - started).as_secs()).collect();
        // absent at 0 and 30, present from the open at 60 on
        assert_eq!(&offsets[..3], &[0, 30, 60]);
        assert_eq!(h.script.calls(), vec!["Connected"]);
        assert_eq!(h.reevaluator.calls(), vec!["Connected"]);
        assert_eq!(h.registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn connected_then_disconnected_dispatches_each_once() {
        let mut h = harness(true, ValueState::Missing);
        h.registry.push_change_to(ValueState::Present("Connected".into()));
        h.registry.push_change_to(ValueState::Present("Disconnected".into()));
        run_until_drained(&mut h).await;

        assert_eq!(h.script.calls(), vec!["Connected", "Disconnected"]);
        assert_eq!(h.reevaluator.calls(), vec!["Connected", "Disconnected"]);
        assert_eq!(h.registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn read_failure_dispatches_error_without_reevaluation() {
        let mut h = harness(true, ValueState::ReadFails);
        h.registry.push_changes(1);
        run_until_drained(&mut h).await;

        assert_eq!(h.script.calls(), vec!["Error"]);
        assert!(h.reevaluator.calls().is_empty());
        assert_eq!(h.registry.handles_open(), 0);
    }

    #[tokio::test]
    async fn every_iteration_releases_the_key() {
        let mut h = harness(true, ValueState::Present("Connecting".into()));
        h.registry.push_changes(3);
        run_until_drained(&mut h).await;

        assert_eq!(h.script.calls(), vec!["Connecting"; 3]);
        assert!(h.reevaluator.calls().is_empty());
        assert_eq!(h.registry.handles_open(), 0);
        assert_eq!(h.registry.open_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_failure_waits_retry_interval_and_continues() {
        let mut h = harness(true, ValueState::Present("Connected".into()));
        h.registry
            .push_wait(Err(MonitorError::Registry("notify failed".into())));
        h.registry.push_changes(1);
        let started = Instant::now();
        run_until_drained(&mut h).await;

        let opens = h.registry.opens.lock().unwrap().clone();
        assert_eq!((opens[1] - started).as_secs(), 30);
        assert_eq!(h.script.calls(), vec!["Connected"]);
        assert_eq!(h.registry.handles_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_not_fatal() {
        let mut h = harness(true, ValueState::Present("Connected".into()));
        *h.registry.fail_open.lock().unwrap() = true;
        h.controller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.registry.open_count(), 3);
        assert!(h.controller.stop().await);
        assert_eq!(h.controller.state(), ControllerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_retry_sleep() {
        let mut h = harness(false, ValueState::Missing);
        h.controller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        assert!(h.controller.stop().await);
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(h.registry.open_count(), 1);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let mut h = harness(false, ValueState::Missing);
        h.controller.start().unwrap();
        assert_eq!(h.controller.state(), ControllerState::Running);
        assert!(matches!(h.controller.start(), Err(MonitorError::AlreadyRunning)));
        assert!(h.controller.stop().await);
        h.controller.start().unwrap();
        assert!(h.controller.stop().await);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut h = harness(false, ValueState::Missing);
        assert!(h.controller.stop().await);
        assert_eq!(h.controller.state(), ControllerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_slices_do_not_dispatch() {
        let mut h = harness(true, ValueState::Present("Connected".into()));
        for _ in 0..5 {
            h.registry.push_wait(Ok(ChangeWait::TimedOut));
        }
        run_until_drained(&mut h).await;
        assert!(h.script.calls().is_empty());
        assert_eq!(h.registry.open_count(), 1);
    }
}
