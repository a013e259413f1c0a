// Lifetime of the running indicator and its background work.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::model::{ServiceEntry, UnitKey};
use super::registry::{Registry, ReloadOutcome};
use super::settings::SettingsStore;
use super::systemd::{ActionExecutor, Existence, ProcessInvoker, StateProber};
use super::toggle::{ToggleController, ToggleError, ToggleEvent, ToggleState};

#[derive(Debug)]
pub enum IndicatorEvent {
    Reloaded(ReloadOutcome),
    Toggled(ToggleEvent),
    ExistenceChecked {
        entry: ServiceEntry,
        existence: Existence,
    },
}

/// Wires the registry, the toggle controller and the `service-list`
/// subscription together.
///
/// Background work runs on a [`TaskTracker`] raced against one
/// [`CancellationToken`], and results come back as [`IndicatorEvent`]s.
/// [`Indicator::disable`] cancels everything and waits for it, so no result
/// is delivered after teardown and in-flight `systemctl` children are killed.
pub struct Indicator<I> {
    registry: Arc<Registry<I>>,
    toggles: Arc<ToggleController<I>>,
    prober: StateProber<I>,
    settings: SettingsStore,
    subscription: watch::Receiver<Vec<String>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    events: mpsc::UnboundedSender<IndicatorEvent>,
}

impl<I: ProcessInvoker> Indicator<I> {
    pub fn enable(
        invoker: Arc<I>,
        settings: SettingsStore,
    ) -> (Self, mpsc::UnboundedReceiver<IndicatorEvent>) {
        let prober = StateProber::new(Arc::clone(&invoker));
        let registry = Arc::new(Registry::new(prober.clone()));
        let toggles = Arc::new(ToggleController::new(
            ActionExecutor::new(invoker),
            Arc::clone(&registry),
        ));
        let (events, rx) = mpsc::unbounded_channel();

        let indicator = Self {
            registry,
            toggles,
            prober,
            subscription: settings.subscribe(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            events,
            settings,
        };
        indicator
            .settings
            .spawn_watcher(&indicator.tracker, indicator.cancel.child_token());
        indicator.request_reload();
        info!("indicator enabled");

        (indicator, rx)
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = IndicatorEvent> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let events = self.events.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                event = work => {
                    let _ = events.send(event);
                }
            }
        });
    }

    pub fn request_reload(&self) {
        let registry = Arc::clone(&self.registry);
        let settings = self.settings.clone();
        self.spawn(async move {
            IndicatorEvent::Reloaded(registry.reload_with(|| settings.service_list()).await)
        });
    }

    /// Claims the unit and starts the action in the background.
    ///
    /// Fails without side effects if the unit already has a request pending.
    pub fn request_toggle(&self, entry: &ServiceEntry, desired: bool) -> Result<(), ToggleError> {
        let pending = self.toggles.begin(entry, desired)?;
        let toggles = Arc::clone(&self.toggles);
        self.spawn(async move { IndicatorEvent::Toggled(toggles.complete(pending).await) });
        Ok(())
    }

    pub fn request_existence_check(&self, entry: ServiceEntry) {
        let prober = self.prober.clone();
        self.spawn(async move {
            let existence = prober.exists(&entry.name, entry.scope).await;
            IndicatorEvent::ExistenceChecked { entry, existence }
        });
    }

    pub fn toggle_state(&self, unit: &UnitKey) -> ToggleState {
        self.toggles.state(unit)
    }

    pub async fn sorted_view(&self) -> Vec<ServiceEntry> {
        self.registry.sorted_view().await
    }

    /// Resolves with the new list whenever `service-list` changes.
    ///
    /// Returns `None` once the store is gone.
    pub async fn settings_changed(&mut self) -> Option<Vec<String>> {
        self.subscription.changed().await.ok()?;
        let tokens = self.subscription.borrow_and_update().clone();
        debug!(entries = tokens.len(), "service list changed");
        Some(tokens)
    }

    pub async fn disable(self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("indicator disabled");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::test_support::FakeInvoker;

    async fn next_reload(rx: &mut mpsc::UnboundedReceiver<IndicatorEvent>) -> ReloadOutcome {
        loop {
            match rx.recv().await {
                Some(IndicatorEvent::Reloaded(outcome)) => return outcome,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn enable_runs_initial_reload() {
        let invoker = Arc::new(FakeInvoker::new().with_code("is-active", "sshd", 0));
        let settings = SettingsStore::in_memory(vec!["sshd".to_string()]);
        let (indicator, mut rx) = Indicator::enable(invoker, settings);

        assert!(matches!(
            next_reload(&mut rx).await,
            ReloadOutcome::Committed { entries: 1, .. }
        ));
        assert!(indicator.sorted_view().await[0].active);
        indicator.disable().await;
    }

    #[tokio::test]
    async fn settings_change_is_observed() {
        let invoker = Arc::new(FakeInvoker::new());
        let settings = SettingsStore::in_memory(Vec::new());
        let (mut indicator, mut rx) = Indicator::enable(invoker, settings.clone());
        next_reload(&mut rx).await;

        settings.set_service_list(vec!["cups".to_string()]).unwrap();
        let tokens = indicator.settings_changed().await.unwrap();
        assert_eq!(tokens, ["cups"]);

        indicator.request_reload();
        next_reload(&mut rx).await;
        assert_eq!(indicator.sorted_view().await[0].name, "cups");
        indicator.disable().await;
    }

    #[tokio::test]
    async fn toggle_result_is_delivered() {
        let invoker = Arc::new(
            FakeInvoker::new()
                .with_code("is-active", "web", 3)
                .with_code("start", "web", 1),
        );
        let settings = SettingsStore::in_memory(vec!["web".to_string()]);
        let (indicator, mut rx) = Indicator::enable(invoker, settings);
        next_reload(&mut rx).await;
        let entry = indicator.sorted_view().await.remove(0);

        indicator.request_toggle(&entry, true).unwrap();

        let event = loop {
            if let Some(IndicatorEvent::Toggled(event)) = rx.recv().await {
                break event;
            }
        };
        assert!(matches!(event, ToggleEvent::RolledBack { active: false, .. }));
        assert_eq!(indicator.toggle_state(&entry.key()), ToggleState::Idle);
        indicator.disable().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disable_cancels_in_flight_work() {
        let invoker = Arc::new(FakeInvoker::new().with_delayed_code(
            "stop",
            "slow",
            0,
            Duration::from_secs(60),
        ));
        let settings = SettingsStore::in_memory(vec!["slow".to_string()]);
        let (indicator, mut rx) = Indicator::enable(invoker, settings);
        next_reload(&mut rx).await;
        let entry = indicator.sorted_view().await.remove(0);

        indicator.request_toggle(&entry, false).unwrap();
        indicator.disable().await;

        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, IndicatorEvent::Toggled(_)));
        }
    }
}
