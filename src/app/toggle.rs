// Optimistic start/stop requests and their in-flight bookkeeping.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{info, warn};

use super::model::{ServiceEntry, UnitKey};
use super::registry::Registry;
use super::systemd::{ActionExecutor, ProcessInvoker, ServiceAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Idle,
    Pending,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToggleError {
    #[error("{0} already has a request in flight")]
    Busy(UnitKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleEvent {
    Applied {
        unit: UnitKey,
        active: bool,
    },
    /// The action failed; `active` is the state to display again.
    RolledBack {
        unit: UnitKey,
        active: bool,
        reason: String,
    },
}

impl ToggleEvent {
    pub fn unit(&self) -> &UnitKey {
        match self {
            ToggleEvent::Applied { unit, .. } | ToggleEvent::RolledBack { unit, .. } => unit,
        }
    }
}

type InFlight = Arc<Mutex<HashSet<UnitKey>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<UnitKey>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Claim on one unit; releases the unit back to `Idle` when dropped.
pub struct PendingToggle {
    entry: ServiceEntry,
    desired: bool,
    in_flight: InFlight,
}

impl PendingToggle {
    pub fn entry(&self) -> &ServiceEntry {
        &self.entry
    }

    pub fn desired(&self) -> bool {
        self.desired
    }
}

impl Drop for PendingToggle {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.entry.key());
    }
}

/// Moves a request `Idle -> Pending -> {Applied, RolledBack}`.
///
/// While a unit is `Pending` further requests for it are rejected with
/// [`ToggleError::Busy`]; other units run independently. Only an applied
/// request touches the registry.
pub struct ToggleController<I> {
    executor: ActionExecutor<I>,
    registry: Arc<Registry<I>>,
    in_flight: InFlight,
}

impl<I: ProcessInvoker> ToggleController<I> {
    pub fn new(executor: ActionExecutor<I>, registry: Arc<Registry<I>>) -> Self {
        Self {
            executor,
            registry,
            in_flight: InFlight::default(),
        }
    }

    pub fn state(&self, unit: &UnitKey) -> ToggleState {
        if lock(&self.in_flight).contains(unit) {
            ToggleState::Pending
        } else {
            ToggleState::Idle
        }
    }

    /// Moves the unit to `Pending`. The caller shows `desired` right away.
    pub fn begin(&self, entry: &ServiceEntry, desired: bool) -> Result<PendingToggle, ToggleError> {
        let key = entry.key();
        if !lock(&self.in_flight).insert(key.clone()) {
            return Err(ToggleError::Busy(key));
        }
        Ok(PendingToggle {
            entry: entry.clone(),
            desired,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Runs the action for a pending request and settles it.
    pub async fn complete(&self, pending: PendingToggle) -> ToggleEvent {
        let entry = pending.entry();
        let desired = pending.desired();
        let verb = ServiceAction::for_state(desired).verb();

        match self
            .executor
            .set_active(&entry.name, entry.scope, desired)
            .await
        {
            Ok(()) => {
                self.registry
                    .mark_active(&entry.name, entry.scope, desired)
                    .await;
                info!(unit = %entry.key(), action = verb, "toggle applied");
                ToggleEvent::Applied {
                    unit: entry.key(),
                    active: desired,
                }
            }
            Err(err) => {
                warn!(unit = %entry.key(), action = verb, error = %err, "toggle rolled back");
                ToggleEvent::RolledBack {
                    unit: entry.key(),
                    active: entry.active,
                    reason: format!("Failed to {verb} {}: {err}", entry.display_name),
                }
            }
        }
    }

    pub async fn request_toggle(
        &self,
        entry: &ServiceEntry,
        desired: bool,
    ) -> Result<ToggleEvent, ToggleError> {
        let pending = self.begin(entry, desired)?;
        Ok(self.complete(pending).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::Scope;
    use crate::app::systemd::StateProber;
    use crate::app::test_support::FakeInvoker;

    async fn controller(
        invoker: FakeInvoker,
        list: &[&str],
    ) -> (ToggleController<FakeInvoker>, Arc<Registry<FakeInvoker>>) {
        let invoker = Arc::new(invoker);
        let registry = Arc::new(Registry::new(StateProber::new(Arc::clone(&invoker))));
        let tokens: Vec<String> = list.iter().map(|token| token.to_string()).collect();
        registry.reload(&tokens).await;
        let controller = ToggleController::new(ActionExecutor::new(invoker), Arc::clone(&registry));
        (controller, registry)
    }

    #[tokio::test]
    async fn failed_stop_rolls_back() {
        let (controller, registry) = controller(
            FakeInvoker::new()
                .with_code("is-active", "nginx", 0)
                .with_code("stop", "nginx", 1),
            &["nginx:Web Server"],
        )
        .await;
        let entry = registry.sorted_view().await.remove(0);
        assert!(entry.active);

        let event = controller.request_toggle(&entry, false).await.unwrap();

        match event {
            ToggleEvent::RolledBack {
                unit,
                active,
                reason,
            } => {
                assert_eq!(unit.name, "nginx");
                assert!(active);
                assert!(reason.contains("stop"));
                assert!(reason.contains("Web Server"));
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        assert!(registry.sorted_view().await[0].active);
        assert_eq!(controller.state(&entry.key()), ToggleState::Idle);
    }

    #[tokio::test]
    async fn successful_start_marks_registry() {
        let (controller, registry) = controller(
            FakeInvoker::new()
                .with_code("is-active", "syncthing", 3)
                .with_code("start", "syncthing", 0),
            &["user:syncthing"],
        )
        .await;
        let entry = registry.sorted_view().await.remove(0);

        let event = controller.request_toggle(&entry, true).await.unwrap();

        assert_eq!(
            event,
            ToggleEvent::Applied {
                unit: UnitKey {
                    name: "syncthing".to_string(),
                    scope: Scope::User
                },
                active: true
            }
        );
        assert!(registry.sorted_view().await[0].active);
    }

    #[tokio::test]
    async fn second_request_for_same_unit_is_rejected() {
        let (controller, registry) = controller(FakeInvoker::new(), &["a", "b"]).await;
        let view = registry.sorted_view().await;

        let pending = controller.begin(&view[0], true).unwrap();
        assert_eq!(controller.state(&view[0].key()), ToggleState::Pending);
        assert_eq!(
            controller.begin(&view[0], false).err(),
            Some(ToggleError::Busy(view[0].key()))
        );
        assert!(controller.begin(&view[1], true).is_ok());

        drop(pending);
        assert_eq!(controller.state(&view[0].key()), ToggleState::Idle);
    }
}
