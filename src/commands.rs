// Non-interactive subcommands sharing the settings file with the UI.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::warn;

use crate::app::model::{Scope, ServiceEntry};
use crate::app::reconciler::{AddDecision, ServiceList, confirmation_prompt};
use crate::app::registry::Registry;
use crate::app::settings::SettingsStore;
use crate::app::systemd::{ActionExecutor, ProcessInvoker, StateProber};
use crate::app::toggle::{ToggleController, ToggleEvent};

fn scope(user: bool) -> Scope {
    if user { Scope::User } else { Scope::System }
}

pub async fn list<I: ProcessInvoker>(invoker: I, store: &SettingsStore) -> Result<()> {
    let registry = Registry::new(StateProber::new(Arc::new(invoker)));
    registry.reload(&store.service_list()).await;

    let services = registry.sorted_view().await;
    if services.is_empty() {
        match store.path() {
            Some(path) => println!("No services configured in {}", path.display()),
            None => println!("No services configured"),
        }
        return Ok(());
    }
    for service in services {
        println!("{}", list_line(&service));
    }
    Ok(())
}

/// `● name  (display)  [scope]`
fn list_line(service: &ServiceEntry) -> String {
    let symbol = if service.active { "●" } else { "○" };
    format!(
        "{symbol} {:<32}  ({})  [{}]",
        service.name, service.display_name, service.scope
    )
}

pub fn list_raw(store: &SettingsStore) -> Result<()> {
    for (position, token) in store.service_list().iter().enumerate() {
        println!("{position:>3}  {token}");
    }
    Ok(())
}

pub async fn add<I: ProcessInvoker>(
    invoker: I,
    store: SettingsStore,
    name: &str,
    display: Option<&str>,
    user: bool,
    force: bool,
) -> Result<()> {
    let entry = ServiceEntry::new(name, display.unwrap_or_default(), scope(user))?;
    let prober = StateProber::new(Arc::new(invoker));
    let existence = prober.exists(&entry.name, entry.scope).await;

    if let AddDecision::Confirm(existence) = AddDecision::from_existence(existence) {
        let prompt = confirmation_prompt(&entry, &existence);
        if !force {
            bail!("{prompt} Pass --force to add it anyway.");
        }
        warn!(unit = %entry.key(), "adding unit that could not be found");
    }

    let unit = entry.unit();
    ServiceList::new(store).insert(entry)?;
    println!("Added {unit}");
    Ok(())
}

pub fn remove(store: SettingsStore, position: usize) -> Result<()> {
    let mut list = ServiceList::new(store);
    let Some(row) = list.rows().get(position) else {
        bail!(
            "no service at position {position} (list has {} entries)",
            list.rows().len()
        );
    };
    let (id, token) = (row.id, row.entry.encode());
    list.remove(id)?;
    println!("Removed {token}");
    Ok(())
}

pub async fn set_active<I: ProcessInvoker>(
    invoker: I,
    store: &SettingsStore,
    name: &str,
    user: bool,
    desired: bool,
) -> Result<()> {
    let requested = ServiceEntry::new(name, "", scope(user))?;
    let invoker = Arc::new(invoker);
    let registry = Arc::new(Registry::new(StateProber::new(Arc::clone(&invoker))));
    registry.reload(&store.service_list()).await;

    // Prefer the configured entry for its label and last known state.
    let entry = registry
        .sorted_view()
        .await
        .into_iter()
        .find(|entry| entry.key() == requested.key())
        .unwrap_or(requested);

    let controller = ToggleController::new(ActionExecutor::new(invoker), registry);
    match controller.request_toggle(&entry, desired).await? {
        ToggleEvent::Applied { unit, active } => {
            let verb = if active { "Started" } else { "Stopped" };
            println!("{verb} {unit}");
            Ok(())
        }
        ToggleEvent::RolledBack { reason, .. } => bail!(reason),
    }
}
