// In-memory registry of monitored services.

use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use super::model::{Scope, ServiceEntry, UnitKey};
use super::systemd::{ProcessInvoker, StateProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Committed { generation: u64, entries: usize },
    /// A newer reload started before this one finished.
    Superseded { generation: u64 },
}

#[derive(Default)]
struct State {
    entries: Vec<ServiceEntry>,
    /// Highest generation started.
    started: u64,
    /// Generation whose entries are currently held.
    committed: u64,
    /// Marks made while `started > committed`, stamped with `started`.
    marks: HashMap<UnitKey, (bool, u64)>,
}

/// Disposable cache of the `service-list` setting.
///
/// Every [`Registry::reload`] re-decodes the whole list and probes each unit
/// concurrently. Reloads are tagged with a generation and only the newest
/// one started may commit. An older reload stops probing as soon as a newer
/// one starts, which drops its `systemctl` children.
///
/// Toggle results land through [`Registry::mark_active`]. A mark made while a
/// reload is probing is replayed onto that reload's entries when it commits.
pub struct Registry<I> {
    prober: StateProber<I>,
    state: RwLock<State>,
    /// Mirrors `State::started` for reloads racing their probes against it.
    newest: watch::Sender<u64>,
}

impl<I: ProcessInvoker> Registry<I> {
    pub fn new(prober: StateProber<I>) -> Self {
        Self {
            prober,
            state: RwLock::new(State::default()),
            newest: watch::Sender::new(0),
        }
    }

    /// Replaces all entries from `tokens`, probing every usable entry.
    pub async fn reload(&self, tokens: &[String]) -> ReloadOutcome {
        self.reload_with(|| tokens.to_vec()).await
    }

    /// Like [`Registry::reload`], but reads the list only after claiming a
    /// generation, so the newest generation always sees the newest list.
    pub async fn reload_with(&self, load: impl FnOnce() -> Vec<String>) -> ReloadOutcome {
        let generation = {
            let mut state = self.state.write().await;
            state.started += 1;
            self.newest.send_replace(state.started);
            state.started
        };
        let mut newest = self.newest.subscribe();
        let tokens = load();

        let mut entries: Vec<ServiceEntry> = tokens
            .iter()
            .enumerate()
            .filter_map(|(position, token)| {
                let entry = ServiceEntry::decode(token);
                if entry.is_usable() {
                    Some(entry)
                } else {
                    warn!(position, token = %token, "skipping service entry with empty name");
                    None
                }
            })
            .collect();

        let probes = entries
            .iter()
            .map(|entry| self.prober.is_active(&entry.name, entry.scope));
        let states = tokio::select! {
            states = join_all(probes) => states,
            _ = newest.wait_for(|started| *started != generation) => {
                debug!(generation, "reload superseded while probing");
                return ReloadOutcome::Superseded { generation };
            }
        };
        for (entry, active) in entries.iter_mut().zip(states) {
            entry.active = active;
        }

        let mut state = self.state.write().await;
        if state.started != generation {
            debug!(generation, newest = state.started, "reload superseded");
            return ReloadOutcome::Superseded { generation };
        }

        for (key, (active, stamp)) in state.marks.drain() {
            if stamp != generation {
                continue;
            }
            for entry in entries.iter_mut().filter(|entry| entry.key() == key) {
                entry.active = active;
            }
        }
        let count = entries.len();
        state.entries = entries;
        state.committed = generation;
        info!(generation, entries = count, "registry reloaded");

        ReloadOutcome::Committed {
            generation,
            entries: count,
        }
    }

    /// Entries ordered by name. Equal names keep their list order.
    pub async fn sorted_view(&self) -> Vec<ServiceEntry> {
        let mut view = self.state.read().await.entries.clone();
        view.sort_by(|a, b| a.name.cmp(&b.name));
        view
    }

    /// Records a confirmed state for every entry matching `name` and `scope`.
    ///
    /// Returns how many committed entries were updated.
    pub async fn mark_active(&self, name: &str, scope: Scope, active: bool) -> usize {
        let mut state = self.state.write().await;
        let key = UnitKey {
            name: name.to_string(),
            scope,
        };

        let mut updated = 0;
        for entry in state.entries.iter_mut().filter(|entry| entry.key() == key) {
            entry.active = active;
            updated += 1;
        }

        if state.started > state.committed {
            let stamp = state.started;
            state.marks.insert(key, (active, stamp));
        }
        updated
    }
}
