// The central application controller and event loop.

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::Backend, widgets::ListState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub mod indicator;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod settings;
pub mod systemd;
pub mod toggle;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_support;

use indicator::{Indicator, IndicatorEvent};
use model::{Scope, ServiceEntry, UnitKey};
use reconciler::{AddDecision, ServiceList};
use registry::ReloadOutcome;
use settings::SettingsStore;
use systemd::{Existence, TokioInvoker};
use toggle::{ToggleEvent, ToggleState};

const TOAST_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Indicator,
    Preferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FormField {
    #[default]
    Name,
    DisplayName,
    Scope,
}

impl FormField {
    fn next(self) -> Self {
        match self {
            FormField::Name => FormField::DisplayName,
            FormField::DisplayName => FormField::Scope,
            FormField::Scope => FormField::Name,
        }
    }
}

#[derive(Debug, Default)]
struct AddForm {
    name: String,
    display_name: String,
    scope: Scope,
    focus: FormField,
}

#[derive(Debug)]
enum Popup {
    AddForm(AddForm),
    Checking(ServiceEntry),
    Confirm {
        entry: ServiceEntry,
        existence: Existence,
    },
}

struct Toast {
    message: String,
    error: bool,
    shown: Instant,
}

pub struct App {
    indicator: Indicator<TokioInvoker>,
    events: mpsc::UnboundedReceiver<IndicatorEvent>,
    list: ServiceList,
    services: Vec<ServiceEntry>,
    /// Optimistically displayed state for units with a toggle in flight.
    pending: HashMap<UnitKey, bool>,
    list_state: ListState,
    prefs_state: ListState,
    view: View,
    popup: Option<Popup>,
    toast: Option<Toast>,
    refresh: Duration,
    should_quit: bool,
}

impl App {
    pub fn new(invoker: TokioInvoker, settings: SettingsStore, refresh: Duration) -> Self {
        let (indicator, events) = Indicator::enable(Arc::new(invoker), settings.clone());
        let mut list_state = ListState::default();
        list_state.select(Some(0)); // Start with first item selected
        let mut prefs_state = ListState::default();
        prefs_state.select(Some(0));

        Self {
            indicator,
            events,
            list: ServiceList::new(settings),
            services: Vec::new(),
            pending: HashMap::new(),
            list_state,
            prefs_state,
            view: View::Indicator,
            popup: None,
            toast: None,
            refresh,
            should_quit: false,
        }
    }

    pub async fn run<B: Backend>(mut self, terminal: &mut Terminal<B>) -> Result<()> {
        let mut input = EventStream::new();

        // Auto-refresh re-probes every unit; a zero interval turns it off.
        let auto_refresh = !self.refresh.is_zero();
        let period = self.refresh.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let result = loop {
            self.expire_toast();
            if let Err(err) = terminal.draw(|f| ui::render(f, &mut self)) {
                break Err(err.into());
            }

            tokio::select! {
                maybe_event = input.next() => match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(err.into()),
                    None => self.should_quit = true,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
                Some(tokens) = self.indicator.settings_changed() => {
                    self.indicator.request_reload();
                    if self.list.refresh(tokens) {
                        clamp(&mut self.prefs_state, self.list.rows().len());
                    }
                }
                _ = ticker.tick(), if auto_refresh => self.indicator.request_reload(),
            }

            if self.should_quit {
                break Ok(());
            }
        };

        self.indicator.disable().await;
        result
    }

    fn notify(&mut self, message: impl Into<String>, error: bool) {
        self.toast = Some(Toast {
            message: message.into(),
            error,
            shown: Instant::now(),
        });
    }

    fn expire_toast(&mut self) {
        if self
            .toast
            .as_ref()
            .is_some_and(|toast| toast.shown.elapsed() >= TOAST_TTL)
        {
            self.toast = None;
        }
    }

    async fn refresh_services(&mut self) {
        self.services = self.indicator.sorted_view().await;
        clamp(&mut self.list_state, self.services.len());
    }

    async fn handle_event(&mut self, event: IndicatorEvent) {
        match event {
            IndicatorEvent::Reloaded(ReloadOutcome::Committed { .. }) => {
                self.refresh_services().await;
            }
            IndicatorEvent::Reloaded(ReloadOutcome::Superseded { generation }) => {
                debug!(generation, "dropping superseded reload");
            }
            IndicatorEvent::Toggled(event) => {
                self.pending.remove(event.unit());
                self.refresh_services().await;
                if let ToggleEvent::RolledBack { reason, .. } = event {
                    self.notify(reason, true);
                }
            }
            IndicatorEvent::ExistenceChecked { entry, existence } => {
                let awaiting = matches!(&self.popup, Some(Popup::Checking(checking)) if *checking == entry);
                if !awaiting {
                    debug!(unit = %entry.key(), "ignoring stale existence check");
                    return;
                }
                match AddDecision::from_existence(existence) {
                    AddDecision::Insert => {
                        self.popup = None;
                        self.insert_entry(entry);
                    }
                    AddDecision::Confirm(existence) => {
                        self.popup = Some(Popup::Confirm { entry, existence });
                    }
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if let Some(popup) = self.popup.take() {
            self.popup = self.handle_popup_key(popup, key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Tab => {
                self.view = match self.view {
                    View::Indicator => View::Preferences,
                    View::Preferences => View::Indicator,
                };
            }
            KeyCode::Char('j') | KeyCode::Down => self.next(),
            KeyCode::Char('k') | KeyCode::Up => self.previous(),
            code => match self.view {
                View::Indicator => self.handle_indicator_key(code),
                View::Preferences => self.handle_preferences_key(code),
            },
        }
    }

    fn handle_indicator_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char(' ') | KeyCode::Enter => {
                if let Some(service) = self.selected_service() {
                    let desired = !service.active;
                    self.perform_toggle(desired);
                }
            }
            KeyCode::Char('s') => self.perform_toggle(true),
            KeyCode::Char('x') => self.perform_toggle(false),
            KeyCode::Char('r') => self.indicator.request_reload(),
            _ => {}
        }
    }

    fn handle_preferences_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('a') => self.popup = Some(Popup::AddForm(AddForm::default())),
            KeyCode::Char('d') | KeyCode::Delete => self.remove_selected(),
            _ => {}
        }
    }

    fn handle_popup_key(&mut self, popup: Popup, key: KeyEvent) -> Option<Popup> {
        match popup {
            Popup::AddForm(mut form) => {
                match key.code {
                    KeyCode::Esc => return None,
                    KeyCode::Tab => form.focus = form.focus.next(),
                    KeyCode::Enter => return self.submit_form(form),
                    KeyCode::Char(' ') if form.focus == FormField::Scope => {
                        form.scope = match form.scope {
                            Scope::System => Scope::User,
                            Scope::User => Scope::System,
                        };
                    }
                    KeyCode::Backspace => match form.focus {
                        FormField::Name => {
                            form.name.pop();
                        }
                        FormField::DisplayName => {
                            form.display_name.pop();
                        }
                        FormField::Scope => {}
                    },
                    KeyCode::Char(c) => match form.focus {
                        FormField::Name => form.name.push(c),
                        FormField::DisplayName => form.display_name.push(c),
                        FormField::Scope => {}
                    },
                    _ => {}
                }
                Some(Popup::AddForm(form))
            }
            Popup::Checking(entry) => match key.code {
                KeyCode::Esc => None,
                _ => Some(Popup::Checking(entry)),
            },
            Popup::Confirm { entry, existence } => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.insert_entry(entry);
                    None
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.notify(format!("{} was not added", entry.unit()), false);
                    None
                }
                _ => Some(Popup::Confirm { entry, existence }),
            },
        }
    }

    fn submit_form(&mut self, form: AddForm) -> Option<Popup> {
        match ServiceEntry::new(&form.name, &form.display_name, form.scope) {
            Ok(entry) => {
                self.indicator.request_existence_check(entry.clone());
                Some(Popup::Checking(entry))
            }
            Err(err) => {
                self.notify(err.to_string(), true);
                Some(Popup::AddForm(form))
            }
        }
    }

    fn insert_entry(&mut self, entry: ServiceEntry) {
        let unit = entry.unit();
        match self.list.insert(entry) {
            Ok(_) => {
                self.prefs_state.select(Some(self.list.rows().len() - 1));
                self.notify(format!("Added {unit}"), false);
            }
            Err(err) => {
                warn!(error = %err, "failed to save service list");
                self.notify(format!("Could not save settings: {err:#}"), true);
            }
        }
    }

    fn remove_selected(&mut self) {
        let Some(row) = self
            .prefs_state
            .selected()
            .and_then(|index| self.list.rows().get(index))
        else {
            return;
        };
        let (id, unit) = (row.id, row.entry.unit());
        match self.list.remove(id) {
            Ok(true) => {
                clamp(&mut self.prefs_state, self.list.rows().len());
                self.notify(format!("Removed {unit}"), false);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "failed to save service list");
                self.notify(format!("Could not save settings: {err:#}"), true);
            }
        }
    }

    fn selected_service(&self) -> Option<&ServiceEntry> {
        self.list_state
            .selected()
            .and_then(|index| self.services.get(index))
    }

    fn perform_toggle(&mut self, desired: bool) {
        let Some(service) = self.selected_service().cloned() else {
            return;
        };
        if self.indicator.toggle_state(&service.key()) == ToggleState::Pending {
            return;
        }
        match self.indicator.request_toggle(&service, desired) {
            Ok(()) => {
                self.pending.insert(service.key(), desired);
            }
            Err(err) => self.notify(err.to_string(), true),
        }
    }

    fn active_len(&self) -> usize {
        match self.view {
            View::Indicator => self.services.len(),
            View::Preferences => self.list.rows().len(),
        }
    }

    fn active_state(&mut self) -> &mut ListState {
        match self.view {
            View::Indicator => &mut self.list_state,
            View::Preferences => &mut self.prefs_state,
        }
    }

    fn next(&mut self) {
        let len = self.active_len();
        let state = self.active_state();
        let i = match state.selected() {
            Some(i) => {
                if i >= len.saturating_sub(1) {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        state.select(Some(i));
    }

    fn previous(&mut self) {
        let len = self.active_len();
        let state = self.active_state();
        let i = match state.selected() {
            Some(i) => {
                if i == 0 {
                    len.saturating_sub(1)
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        state.select(Some(i));
    }
}

/// Keeps the selection inside a list of `len` rows.
fn clamp(state: &mut ListState, len: usize) {
    if let Some(selected) = state.selected() {
        if selected >= len {
            state.select(Some(len.saturating_sub(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_pulls_selection_back_into_range() {
        let mut state = ListState::default();
        state.select(Some(4));
        clamp(&mut state, 2);
        assert_eq!(state.selected(), Some(1));

        clamp(&mut state, 0);
        assert_eq!(state.selected(), Some(0));
    }

    #[test]
    fn form_focus_cycles() {
        let focus = FormField::default();
        assert_eq!(focus.next(), FormField::DisplayName);
        assert_eq!(focus.next().next().next(), FormField::Name);
    }
}
