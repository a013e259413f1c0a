// Editable view of the persisted service list behind the preferences view.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use tracing::info;

use super::model::ServiceEntry;
use super::settings::SettingsStore;
use super::systemd::Existence;

/// Stable identity of one row for as long as it stays in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(u64);

#[derive(Debug, Clone)]
pub struct Row {
    pub id: RowId,
    pub entry: ServiceEntry,
}

/// Ordered tokens, one row per token, and a map from row id to position.
///
/// The map is rebuilt after every structural change, so a row id always
/// resolves to its current position in the persisted list. Changes are
/// persisted first and only applied in memory once the save succeeded.
pub struct ServiceList {
    settings: SettingsStore,
    tokens: Vec<String>,
    rows: Vec<Row>,
    positions: HashMap<RowId, usize>,
    next_id: u64,
}

impl ServiceList {
    pub fn new(settings: SettingsStore) -> Self {
        let mut list = Self {
            tokens: Vec::new(),
            rows: Vec::new(),
            positions: HashMap::new(),
            next_id: 0,
            settings,
        };
        let tokens = list.settings.service_list();
        list.replace(tokens);
        list
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn current_tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings.path()
    }

    pub fn position(&self, id: RowId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Appends `entry` and persists the list.
    pub fn insert(&mut self, entry: ServiceEntry) -> Result<RowId> {
        let mut tokens = self.tokens.clone();
        tokens.push(entry.encode());
        self.persist(&tokens)?;

        let id = self.allocate();
        self.tokens = tokens;
        self.rows.push(Row { id, entry });
        self.positions.insert(id, self.rows.len() - 1);
        Ok(id)
    }

    /// Removes the row with `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: RowId) -> Result<bool> {
        let Some(position) = self.position(id) else {
            return Ok(false);
        };
        let mut tokens = self.tokens.clone();
        tokens.remove(position);
        self.persist(&tokens)?;

        self.tokens = tokens;
        let row = self.rows.remove(position);
        self.reindex();
        info!(service = %row.entry.key(), position, "service removed");
        Ok(true)
    }

    /// Adopts a list changed elsewhere. Returns false if nothing changed.
    pub fn refresh(&mut self, tokens: Vec<String>) -> bool {
        if tokens == self.tokens {
            return false;
        }
        self.replace(tokens);
        true
    }

    fn replace(&mut self, tokens: Vec<String>) {
        let mut rows = Vec::with_capacity(tokens.len());
        for token in &tokens {
            rows.push(Row {
                id: self.allocate(),
                entry: ServiceEntry::decode(token),
            });
        }
        self.rows = rows;
        self.tokens = tokens;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.positions = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.id, position))
            .collect();
    }

    fn allocate(&mut self) -> RowId {
        let id = RowId(self.next_id);
        self.next_id += 1;
        id
    }

    fn persist(&self, tokens: &[String]) -> Result<()> {
        self.settings.set_service_list(tokens.to_vec())
    }
}

/// What the add flow does once the existence check has answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddDecision {
    Insert,
    /// Nothing is persisted unless the user confirms.
    Confirm(Existence),
}

impl AddDecision {
    pub fn from_existence(existence: Existence) -> Self {
        if existence.is_found() {
            AddDecision::Insert
        } else {
            AddDecision::Confirm(existence)
        }
    }
}

pub fn confirmation_prompt(entry: &ServiceEntry, existence: &Existence) -> String {
    match existence {
        Existence::ProbeFailed(reason) => format!(
            "Could not check whether {} exists ({reason}). Add it anyway?",
            entry.unit()
        ),
        _ => format!("{} was not found. Add it anyway?", entry.unit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::Scope;

    fn entry(name: &str) -> ServiceEntry {
        ServiceEntry::new(name, "", Scope::System).unwrap()
    }

    #[test]
    fn loads_rows_from_settings() {
        let settings = SettingsStore::in_memory(vec!["a".to_string(), "user:b:Bee".to_string()]);
        let list = ServiceList::new(settings);

        assert_eq!(list.rows().len(), 2);
        assert_eq!(list.rows()[1].entry.display_name, "Bee");
        assert_eq!(list.position(list.rows()[1].id), Some(1));
    }

    #[test]
    fn removing_middle_row_reindexes() {
        let settings = SettingsStore::in_memory(Vec::new());
        let mut list = ServiceList::new(settings.clone());
        let first = list.insert(entry("first")).unwrap();
        let middle = list.insert(entry("middle")).unwrap();
        let last = list.insert(entry("last")).unwrap();
        assert_eq!(list.position(last), Some(2));

        assert!(list.remove(middle).unwrap());

        assert_eq!(list.position(first), Some(0));
        assert_eq!(list.position(last), Some(1));
        assert_eq!(list.position(middle), None);
        assert_eq!(list.current_tokens(), ["first", "last"]);
        assert_eq!(settings.service_list(), ["first", "last"]);
    }

    #[test]
    fn removing_unknown_row_is_a_no_op() {
        let settings = SettingsStore::in_memory(vec!["a".to_string()]);
        let mut list = ServiceList::new(settings);
        let id = list.rows()[0].id;

        assert!(list.remove(id).unwrap());
        assert!(!list.remove(id).unwrap());
        assert!(list.current_tokens().is_empty());
    }

    #[test]
    fn duplicates_are_allowed() {
        let mut list = ServiceList::new(SettingsStore::in_memory(Vec::new()));
        let a = list.insert(entry("sshd")).unwrap();
        let b = list.insert(entry("sshd")).unwrap();

        assert_ne!(a, b);
        assert_eq!(list.current_tokens(), ["sshd", "sshd"]);
    }

    #[test]
    fn insert_encodes_scope_and_display() {
        let settings = SettingsStore::in_memory(Vec::new());
        let mut list = ServiceList::new(settings.clone());
        list.insert(ServiceEntry::new("syncthing", "Sync", Scope::User).unwrap())
            .unwrap();

        assert_eq!(settings.service_list(), ["user:syncthing:Sync"]);
    }

    #[test]
    fn refresh_replaces_rows_only_on_change() {
        let mut list = ServiceList::new(SettingsStore::in_memory(vec!["a".to_string()]));
        let before = list.rows()[0].id;

        assert!(!list.refresh(vec!["a".to_string()]));
        assert_eq!(list.rows()[0].id, before);

        assert!(list.refresh(vec!["b".to_string(), "a".to_string()]));
        assert_eq!(list.rows().len(), 2);
        assert_eq!(list.position(list.rows()[1].id), Some(1));
        assert_eq!(list.position(before), None);
    }

    #[test]
    fn failed_insert_leaves_list_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let settings = SettingsStore::open(blocker.join("settings.yaml")).unwrap();
        let mut list = ServiceList::new(settings.clone());

        assert!(list.insert(entry("nginx")).is_err());

        assert!(list.rows().is_empty());
        assert!(list.current_tokens().is_empty());
        assert_eq!(list.current_tokens(), settings.service_list());
    }

    #[test]
    fn failed_remove_keeps_row() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("config");
        let path = parent.join("settings.yaml");
        std::fs::create_dir_all(&parent).unwrap();
        std::fs::write(&path, "service-list: [a, b]\n").unwrap();
        let settings = SettingsStore::open(path).unwrap();
        let mut list = ServiceList::new(settings.clone());
        let first = list.rows()[0].id;

        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "").unwrap();
        assert!(list.remove(first).is_err());

        assert_eq!(list.position(first), Some(0));
        assert_eq!(list.current_tokens(), ["a", "b"]);
        assert_eq!(settings.service_list(), ["a", "b"]);
    }

    #[test]
    fn add_decision_requires_confirmation_unless_found() {
        assert_eq!(AddDecision::from_existence(Existence::Found), AddDecision::Insert);
        assert_eq!(
            AddDecision::from_existence(Existence::NotFound),
            AddDecision::Confirm(Existence::NotFound)
        );

        let prompt = confirmation_prompt(
            &entry("ghost"),
            &Existence::ProbeFailed("timed out".to_string()),
        );
        assert!(prompt.contains("ghost.service"));
        assert!(prompt.contains("timed out"));
    }
}
