// Defines the core data structures for the application.

use std::fmt;

use thiserror::Error;

const USER_PREFIX: &str = "user:";
const UNIT_SUFFIX: &str = ".service";

/// Which systemd manager instance owns a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    #[default]
    System,
    User,
}

impl Scope {
    pub fn label(self) -> &'static str {
        match self {
            Scope::System => "system",
            Scope::User => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifies one unit on one manager instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub name: String,
    pub scope: Scope,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::System => write!(f, "{}", self.name),
            Scope::User => write!(f, "{} (user)", self.name),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("service name must not be empty")]
    EmptyName,
    #[error("service name `{0}` must not contain `:` or whitespace")]
    InvalidName(String),
    #[error("a system unit named `user` cannot have a display name")]
    AmbiguousUserUnit,
}

/// A monitored service as stored in the `service-list` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Unit name without the `.service` suffix.
    pub name: String,
    pub display_name: String,
    pub scope: Scope,
    /// Last probed activation state. Stale between probes.
    pub active: bool,
}

impl ServiceEntry {
    /// Builds a validated entry from user input.
    ///
    /// A trailing `.service` is stripped and an empty display name falls back
    /// to the unit name.
    pub fn new(name: &str, display_name: &str, scope: Scope) -> Result<Self, EntryError> {
        let name = name.trim();
        let name = name.strip_suffix(UNIT_SUFFIX).unwrap_or(name);
        if name.is_empty() {
            return Err(EntryError::EmptyName);
        }
        if name.contains(':') || name.contains(char::is_whitespace) {
            return Err(EntryError::InvalidName(name.to_string()));
        }

        let display_name = display_name.trim();
        let display_name = if display_name.is_empty() {
            name
        } else {
            display_name
        };
        // `user:<label>` would read back as a user unit named `<label>`.
        if scope == Scope::System && name == "user" && display_name != name {
            return Err(EntryError::AmbiguousUserUnit);
        }

        Ok(Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            scope,
            active: false,
        })
    }

    /// Decodes one persisted token: `[user:]name[:display name]`.
    ///
    /// Never fails. A token without a display segment uses the name as its
    /// label, and an empty token yields an entry with an empty name, which
    /// callers must treat as unusable.
    pub fn decode(token: &str) -> Self {
        let (scope, rest) = match token.strip_prefix(USER_PREFIX) {
            Some(rest) => (Scope::User, rest),
            None => (Scope::System, token),
        };

        let mut parts = rest.splitn(2, ':');
        let name = parts.next().unwrap_or_default();
        let display_name = parts.next().unwrap_or(name);

        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            scope,
            active: false,
        }
    }

    /// Encodes the entry back into its persisted token.
    pub fn encode(&self) -> String {
        let prefix = match self.scope {
            Scope::System => "",
            Scope::User => USER_PREFIX,
        };
        if self.display_name == self.name {
            format!("{prefix}{}", self.name)
        } else {
            format!("{prefix}{}:{}", self.name, self.display_name)
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey {
            name: self.name.clone(),
            scope: self.scope,
        }
    }

    pub fn unit(&self) -> String {
        unit_file_name(&self.name)
    }

    pub fn is_usable(&self) -> bool {
        !self.name.is_empty()
    }
}

pub fn unit_file_name(name: &str) -> String {
    format!("{name}{UNIT_SUFFIX}")
}
