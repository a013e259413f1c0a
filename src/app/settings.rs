// Persisted settings: the `service-list` key plus the refresh interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub const SETTINGS_ENV: &str = "SYSTEMD_INDICATOR_SETTINGS";

/// How often the settings file is checked for external edits.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_REFRESH_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub service_list: Vec<String>,
    /// Seconds between automatic re-probes; 0 disables them.
    #[serde(default = "default_refresh")]
    pub refresh_interval: u64,
}

fn default_refresh() -> u64 {
    DEFAULT_REFRESH_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_list: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_SECS,
        }
    }
}

impl Settings {
    fn read(path: &Path) -> Result<Self> {
        Ok(Self::read_present(path)?.unwrap_or_default())
    }

    /// `None` when the file is missing or blank.
    fn read_present(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_yaml::from_str(&content)
            .map(Some)
            .with_context(|| format!("cannot parse {}", path.display()))
    }

    /// Writes a sibling temp file and renames it over `path`.
    fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self).context("cannot serialize settings")?;

        let temp_path = path.with_extension("yaml.tmp");
        std::fs::write(&temp_path, content)
            .with_context(|| format!("cannot write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("cannot replace {}", path.display()))
    }
}

/// `<config dir>/systemd-indicator/settings.yaml`
pub fn default_path() -> Result<PathBuf> {
    let config =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    Ok(config.join("systemd-indicator").join("settings.yaml"))
}

struct Inner {
    path: Option<PathBuf>,
    refresh_interval: u64,
    service_list: watch::Sender<Vec<String>>,
}

/// Key-value store with change notification on `service-list`.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Inner>,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let settings = Settings::read(&path)?;
        Ok(Self::build(Some(path), settings))
    }

    /// A store that is never written to disk.
    pub fn in_memory(service_list: Vec<String>) -> Self {
        Self::build(
            None,
            Settings {
                service_list,
                ..Settings::default()
            },
        )
    }

    fn build(path: Option<PathBuf>, settings: Settings) -> Self {
        let (service_list, _) = watch::channel(settings.service_list);
        Self {
            inner: Arc::new(Inner {
                path,
                refresh_interval: settings.refresh_interval,
                service_list,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn service_list(&self) -> Vec<String> {
        self.inner.service_list.borrow().clone()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.inner.refresh_interval)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.inner.service_list.subscribe()
    }

    /// Persists `tokens` and notifies subscribers if the list changed.
    ///
    /// Other keys in the file are re-read and kept as they are on disk.
    pub fn set_service_list(&self, tokens: Vec<String>) -> Result<()> {
        if let Some(path) = &self.inner.path {
            let mut settings = Settings::read(path).unwrap_or_else(|err| {
                warn!(error = %err, "overwriting unreadable settings file");
                Settings {
                    refresh_interval: self.inner.refresh_interval,
                    ..Settings::default()
                }
            });
            settings.service_list = tokens.clone();
            settings.write(path)?;
        }
        self.publish(tokens);
        Ok(())
    }

    fn publish(&self, tokens: Vec<String>) -> bool {
        self.inner.service_list.send_if_modified(|current| {
            if *current == tokens {
                false
            } else {
                *current = tokens;
                true
            }
        })
    }

    /// Re-reads the file and publishes an externally edited list.
    ///
    /// A missing or blank file is taken as a save in progress and ignored.
    pub fn poll_disk(&self) -> Result<bool> {
        let Some(path) = &self.inner.path else {
            return Ok(false);
        };
        match Settings::read_present(path)? {
            Some(settings) => Ok(self.publish(settings.service_list)),
            None => Ok(false),
        }
    }

    /// Polls the settings file until `cancel` fires.
    pub fn spawn_watcher(&self, tracker: &TaskTracker, cancel: CancellationToken) {
        if self.inner.path.is_none() {
            return;
        }
        let store = self.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_INTERVAL);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => match store.poll_disk() {
                        Ok(true) => debug!("service list changed on disk"),
                        Ok(false) => {}
                        Err(err) => warn!(error = %err, "ignoring unreadable settings file"),
                    },
                }
            }
        });
    }
}
