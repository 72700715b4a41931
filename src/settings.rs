use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::{fs, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Disk writes are coalesced; panel drags produce update bursts.
const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowPosition {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub enabled: bool,
    pub window_position: WindowPosition,
    pub window_size: WindowSize,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_position: WindowPosition { x: 20, y: 20 },
            window_size: WindowSize {
                width: 500,
                height: 650,
            },
        }
    }
}

/// Persisted user settings with debounced writes. Cheap to clone; all
/// clones share the same file and in-memory data.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    data: RwLock<UserSettings>,
    saver: Mutex<Option<JoinHandle<()>>>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("settings file is corrupt ({err}), falling back to defaults");
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        let store = Self {
            inner: Arc::new(StoreInner {
                path,
                data: RwLock::new(data),
                saver: Mutex::new(None),
            }),
        };

        if !store.inner.path.exists() {
            if let Some(parent) = store.inner.path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create settings directory {}", parent.display())
                })?;
            }
            store.persist_now()?;
        }

        Ok(store)
    }

    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("could not determine the user config directory")?;
        Ok(base.join("chatpeek").join("settings.json"))
    }

    pub fn current(&self) -> UserSettings {
        self.inner.data.read().unwrap().clone()
    }

    pub fn enabled(&self) -> bool {
        self.inner.data.read().unwrap().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.data.write().unwrap().enabled = enabled;
        self.schedule_save();
    }

    pub fn set_window_position(&self, x: i32, y: i32) {
        self.inner.data.write().unwrap().window_position = WindowPosition { x, y };
        self.schedule_save();
    }

    pub fn set_window_size(&self, width: u32, height: u32) {
        self.inner.data.write().unwrap().window_size = WindowSize { width, height };
        self.schedule_save();
    }

    /// Write any pending change right now. Call on shutdown.
    pub fn flush(&self) -> Result<()> {
        if let Some(pending) = self.inner.saver.lock().unwrap().take() {
            pending.abort();
        }
        self.persist_now()
    }

    /// (Re)arm the save task; the last update in a burst wins.
    fn schedule_save(&self) {
        let store = self.clone();
        let mut saver = self.inner.saver.lock().unwrap();
        if let Some(previous) = saver.take() {
            previous.abort();
        }
        *saver = Some(tokio::spawn(async move {
            sleep(SAVE_DEBOUNCE).await;
            if let Err(err) = store.persist_now() {
                log_warn!("failed to persist settings: {err:#}");
            }
        }));
    }

    fn persist_now(&self) -> Result<()> {
        let serialized = {
            let guard = self.inner.data.read().unwrap();
            serde_json::to_string_pretty(&*guard)?
        };
        fs::write(&self.inner.path, serialized)
            .with_context(|| format!("failed to write settings to {}", self.inner.path.display()))
    }
}
