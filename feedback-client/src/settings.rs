//! Persisted session settings (username, server). The client reads and writes them only
//! through `SettingsStore`; where they live is up to the embedder.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use feedback_core::session::DEFAULT_PORT;
use serde::{Deserialize, Serialize};

/// Host used when nothing is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            server_host: default_host(),
            server_port: default_port(),
        }
    }
}

/// `<machine>_<user>` from the environment, used when no username was ever saved.
pub fn default_username() -> String {
    let machine = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "host".to_owned());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_owned());
    format!("{}_{}", machine.trim(), user.trim())
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Key-value store the client loads settings from at construction and saves to on change.
pub trait SettingsStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Settings>, SettingsError>;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// TOML file store. Default location: ~/.config/feedback/settings.toml.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        crate::config::home_dir()
            .map(|h| h.join(".config/feedback/settings.toml"))
            .unwrap_or_else(|| PathBuf::from("feedback-settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(&self.path)?;
        Ok(Some(toml::from_str(&s)?))
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(settings)?)?;
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<Option<Settings>>,
}

impl MemorySettings {
    pub fn new(initial: Option<Settings>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Option<Settings> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Option<Settings>, SettingsError> {
        Ok(self.current())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings.clone());
        Ok(())
    }
}
