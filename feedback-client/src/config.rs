//! Load client tuning from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Client configuration. File: ~/.config/feedback/config.toml or /etc/feedback/config.toml.
/// Env overrides: FEEDBACK_HEARTBEAT_SECS, FEEDBACK_REGISTER_TIMEOUT_SECS,
/// FEEDBACK_CONNECT_TIMEOUT_SECS, FEEDBACK_DOWNLOADS_DIR, FEEDBACK_AUTO_RECONNECT,
/// FEEDBACK_MAX_RECONNECT_ATTEMPTS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seconds between pings while connected (default 30).
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Seconds to wait for `register_success` (default 10).
    #[serde(default = "default_register_timeout_secs")]
    pub register_timeout_secs: u64,
    /// Seconds to wait for the TCP connect itself (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Where downloaded and reassembled files go (default ~/Downloads).
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
    /// Reconnect automatically after an unexpected disconnect (default true).
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Give up after this many failed reconnects in a row (default 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First reconnect delay in milliseconds; doubles per failure (default 1000).
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds (default 30000).
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}
fn default_register_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_downloads_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}
fn default_auto_reconnect() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            register_timeout_secs: default_register_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            downloads_dir: default_downloads_dir(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("FEEDBACK_HEARTBEAT_SECS").and_then(|s| s.parse().ok()) {
        c.heartbeat_secs = p;
    }
    if let Some(p) = var("FEEDBACK_REGISTER_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.register_timeout_secs = p;
    }
    if let Some(p) = var("FEEDBACK_CONNECT_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.connect_timeout_secs = p;
    }
    if let Some(d) = var("FEEDBACK_DOWNLOADS_DIR") {
        c.downloads_dir = PathBuf::from(d);
    }
    if let Some(b) = var("FEEDBACK_AUTO_RECONNECT").and_then(|s| parse_bool(&s)) {
        c.auto_reconnect = b;
    }
    if let Some(n) = var("FEEDBACK_MAX_RECONNECT_ATTEMPTS").and_then(|s| s.parse().ok()) {
        c.max_reconnect_attempts = n;
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = home_dir() {
        out.push(h.join(".config/feedback/config.toml"));
    }
    out.push(PathBuf::from("/etc/feedback/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => {
                        tracing::warn!(path = %p.display(), error = %e, "Invalid config file, using defaults")
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "Unreadable config file, using defaults")
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(c.register_timeout(), Duration::from_secs(10));
        assert!(c.auto_reconnect);
        assert_eq!(c.max_reconnect_attempts, 5);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let c: Config = toml::from_str("heartbeat_secs = 5\nauto_reconnect = false\n").unwrap();
        assert_eq!(c.heartbeat_secs, 5);
        assert!(!c.auto_reconnect);
        assert_eq!(c.register_timeout_secs, 10);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("heartbeat = 5\n").is_err());
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("FEEDBACK_HEARTBEAT_SECS", "12"),
            ("FEEDBACK_REGISTER_TIMEOUT_SECS", "soon"),
            ("FEEDBACK_AUTO_RECONNECT", "off"),
            ("FEEDBACK_DOWNLOADS_DIR", "/tmp/dl"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.heartbeat_secs, 12);
        assert_eq!(c.register_timeout_secs, 10);
        assert!(!c.auto_reconnect);
        assert_eq!(c.downloads_dir, PathBuf::from("/tmp/dl"));
    }

    #[test]
    fn zero_durations_clamped() {
        let c = Config {
            heartbeat_secs: 0,
            ..Config::default()
        };
        assert_eq!(c.heartbeat_interval(), Duration::from_secs(1));
    }
}
