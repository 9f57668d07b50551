//! Configuration for labsync tools.
//!
//! TOML profiles merged with `LABSYNC_*` environment variables, and the
//! translation to [`labsync_core::SyncConfig`]. The core crate never reads
//! files; the binary uses this crate and layers its own flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use labsync_core::{ReconnectConfig, SyncConfig};

/// Environment prefix. Nested keys use a double underscore:
/// `LABSYNC_DEFAULTS__TIMEOUT=10`.
pub const ENV_PREFIX: &str = "LABSYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' is not defined")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named lab servers.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Seconds to wait for the initial state.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    10
}

/// A named lab server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Base WebSocket URL (e.g. "ws://localhost:8000/ws").
    pub url: String,

    #[serde(default = "default_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub reconnect_max_attempts: u32,

    #[serde(default = "default_manual_delay_ms")]
    pub reconnect_manual_delay_ms: u64,

    /// How long a command result stays visible.
    #[serde(default = "default_result_ttl_ms")]
    pub result_ttl_ms: u64,

    /// Treat untagged equipment whose id mentions "pump" as a pump.
    #[serde(default = "default_infer_kind")]
    pub infer_equipment_kind: bool,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base_delay_ms: default_base_delay_ms(),
            reconnect_max_attempts: default_max_attempts(),
            reconnect_manual_delay_ms: default_manual_delay_ms(),
            result_ttl_ms: default_result_ttl_ms(),
            infer_equipment_kind: default_infer_kind(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_manual_delay_ms() -> u64 {
    100
}
fn default_result_ttl_ms() -> u64 {
    3000
}
fn default_infer_kind() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "labsync", "labsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("labsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config from the canonical file plus the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` plus the environment. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    ///
    /// Returns `Ok(None)` only when no name was given and the default
    /// profile does not exist, so callers can fall back to flags.
    pub fn profile(&self, name: Option<&str>) -> Result<Option<(&str, &Profile)>, ConfigError> {
        match name {
            Some(name) => self
                .profiles
                .get_key_value(name)
                .map(|(k, p)| Some((k.as_str(), p)))
                .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() }),
            None => Ok(self
                .default_profile
                .as_deref()
                .and_then(|name| self.profiles.get_key_value(name))
                .map(|(k, p)| (k.as_str(), p))),
        }
    }
}

/// Build a [`SyncConfig`] from a profile.
pub fn profile_to_sync_config(profile: &Profile) -> Result<SyncConfig, ConfigError> {
    let url: url::Url = profile.url.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {}", profile.url),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{}'", url.scheme()),
        });
    }
    if profile.reconnect_max_attempts == 0 {
        return Err(ConfigError::Validation {
            field: "reconnect_max_attempts".into(),
            reason: "must be at least 1".into(),
        });
    }

    let mut sync = SyncConfig::new(url);
    sync.reconnect = ReconnectConfig {
        base_delay: Duration::from_millis(profile.reconnect_base_delay_ms),
        max_attempts: profile.reconnect_max_attempts,
        manual_delay: Duration::from_millis(profile.reconnect_manual_delay_ms),
    };
    sync.result_ttl = Duration::from_millis(profile.result_ttl_ms);
    sync.infer_equipment_kind = profile.infer_equipment_kind;
    Ok(sync)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    // Loading reads process env, so every loading test runs inside a Jail.

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_| {
            let cfg = load_config_from(Path::new("absent.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("default"));
            assert_eq!(cfg.defaults.timeout, 10);
            assert!(cfg.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut cfg = Config::default();
        let mut bench = Profile::new("ws://bench.local:8000/ws");
        bench.reconnect_max_attempts = 3;
        cfg.profiles.insert("bench".into(), bench);
        save_config_to(&cfg, &path).unwrap();

        Jail::expect_with(|_| {
            let loaded = load_config_from(&path).unwrap();
            assert_eq!(loaded, cfg);
            Ok(())
        });
    }

    #[test]
    fn partial_profile_fills_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                default_profile = "lab"

                [profiles.lab]
                url = "ws://lab.local/ws"
                result_ttl_ms = 500
                "#,
            )?;
            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            let (name, profile) = cfg.profile(None).unwrap().unwrap();
            assert_eq!(name, "lab");
            assert_eq!(profile.result_ttl_ms, 500);
            assert_eq!(profile.reconnect_max_attempts, 5);
            assert!(profile.infer_equipment_kind);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[defaults]\ntimeout = 30\n")?;
            jail.set_env("LABSYNC_DEFAULTS__TIMEOUT", "5");
            jail.set_env("LABSYNC_PROFILES__ENV__URL", "ws://from-env/ws");
            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.defaults.timeout, 5);
            assert_eq!(cfg.profiles["env"].url, "ws://from-env/ws");
            Ok(())
        });
    }

    #[test]
    fn named_profile_must_exist() {
        let cfg = Config::default();
        assert!(cfg.profile(None).unwrap().is_none());
        assert!(matches!(
            cfg.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn profile_translates_to_sync_config() {
        let mut profile = Profile::new("ws://lab.local/ws");
        profile.reconnect_base_delay_ms = 500;
        profile.infer_equipment_kind = false;

        let sync = profile_to_sync_config(&profile).unwrap();
        assert_eq!(sync.url.as_str(), "ws://lab.local/ws");
        assert_eq!(sync.reconnect.base_delay, Duration::from_millis(500));
        assert_eq!(sync.reconnect.max_attempts, 5);
        assert_eq!(sync.result_ttl, Duration::from_secs(3));
        assert!(!sync.infer_equipment_kind);
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let err = profile_to_sync_config(&Profile::new("http://lab.local")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "url"));

        let err = profile_to_sync_config(&Profile::new("not a url")).unwrap_err();
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let mut profile = Profile::new("ws://lab.local/ws");
        profile.reconnect_max_attempts = 0;
        assert!(profile_to_sync_config(&profile).is_err());
    }
}
