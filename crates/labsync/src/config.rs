//! Config resolution with CLI flag overrides.
//!
//! Precedence: `--url` / `LABSYNC_URL`, then the selected profile, then
//! built-in defaults.

use std::time::Duration;

pub use labsync_config::{Config, Profile, config_path, load_config};

use labsync_config::{ConfigError, profile_to_sync_config};
use labsync_core::SyncConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a server-bound command needs to start a session.
#[derive(Debug)]
pub struct Session {
    pub profile: Option<String>,
    pub sync: SyncConfig,
    pub hydration_timeout: Duration,
}

pub fn resolve_session(global: &GlobalOpts) -> Result<Session, CliError> {
    let cfg = load_config()?;
    resolve_with(&cfg, global)
}

fn resolve_with(cfg: &Config, global: &GlobalOpts) -> Result<Session, CliError> {
    let selected = cfg
        .profile(global.profile.as_deref())
        .map_err(|e| match e {
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: available_profiles(cfg),
            },
            other => other.into(),
        })?;

    let (name, mut profile) = match (selected, global.url.as_deref()) {
        (Some((name, profile)), _) => (Some(name.to_owned()), profile.clone()),
        (None, Some(url)) => (None, Profile::new(url)),
        (None, None) => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };
    if let Some(url) = &global.url {
        profile.url.clone_from(url);
    }

    let sync = profile_to_sync_config(&profile)?;
    let timeout = global.timeout.unwrap_or(cfg.defaults.timeout);
    tracing::debug!(profile = ?name, url = %sync.url, timeout, "resolved session");

    Ok(Session {
        profile: name,
        sync,
        hydration_timeout: Duration::from_secs(timeout),
    })
}

fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        return "(none)".into();
    }
    cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::{ColorMode, OutputFormat};

    fn opts(profile: Option<&str>, url: Option<&str>) -> GlobalOpts {
        GlobalOpts {
            profile: profile.map(Into::into),
            url: url.map(Into::into),
            output: OutputFormat::Table,
            color: ColorMode::Never,
            verbose: 0,
            quiet: false,
            timeout: None,
        }
    }

    fn config_with(name: &str, url: &str) -> Config {
        let mut cfg = Config::default();
        let mut profile = Profile::new(url);
        profile.result_ttl_ms = 750;
        cfg.profiles.insert(name.into(), profile);
        cfg
    }

    #[test]
    fn url_flag_works_without_any_profile() {
        let session = resolve_with(&Config::default(), &opts(None, Some("ws://a/ws"))).unwrap();
        assert_eq!(session.sync.url.as_str(), "ws://a/ws");
        assert_eq!(session.profile, None);
        assert_eq!(session.hydration_timeout, Duration::from_secs(10));
    }

    #[test]
    fn url_flag_overrides_profile_but_keeps_tuning() {
        let cfg = config_with("default", "ws://profile/ws");
        let session = resolve_with(&cfg, &opts(None, Some("ws://flag/ws"))).unwrap();
        assert_eq!(session.sync.url.as_str(), "ws://flag/ws");
        assert_eq!(session.sync.result_ttl, Duration::from_millis(750));
        assert_eq!(session.profile.as_deref(), Some("default"));
    }

    #[test]
    fn nothing_configured_is_reported() {
        let err = resolve_with(&Config::default(), &opts(None, None)).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn unknown_profile_lists_the_known_ones() {
        let cfg = config_with("bench", "ws://bench/ws");
        let err = resolve_with(&cfg, &opts(Some("prod"), None)).unwrap_err();
        match err {
            CliError::ProfileNotFound { name, available } => {
                assert_eq!(name, "prod");
                assert_eq!(available, "bench");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
