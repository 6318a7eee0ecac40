use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_PREFS_FILE: &str = "nanoterm.prefs";
pub const DEFAULT_LOG_FILE: &str = "nanoterm.log";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const PREFS_VAR: &str = "NANOTERM_PREFS";
const LOG_VAR: &str = "NANOTERM_LOG";
const POLL_VAR: &str = "NANOTERM_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub prefs_path: PathBuf,
    pub log_path: PathBuf,
    /// Time between two drains of the receive buffer.
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefs_path: PathBuf::from(DEFAULT_PREFS_FILE),
            log_path: PathBuf::from(DEFAULT_LOG_FILE),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup(PREFS_VAR) {
            config.prefs_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(LOG_VAR) {
            config.log_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(POLL_VAR) {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{POLL_VAR} must be a number of milliseconds, got {raw:?}"))?;
            if ms == 0 {
                bail!("{POLL_VAR} must be greater than zero");
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.prefs_path, PathBuf::from("nanoterm.prefs"));
    }

    #[test]
    fn environment_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("NANOTERM_PREFS", "/tmp/p.toml"),
            ("NANOTERM_LOG", "/tmp/n.log"),
            ("NANOTERM_POLL_MS", " 250 "),
        ]))
        .unwrap();

        assert_eq!(config.prefs_path, PathBuf::from("/tmp/p.toml"));
        assert_eq!(config.log_path, PathBuf::from("/tmp/n.log"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_poll_interval() {
        assert!(Config::from_lookup(lookup_from(&[("NANOTERM_POLL_MS", "fast")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("NANOTERM_POLL_MS", "0")])).is_err());
    }
}
