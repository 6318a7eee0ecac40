use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What survives between sessions: the last port a connection succeeded on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub last_port: String,
}

impl Preferences {
    pub fn new(last_port: impl Into<String>) -> Self {
        Self {
            last_port: last_port.into(),
        }
    }

    /// `Ok(None)` when no preference file has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("read preferences from {}", path.display()))?;
        let prefs = toml::from_str(&text)
            .with_context(|| format!("parse preferences in {}", path.display()))?;
        Ok(Some(prefs))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string(self).context("encode preferences")?;
        fs::write(path, text).with_context(|| format!("write preferences to {}", path.display()))
    }

    /// Index of the remembered port in `ports`, if it is still there.
    pub fn preselect(&self, ports: &[String]) -> Option<usize> {
        ports.iter().position(|p| *p == self.last_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_no_preference() {
        let dir = tempdir().unwrap();
        let loaded = Preferences::load(&dir.path().join("nanoterm.prefs")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nanoterm.prefs");

        Preferences::new("/dev/ttyUSB1").save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("last_port = \"/dev/ttyUSB1\""));
        let loaded = Preferences::load(&path).unwrap().unwrap();
        assert_eq!(loaded.last_port, "/dev/ttyUSB1");
    }

    #[test]
    fn save_overwrites_previous_port() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nanoterm.prefs");

        Preferences::new("COM3").save(&path).unwrap();
        Preferences::new("COM4").save(&path).unwrap();

        assert_eq!(Preferences::load(&path).unwrap(), Some(Preferences::new("COM4")));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nanoterm.prefs");
        fs::write(&path, "last_port = [1, 2").unwrap();

        let err = Preferences::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse preferences"));
    }

    #[test]
    fn preselect_only_when_port_still_present() {
        let prefs = Preferences::new("B");
        let ports = vec!["A".to_string(), "B".to_string()];

        assert_eq!(prefs.preselect(&ports), Some(1));
        assert_eq!(prefs.preselect(&ports[..1]), None);
        assert_eq!(prefs.preselect(&[]), None);
    }
}
