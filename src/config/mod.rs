use crate::error::{Error, Result};
use crate::format::DEFAULT_TIME_FORMAT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an alternate config file.
pub const CONFIG_ENV: &str = "SLEEPTRACK_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the sessions database.
    pub data_dir: PathBuf,

    /// strftime pattern for timestamps in the history text.
    pub time_format: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("sleeptrack"))
            .unwrap_or_else(|| PathBuf::from(".sleeptrack"));

        Self {
            data_dir,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl Config {
    /// Path to the sessions `SQLite` database.
    pub fn sessions_db_path(&self) -> PathBuf {
        self.data_dir.join("sleep.db")
    }

    /// `$SLEEPTRACK_CONFIG`, else `<config dir>/sleeptrack/config.toml`.
    pub fn path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .map(|d| d.join("sleeptrack").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".sleeptrack/config.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
        assert!(config.sessions_db_path().ends_with("sleep.db"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = \"/tmp/nights\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sessions_db_path(), PathBuf::from("/tmp/nights/sleep.db"));
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "time_format = [").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
