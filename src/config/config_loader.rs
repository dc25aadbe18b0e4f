use std::path::PathBuf;
use tracing::{debug, info};

use super::config::QuizConfig;
use crate::error::QuizResult;

/// Environment variable pointing at a configuration file
pub const CONFIG_ENV_VAR: &str = "QUIZPILOT_CONFIG";

/// Resolves and loads the quizpilot configuration
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for `$QUIZPILOT_CONFIG` or the default location
    pub fn new() -> Self {
        let config_path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(QuizConfig::default_config_path);
        Self { config_path }
    }

    /// Set a custom config path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load the configuration, falling back to defaults when no file exists.
    /// A file that exists but does not parse is an error.
    pub fn load(&self) -> QuizResult<QuizConfig> {
        if self.config_path.exists() {
            info!("Loading configuration from {}", self.config_path.display());
            return QuizConfig::load(&self.config_path);
        }

        debug!(
            "No configuration at {}, using defaults",
            self.config_path.display()
        );
        Ok(QuizConfig::default())
    }

    /// Write the configuration to the resolved path
    pub fn save(&self, config: &QuizConfig) -> QuizResult<()> {
        config.validate()?;
        config.save(&self.config_path)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("absent.toml"));
        assert_eq!(loader.load().unwrap(), QuizConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_path(dir.path().join("nested").join("config.yaml"));

        let mut config = QuizConfig::default();
        config.retry.struggling_bonus_retries = 2;
        loader.save(&config).unwrap();

        assert_eq!(loader.load().unwrap(), config);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(ConfigLoader::with_path(path).load().is_err());
    }
}
