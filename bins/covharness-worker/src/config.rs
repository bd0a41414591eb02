// Runtime configuration management for the covharness worker
use anyhow::{bail, Context, Result};
use covharness_common::config::RuntimeConfig;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Interpreter and sandbox settings loaded from `config/runtime.json`
#[derive(Debug, Clone)]
pub struct RuntimeConfigManager {
    config: RuntimeConfig,
}

impl RuntimeConfigManager {
    /// Load runtime configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runtime config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: RuntimeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if config.interpreter.trim().is_empty() {
            bail!("Runtime config {} has an empty interpreter", config_path.display());
        }

        Ok(Self { config })
    }

    /// Load from `path`, falling back to built-in defaults when the file is absent.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }
        warn!(
            path = %config_path.display(),
            "Runtime config not found, using built-in defaults"
        );
        Ok(Self {
            config: RuntimeConfig::default(),
        })
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn image(&self) -> &str {
        &self.config.docker.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = RuntimeConfigManager::load_or_default(&dir.path().join("runtime.json")).unwrap();
        assert_eq!(manager.runtime(), &RuntimeConfig::default());
        assert!(RuntimeConfigManager::load(&dir.path().join("runtime.json")).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runtime.json");
        fs::write(
            &path,
            r#"{
                "interpreter": "python3.11",
                "coverage_module": "coverage",
                "docker": {
                    "image": "covharness-python:3.11",
                    "python_version": "3.11-slim",
                    "memory_limit_mb": 128,
                    "cpu_limit": 0.25,
                    "user": "1000:1000"
                }
            }"#,
        )
        .unwrap();

        let manager = RuntimeConfigManager::load_or_default(&path).unwrap();
        assert_eq!(manager.runtime().interpreter, "python3.11");
        assert_eq!(manager.image(), "covharness-python:3.11");
        assert_eq!(manager.runtime().docker.user.as_deref(), Some("1000:1000"));
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runtime.json");
        fs::write(&path, "{ \"interpreter\": ").unwrap();
        assert!(RuntimeConfigManager::load_or_default(&path).is_err());
    }
}
