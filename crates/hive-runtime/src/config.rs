use std::path::Path;

use serde::Deserialize;

use hive_core::HiveConfig;
use hive_observe::LoggerConfig;

use crate::error::RuntimeError;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "HIVE_CONFIG";

/// Everything a hive reads from its config file: the hive settings plus a `logger` section.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(flatten)]
    pub hive: HiveConfig,
    pub logger: LoggerConfig,
}

impl RuntimeConfig {
    pub fn from_hive(hive: HiveConfig) -> Self {
        Self {
            hive,
            logger: LoggerConfig::default(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RuntimeError> {
        let cfg: RuntimeConfig =
            serde_json::from_str(raw).map_err(|e| RuntimeError::Config(e.to_string()))?;
        cfg.hive.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw).map_err(|e| match e {
            RuntimeError::Config(reason) => {
                RuntimeError::Config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    /// Load the file named by `HIVE_CONFIG`, or fall back to `default`.
    pub fn from_env_or(default: RuntimeConfig) -> Result<Self, RuntimeError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_json_file(path.trim()),
            _ => Ok(default),
        }
    }
}
