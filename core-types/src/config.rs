use std::path::{Path, PathBuf};

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "lifecost.toml";
pub const ENV_PREFIX: &str = "LIFECOST";

const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Process configuration: `lifecost.toml` layered under `LIFECOST_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            ledger: LedgerSettings::default(),
            log_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Fixed offset used to cut shard days; the host's local zone when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    /// Open shard handles kept before idle ones are closed; 0 disables the cap.
    #[serde(default = "default_max_open_shards")]
    pub max_open_shards: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: None,
            max_open_shards: default_max_open_shards(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_max_open_shards() -> usize {
    256
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Message("data_root must not be empty".to_string()));
        }
        if let Some(offset) = self.ledger.utc_offset_minutes {
            if offset.abs() > MAX_UTC_OFFSET_MINUTES {
                return Err(ConfigError::Message(format!(
                    "ledger.utc_offset_minutes {offset} exceeds +/-{MAX_UTC_OFFSET_MINUTES}"
                )));
            }
        }
        Ok(())
    }

    pub fn bills_dir(&self) -> PathBuf {
        self.data_root.join("bills")
    }
}
