//! Metering configuration.
//!
//! ```rust,no_run
//! use keymeter::config::MeteringConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeteringConfig::from_file("keymeter.yaml")
//!     .await?
//!     .apply_env()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod file;
pub mod policy;

pub use env::{
    ENV_AUTOSAVE_INTERVAL_SECS, ENV_DATA_DIR, ENV_DETAIL_RETENTION_DAYS, ENV_PREFIX,
    ENV_PRICING_FILE,
};
pub use policy::ApiKeyPolicy;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_DETAIL_RETENTION_DAYS: u32 = 30;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file does not exist
    #[error("Configuration file not found: {}", path.display())]
    NotFound {
        /// The missing path
        path: PathBuf,
    },

    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The key with invalid value
        key: String,
        /// Error message
        message: String,
    },

    /// JSON deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Multiple validation errors
    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings for the metering core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MeteringConfig {
    /// Directory holding the quota and stats snapshot files.
    pub data_dir: PathBuf,

    /// Optional JSON file of per-model pricing overrides.
    pub pricing_file: Option<PathBuf>,

    /// Optional config store root; pricing is read from `config/pricing.json` inside it.
    pub pricing_store_dir: Option<PathBuf>,

    pub autosave_interval_secs: u64,

    /// Age after which per-request stats details are dropped. `None` keeps them forever.
    pub detail_retention_days: Option<u32>,

    #[serde(alias = "api_key_policies")]
    pub api_key_policies: HashMap<String, ApiKeyPolicy>,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pricing_file: None,
            pricing_store_dir: None,
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
            detail_retention_days: Some(DEFAULT_DETAIL_RETENTION_DAYS),
            api_key_policies: HashMap::new(),
        }
    }
}

/// `<platform data dir>/keymeter`, or `./keymeter-data` when no home directory exists.
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.data_dir().join("keymeter"))
        .unwrap_or_else(|| PathBuf::from("keymeter-data"))
}

impl MeteringConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn pricing_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pricing_file = Some(path.into());
        self
    }

    pub fn pricing_store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.pricing_store_dir = Some(path.into());
        self
    }

    pub fn autosave_interval_secs(mut self, secs: u64) -> Self {
        self.autosave_interval_secs = secs;
        self
    }

    pub fn detail_retention_days(mut self, days: Option<u32>) -> Self {
        self.detail_retention_days = days;
        self
    }

    pub fn policy(mut self, api_key: impl Into<String>, policy: ApiKeyPolicy) -> Self {
        self.api_key_policies.insert(api_key.into(), policy);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn detail_retention(&self) -> Option<chrono::Duration> {
        self.detail_retention_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }

    /// Collects every invalid value instead of stopping at the first.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push(ConfigError::InvalidValue {
                key: "data-dir".into(),
                message: "must not be empty".into(),
            });
        }

        if self.autosave_interval_secs == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "autosave-interval-secs".into(),
                message: "must be greater than zero".into(),
            });
        }

        let mut keys: Vec<&String> = self.api_key_policies.keys().collect();
        keys.sort();
        for key in keys {
            let policy = &self.api_key_policies[key];
            if policy.has_expiration() && policy.parsed_expires_at().is_none() {
                errors.push(ConfigError::InvalidValue {
                    key: format!("api-key-policies.{}.expires_at", mask_key(key)),
                    message: format!(
                        "'{}' is neither RFC 3339 nor YYYY-MM-DD",
                        policy.expires_at.as_deref().unwrap_or_default()
                    ),
                });
            }
            if !policy.max_cost_usd.is_finite() {
                errors.push(ConfigError::InvalidValue {
                    key: format!("api-key-policies.{}.max_cost_usd", mask_key(key)),
                    message: "must be a finite number".into(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(errors)))
        }
    }
}

fn mask_key(key: &str) -> String {
    crate::quota::mask_api_key(key)
}
