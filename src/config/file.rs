//! File-based configuration loading.
//!
//! `.yaml` and `.yml` files are read as YAML, everything else as JSON.

use std::path::Path;

use super::{ConfigError, ConfigResult, MeteringConfig};

impl MeteringConfig {
    /// Load configuration from a file. A missing file is an error here,
    /// unlike snapshot and pricing files which are optional.
    pub async fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config = if is_yaml(path) {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };

        tracing::debug!(
            path = %path.display(),
            policies = config.api_key_policies.len(),
            "Loaded metering configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_yaml_bw::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}
