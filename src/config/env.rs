//! Environment variable overrides.
//!
//! Environment variables are read, never written: modifying them at runtime
//! is not thread-safe.

use std::path::PathBuf;

use super::{ConfigError, ConfigResult, MeteringConfig};

pub const ENV_PREFIX: &str = "KEYMETER_";
pub const ENV_DATA_DIR: &str = "KEYMETER_DATA_DIR";
pub const ENV_PRICING_FILE: &str = "KEYMETER_PRICING_FILE";
pub const ENV_AUTOSAVE_INTERVAL_SECS: &str = "KEYMETER_AUTOSAVE_INTERVAL_SECS";
pub const ENV_DETAIL_RETENTION_DAYS: &str = "KEYMETER_DETAIL_RETENTION_DAYS";

impl MeteringConfig {
    /// Override fields from `KEYMETER_*` variables of the current process.
    pub fn apply_env(self) -> ConfigResult<Self> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields using `lookup` as the variable source.
    ///
    /// An empty `KEYMETER_DETAIL_RETENTION_DAYS` disables retention.
    pub fn apply_env_from<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(ENV_PRICING_FILE).filter(|v| !v.is_empty()) {
            self.pricing_file = Some(PathBuf::from(file));
        }
        if let Some(raw) = lookup(ENV_AUTOSAVE_INTERVAL_SECS) {
            self.autosave_interval_secs = parse_env(ENV_AUTOSAVE_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DETAIL_RETENTION_DAYS) {
            self.detail_retention_days = if raw.trim().is_empty() {
                None
            } else {
                Some(parse_env(ENV_DETAIL_RETENTION_DAYS, &raw)?)
            };
        }
        Ok(self)
    }
}

fn parse_env<T>(key: &str, raw: &str) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}': {}", raw, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides() {
        let config = MeteringConfig::new("/original")
            .apply_env_from(lookup(&[
                (ENV_DATA_DIR, "/from/env"),
                (ENV_PRICING_FILE, "/etc/keymeter/pricing.json"),
                (ENV_AUTOSAVE_INTERVAL_SECS, "5"),
                (ENV_DETAIL_RETENTION_DAYS, "7"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/from/env"));
        assert_eq!(
            config.pricing_file,
            Some(PathBuf::from("/etc/keymeter/pricing.json"))
        );
        assert_eq!(config.autosave_interval_secs, 5);
        assert_eq!(config.detail_retention_days, Some(7));
    }

    #[test]
    fn test_no_overrides() {
        let config = MeteringConfig::new("/original")
            .apply_env_from(lookup(&[]))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/original"));
        assert_eq!(config.detail_retention_days, Some(30));
    }

    #[test]
    fn test_empty_retention_disables() {
        let config = MeteringConfig::default()
            .apply_env_from(lookup(&[(ENV_DETAIL_RETENTION_DAYS, "")]))
            .unwrap();
        assert_eq!(config.detail_retention_days, None);
    }

    #[test]
    fn test_invalid_interval() {
        let result = MeteringConfig::default()
            .apply_env_from(lookup(&[(ENV_AUTOSAVE_INTERVAL_SECS, "soon")]));
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, ENV_AUTOSAVE_INTERVAL_SECS)
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }
}
