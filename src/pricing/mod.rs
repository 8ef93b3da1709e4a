//! Model pricing catalog for cost calculation.
//!
//! Prices are USD per million tokens. The catalog is seeded with
//! [`default_model_pricing`] and may be overridden per model from a JSON
//! file shaped as `{ "<model>": { "input_price_per_million": .., ... } }`.

mod builtin;

pub use builtin::default_model_pricing;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to read pricing file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse pricing file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type PricingResult<T> = std::result::Result<T, PricingError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    /// Zero means cached input is billed at the input price.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cached_input_price_per_million: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input_price_per_million: input,
            output_price_per_million: output,
            cached_input_price_per_million: 0.0,
        }
    }

    pub const fn with_cached(input: f64, output: f64, cached: f64) -> Self {
        Self {
            input_price_per_million: input,
            output_price_per_million: output,
            cached_input_price_per_million: cached,
        }
    }

    pub fn effective_cached_price(&self) -> f64 {
        if self.cached_input_price_per_million == 0.0 {
            self.input_price_per_million
        } else {
            self.cached_input_price_per_million
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> f64 {
        let input = input_tokens as f64 * self.input_price_per_million / TOKENS_PER_UNIT;
        let cached = cached_tokens as f64 * self.effective_cached_price() / TOKENS_PER_UNIT;
        let output = output_tokens as f64 * self.output_price_per_million / TOKENS_PER_UNIT;
        input + cached + output
    }
}

/// Concurrent model → price table.
///
/// Constructed once by the owning context and shared by `Arc`.
#[derive(Debug, Default)]
pub struct PricingCatalog {
    models: DashMap<String, ModelPricing>,
}

impl PricingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog seeded with the built-in price table.
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        catalog.set_defaults(default_model_pricing());
        catalog
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.models.get(model).map(|p| *p)
    }

    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    /// Fill in entries for models that have no price yet; existing entries win.
    pub fn set_defaults(&self, defaults: HashMap<String, ModelPricing>) {
        for (model, pricing) in defaults {
            self.models.entry(model).or_insert(pricing);
        }
    }

    /// Cost in USD; exactly zero for models without pricing.
    pub fn calculate_cost(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
    ) -> f64 {
        match self.get(model) {
            Some(pricing) => pricing.cost(input_tokens, output_tokens, cached_tokens),
            None => {
                tracing::debug!(model, "No pricing for model, cost recorded as zero");
                0.0
            }
        }
    }

    /// Merge prices from a JSON file; file entries override existing ones.
    ///
    /// A missing file loads nothing and returns `Ok(0)`.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> PricingResult<usize> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Pricing file does not exist, using current prices");
                return Ok(0);
            }
            Err(source) => {
                return Err(PricingError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let entries: HashMap<String, ModelPricing> =
            serde_json::from_str(&content).map_err(|source| PricingError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let count = entries.len();
        for (model, pricing) in entries {
            self.models.insert(model, pricing);
        }

        tracing::info!(path = %path.display(), models = count, "Loaded model pricing");
        Ok(count)
    }

    /// Load `config/pricing.json` from a config store directory.
    pub async fn load_from_store_dir(&self, dir: impl AsRef<Path>) -> PricingResult<usize> {
        self.load_from_file(store_pricing_path(dir.as_ref())).await
    }

    /// Copy of the whole table.
    pub fn all(&self) -> HashMap<String, ModelPricing> {
        self.models
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

pub fn store_pricing_path(dir: &Path) -> PathBuf {
    dir.join("config").join("pricing.json")
}
