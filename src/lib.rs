//! # keymeter
//!
//! Metering and policy enforcement for API gateways that front model-serving
//! backends.
//!
//! Each inbound request is checked against the caller's policy (allowed
//! models, lifetime token and cost budgets, expiry) and, once finished, billed
//! to a per-key quota ledger using a model pricing catalog. A separate
//! statistics ledger aggregates traffic by API, model, day and hour. Both
//! ledgers are snapshotted to disk atomically on a timer and at shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keymeter::{Metering, MeteringConfig, RequestRecord, TokenCounts, TokenStats};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keymeter::Error> {
//!     let config = MeteringConfig::from_file("keymeter.yaml").await?.apply_env()?;
//!     let metering = Metering::start(config).await?;
//!
//!     match metering.admit("sk-live-key", "gpt-5") {
//!         Ok(admission) => {
//!             // ... forward upstream, then bill what was used ...
//!             admission.complete(TokenCounts::new(1200, 300));
//!             metering.record_request(
//!                 RequestRecord::new("openai", "gpt-5").tokens(TokenStats::new(1200, 300)),
//!             );
//!         }
//!         Err(denied) => eprintln!("{} {}: {}", denied.http_status(), denied.code(), denied),
//!     }
//!
//!     metering.shutdown().await;
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod metering;
pub mod persistence;
pub mod pricing;
pub mod quota;
pub mod stats;

pub use config::{ApiKeyPolicy, ConfigError, MeteringConfig};
pub use metering::Metering;
pub use persistence::{LedgerSnapshot, PersistenceController, PersistenceError};
pub use pricing::{ModelPricing, PricingCatalog, PricingError, default_model_pricing};
pub use quota::{
    Admission, CheckResult, ErrorPayload, PolicyStore, QuotaError, QuotaErrorKind, QuotaLedger,
    QuotaManager, QuotaStatus, QuotaUsage, TokenCounts, mask_api_key,
};
pub use stats::{
    ApiStats, ModelStats, RequestDetail, RequestRecord, StatsSnapshot, TokenStats,
    UsageStatistics,
};

/// Error type for keymeter operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pricing file could not be read or parsed.
    #[error("Pricing error: {0}")]
    Pricing(#[from] PricingError),

    /// Snapshot load or save failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Request denied by the caller's policy.
    #[error("Quota denied: {0}")]
    Quota(#[from] QuotaError),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Policy denials (expiry, model, budget). Correct outcomes, not faults.
    Denied,
    /// Configuration or pricing input errors
    Configuration,
    /// Filesystem or snapshot errors
    Storage,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Quota(_) => ErrorCategory::Denied,
            Error::Config(_) | Error::Pricing(_) => ErrorCategory::Configuration,
            Error::Persistence(_) => ErrorCategory::Storage,
        }
    }

    pub fn is_denial(&self) -> bool {
        self.category() == ErrorCategory::Denied
    }

    pub fn denial(&self) -> Option<&QuotaError> {
        match self {
            Error::Quota(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
