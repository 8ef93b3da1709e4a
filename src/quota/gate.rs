//! Request admission with exactly-once billing.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use keymeter::quota::{QuotaManager, TokenCounts};
//! # fn handle(manager: Arc<QuotaManager>) -> Result<(), keymeter::quota::QuotaError> {
//! let admission = manager.admit("sk-live-key", "gpt-5")?;
//! // ... forward the request upstream ...
//! admission.complete(TokenCounts::new(1200, 300));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use super::error::QuotaError;
use super::manager::QuotaManager;
use super::types::{CheckResult, QuotaUsage, TokenCounts};

/// Permission to run one request.
///
/// Consumed by [`Admission::complete`], so usage is charged at most once.
/// Dropping it without completing (failed upstream call) charges nothing.
#[derive(Debug)]
#[must_use = "an admission bills nothing unless completed"]
pub struct Admission {
    manager: Arc<QuotaManager>,
    api_key: String,
    model: String,
    check: CheckResult,
}

impl QuotaManager {
    /// Check quota for a request and hand back a ticket to bill it.
    ///
    /// An empty key is unmetered: it is always admitted and never billed.
    pub fn admit(self: &Arc<Self>, api_key: &str, model: &str) -> Result<Admission, QuotaError> {
        let check = if api_key.is_empty() {
            CheckResult::allowed(None, None)
        } else {
            self.check_quota(api_key, model).into_result()?
        };

        Ok(Admission {
            manager: Arc::clone(self),
            api_key: api_key.to_string(),
            model: model.to_string(),
            check,
        })
    }
}

impl Admission {
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The check that admitted this request.
    pub fn check(&self) -> &CheckResult {
        &self.check
    }

    /// Bill the finished request. Requests with neither input nor output
    /// tokens are not billed and return `None`.
    pub fn complete(self, tokens: TokenCounts) -> Option<QuotaUsage> {
        if self.api_key.is_empty() || !tokens.is_billable() {
            return None;
        }
        Some(self.manager.update_usage(&self.api_key, &self.model, tokens))
    }
}
