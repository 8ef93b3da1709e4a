//! Quota decisions and usage accounting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::QuotaError;
use super::ledger::QuotaLedger;
use super::policy_store::PolicyStore;
use super::status::mask_api_key;
use super::types::{CheckResult, QuotaUsage, TokenCounts};
use crate::config::ApiKeyPolicy;
use crate::pricing::PricingCatalog;

/// Combines the policy store, the usage ledger and pricing into allow/deny
/// verdicts and post-request accounting.
#[derive(Debug)]
pub struct QuotaManager {
    policies: PolicyStore,
    ledger: Arc<QuotaLedger>,
    pricing: Arc<PricingCatalog>,
}

impl QuotaManager {
    pub fn new(pricing: Arc<PricingCatalog>) -> Self {
        Self::with_ledger(pricing, Arc::new(QuotaLedger::new()))
    }

    pub fn with_ledger(pricing: Arc<PricingCatalog>, ledger: Arc<QuotaLedger>) -> Self {
        Self {
            policies: PolicyStore::new(),
            ledger,
            pricing,
        }
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn pricing(&self) -> &Arc<PricingCatalog> {
        &self.pricing
    }

    /// Replace every policy at once.
    pub fn load_policies(&self, policies: HashMap<String, ApiKeyPolicy>) -> usize {
        for (key, policy) in &policies {
            tracing::debug!(
                api_key = %mask_api_key(key),
                models = ?policy.allowed_models,
                max_tokens = policy.max_tokens,
                max_cost_usd = policy.max_cost_usd,
                expires_at = policy.expires_at.as_deref().unwrap_or(""),
                "Loaded API key policy"
            );
        }
        let count = self.policies.load(policies);
        tracing::info!(count, "Loaded API key policies");
        count
    }

    pub fn get_policy(&self, api_key: &str) -> Option<Arc<ApiKeyPolicy>> {
        self.policies.get(api_key)
    }

    /// Current usage without creating a row.
    pub fn get_usage(&self, api_key: &str) -> Option<QuotaUsage> {
        self.ledger.get(api_key)
    }

    pub fn check_quota(&self, api_key: &str, model: &str) -> CheckResult {
        self.check_quota_at(api_key, model, Utc::now())
    }

    /// Evaluate in fixed order: expiry, model, tokens, cost. First failure wins.
    ///
    /// Policy and usage are read under separate locks, so an update racing
    /// with this check may or may not be observed.
    pub fn check_quota_at(&self, api_key: &str, model: &str, now: DateTime<Utc>) -> CheckResult {
        let policy = self.policies.get(api_key);
        let usage = self.ledger.get(api_key);

        let Some(policy) = policy else {
            return CheckResult::allowed(None, usage);
        };

        if policy.is_expired_at(now)
            && let Some(expires_at) = policy.parsed_expires_at()
        {
            return CheckResult::denied(QuotaError::Expired { expires_at }, policy, usage);
        }

        if !policy.is_model_allowed(model) {
            let err = QuotaError::ModelNotAllowed {
                requested_model: model.to_string(),
                allowed_models: policy.allowed_models.clone(),
            };
            return CheckResult::denied(err, policy, usage);
        }

        let used_tokens = usage.as_ref().map_or(0, |u| u.total_tokens);
        if policy.has_token_limit() && used_tokens >= policy.max_tokens.unsigned_abs() {
            let err = QuotaError::TokenLimitExceeded {
                used: used_tokens,
                limit: policy.max_tokens,
            };
            return CheckResult::denied(err, policy, usage);
        }

        let used_cost = usage.as_ref().map_or(0.0, |u| u.total_cost_usd);
        if policy.has_cost_limit() && used_cost >= policy.max_cost_usd {
            let err = QuotaError::CostLimitExceeded {
                used: used_cost,
                limit: policy.max_cost_usd,
            };
            return CheckResult::denied(err, policy, usage);
        }

        CheckResult::allowed(Some(policy), usage)
    }

    /// Charge one completed request to `api_key`.
    ///
    /// Call exactly once per billable request; [`QuotaManager::admit`]
    /// enforces that for callers that go through the gate.
    pub fn update_usage(&self, api_key: &str, model: &str, tokens: TokenCounts) -> QuotaUsage {
        let cost = self.pricing.calculate_cost(
            model,
            tokens.input_tokens,
            tokens.output_tokens,
            tokens.cached_tokens,
        );
        let delta = tokens.total();
        let row = self.ledger.increment(api_key, delta, cost, Utc::now());

        tracing::debug!(
            api_key = %mask_api_key(api_key),
            model,
            tokens = delta,
            cost_usd = cost,
            total_tokens = row.total_tokens,
            total_cost_usd = row.total_cost_usd,
            "Updated quota usage"
        );
        row
    }

    /// Overwrite the usage row for a key.
    pub fn set_usage(&self, usage: QuotaUsage) {
        self.ledger.set(usage);
    }

    /// Delete one key's usage; the next update starts from zero.
    pub fn reset_usage(&self, api_key: &str) -> Option<QuotaUsage> {
        let removed = self.ledger.remove(api_key);
        if removed.is_some() {
            tracing::info!(api_key = %mask_api_key(api_key), "Reset quota usage");
        }
        removed
    }

    pub fn reset_all_usage(&self) -> usize {
        let count = self.ledger.clear();
        tracing::info!(count, "Reset quota usage for all API keys");
        count
    }

    pub fn all_usage(&self) -> HashMap<String, QuotaUsage> {
        self.ledger.snapshot()
    }

    pub fn all_policies(&self) -> HashMap<String, ApiKeyPolicy> {
        self.policies.all()
    }
}
