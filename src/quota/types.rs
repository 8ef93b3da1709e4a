//! Ledger rows and decision results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QuotaError;
use crate::config::ApiKeyPolicy;

/// Cumulative usage for one API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl QuotaUsage {
    pub fn new(api_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            api_key: api_key.into(),
            total_tokens: 0,
            total_cost_usd: 0.0,
            total_requests: 0,
            last_used_at: now,
            created_at: now,
        }
    }

    pub(crate) fn record(&mut self, tokens: u64, cost_usd: f64, at: DateTime<Utc>) {
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        self.total_cost_usd += cost_usd;
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_used_at = at;
    }
}

/// Token counts observed for one completed request.
///
/// Cached tokens are a subset of input and are priced separately, never
/// counted twice toward the token budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
}

impl TokenCounts {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
        }
    }

    pub fn with_cached(mut self, cached_tokens: u64) -> Self {
        self.cached_tokens = cached_tokens;
        self
    }

    /// Tokens charged against a budget.
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn is_billable(&self) -> bool {
        self.input_tokens > 0 || self.output_tokens > 0
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QuotaError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<QuotaUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Arc<ApiKeyPolicy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_cost_usd: Option<f64>,
}

impl CheckResult {
    /// Allowed result; margins are filled for each limit the policy sets.
    pub fn allowed(policy: Option<Arc<ApiKeyPolicy>>, usage: Option<QuotaUsage>) -> Self {
        let (remaining_tokens, remaining_cost_usd) = match &policy {
            Some(p) => remaining(p, usage.as_ref()),
            None => (None, None),
        };
        Self {
            allowed: true,
            error: None,
            usage,
            policy,
            remaining_tokens,
            remaining_cost_usd,
        }
    }

    pub fn denied(
        error: QuotaError,
        policy: Arc<ApiKeyPolicy>,
        usage: Option<QuotaUsage>,
    ) -> Self {
        Self {
            allowed: false,
            error: Some(error),
            usage,
            policy: Some(policy),
            remaining_tokens: None,
            remaining_cost_usd: None,
        }
    }

    pub fn into_result(self) -> Result<Self, QuotaError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// `limit - used` for each limit the policy sets; no row counts as zero usage.
pub(crate) fn remaining(
    policy: &ApiKeyPolicy,
    usage: Option<&QuotaUsage>,
) -> (Option<i64>, Option<f64>) {
    let used_tokens = usage.map_or(0, |u| u.total_tokens);
    let used_cost = usage.map_or(0.0, |u| u.total_cost_usd);

    let tokens = policy
        .has_token_limit()
        .then(|| policy.max_tokens.saturating_sub(clamp_i64(used_tokens)));
    let cost = policy
        .has_cost_limit()
        .then(|| policy.max_cost_usd - used_cost);
    (tokens, cost)
}

pub(crate) fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
