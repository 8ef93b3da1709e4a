//! Human-facing quota summaries.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::manager::QuotaManager;
use super::types::{clamp_i64, remaining};

/// Shows the first 8 and last 4 characters of keys longer than 12 characters.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub name: Option<String>,
    pub allowed_models: Vec<String>,
    pub max_tokens: i64,
    pub max_cost_usd: f64,
    pub expires_at: Option<String>,
    pub is_expired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub total_requests: u64,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Quota summary for one key, assembled from the policy and ledger reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub api_key: String,
    pub has_policy: bool,
    pub has_usage: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usage_percent: Option<f64>,
}

impl QuotaManager {
    pub fn quota_status(&self, api_key: &str) -> QuotaStatus {
        let policy = self.get_policy(api_key);
        let usage = self.get_usage(api_key);

        let (remaining_tokens, remaining_cost_usd) = match &policy {
            Some(p) => remaining(p, usage.as_ref()),
            None => (None, None),
        };
        let used_tokens = usage.as_ref().map_or(0, |u| clamp_i64(u.total_tokens));
        let used_cost = usage.as_ref().map_or(0.0, |u| u.total_cost_usd);

        let token_usage_percent = policy
            .as_ref()
            .filter(|p| p.has_token_limit())
            .map(|p| used_tokens as f64 / p.max_tokens as f64 * 100.0);
        let cost_usage_percent = policy
            .as_ref()
            .filter(|p| p.has_cost_limit())
            .map(|p| used_cost / p.max_cost_usd * 100.0);

        QuotaStatus {
            api_key: mask_api_key(api_key),
            has_policy: policy.is_some(),
            has_usage: usage.is_some(),
            policy: policy.map(|p| PolicySummary {
                name: p.name.clone(),
                allowed_models: p.allowed_models.clone(),
                max_tokens: p.max_tokens,
                max_cost_usd: p.max_cost_usd,
                expires_at: p.expires_at.clone(),
                is_expired: p.is_expired(),
            }),
            usage: usage.map(|u| UsageSummary {
                total_tokens: u.total_tokens,
                total_cost_usd: u.total_cost_usd,
                total_requests: u.total_requests,
                last_used_at: u.last_used_at,
                created_at: u.created_at,
            }),
            remaining_tokens,
            token_usage_percent,
            remaining_cost_usd,
            cost_usage_percent,
        }
    }
}
