//! Per-key access policy.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Limits and restrictions attached to a single API key.
///
/// A policy is immutable once loaded. Zero or negative limits mean unlimited,
/// an empty model list means every model is allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_models: Vec<String>,

    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub max_tokens: i64,

    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub max_cost_usd: f64,

    /// RFC 3339 instant or a bare `YYYY-MM-DD` date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

impl ApiKeyPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn allowed_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_tokens(mut self, max_tokens: i64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn max_cost_usd(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = max_cost_usd;
        self
    }

    pub fn expires_at(mut self, expires_at: impl Into<String>) -> Self {
        self.expires_at = Some(expires_at.into());
        self
    }

    /// Resolves `expires_at` to an instant.
    ///
    /// A date-only value means the last second of that day in local time.
    /// Returns `None` when unset or unparsable.
    pub fn parsed_expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expires_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
        let end_of_day = date.and_time(NaiveTime::from_hms_opt(23, 59, 59)?);
        Local
            .from_local_datetime(&end_of_day)
            .latest()
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn has_model_restriction(&self) -> bool {
        !self.allowed_models.is_empty()
    }

    pub fn has_token_limit(&self) -> bool {
        self.max_tokens > 0
    }

    pub fn has_cost_limit(&self) -> bool {
        self.max_cost_usd > 0.0
    }

    pub fn has_expiration(&self) -> bool {
        self.expires_at
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    pub fn has_any_restriction(&self) -> bool {
        self.has_model_restriction()
            || self.has_token_limit()
            || self.has_cost_limit()
            || self.has_expiration()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// An unparsable expiry never expires; config validation reports it instead.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.parsed_expires_at().is_some_and(|ts| now > ts)
    }

    /// Exact, case-sensitive match against the allow-list.
    pub fn is_model_allowed(&self, model: &str) -> bool {
        !self.has_model_restriction() || self.allowed_models.iter().any(|m| m == model)
    }
}
