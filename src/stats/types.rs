//! Statistics records and the snapshot shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token breakdown of one request as reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
}

impl TokenStats {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
        .normalized()
    }

    /// Fill `total_tokens` from its parts when the provider left it at zero.
    pub fn normalized(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self
                .input_tokens
                .saturating_add(self.output_tokens)
                .saturating_add(self.reasoning_tokens);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub tokens: TokenStats,
    #[serde(default)]
    pub failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub details: Vec<RequestDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub models: BTreeMap<String, ModelStats>,
}

/// Aggregate usage, both the read model and the `usage_stats.json` shape.
///
/// Hour buckets are keyed `0..=23` and serialize as string keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_tokens: u64,
    pub apis: BTreeMap<String, ApiStats>,
    pub requests_by_day: BTreeMap<String, u64>,
    pub requests_by_hour: BTreeMap<u32, u64>,
    pub tokens_by_day: BTreeMap<String, u64>,
    pub tokens_by_hour: BTreeMap<u32, u64>,
    /// Set only on snapshots written to disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<DateTime<Utc>>,
}

/// One finished request, as handed over by the request pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub api: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub tokens: TokenStats,
    pub failed: bool,
}

impl RequestRecord {
    pub fn new(api: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            model: model.into(),
            timestamp: Utc::now(),
            source: String::new(),
            tokens: TokenStats::default(),
            failed: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn tokens(mut self, tokens: TokenStats) -> Self {
        self.tokens = tokens.normalized();
        self
    }

    pub fn failed(mut self, failed: bool) -> Self {
        self.failed = failed;
        self
    }
}
