//! Aggregate request statistics by API, model, day and hour.
//!
//! Observability only: nothing here affects admission.

mod types;

pub use types::{ApiStats, ModelStats, RequestDetail, RequestRecord, StatsSnapshot, TokenStats};

use std::sync::RwLock;

use chrono::{DateTime, Duration, Local, Timelike, Utc};

use crate::config::DEFAULT_DETAIL_RETENTION_DAYS;
use crate::persistence::{LedgerSnapshot, PersistenceResult};

pub const STATS_FILE_NAME: &str = "usage_stats.json";

/// Time-bucketed usage counters.
///
/// Per-request details older than the retention window are dropped when a
/// model receives a new request and when a snapshot is restored. Aggregate
/// counters are never reduced by pruning.
#[derive(Debug)]
pub struct UsageStatistics {
    state: RwLock<StatsSnapshot>,
    retention: Option<Duration>,
}

impl Default for UsageStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageStatistics {
    pub fn new() -> Self {
        Self::with_retention(Some(Duration::days(i64::from(
            DEFAULT_DETAIL_RETENTION_DAYS,
        ))))
    }

    /// `None` keeps every detail forever.
    pub fn with_retention(retention: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(StatsSnapshot::default()),
            retention,
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retention.map(|r| now - r)
    }

    pub fn record_request(&self, record: RequestRecord) {
        let tokens = record.tokens.normalized();
        let total = tokens.total_tokens;
        let local = record.timestamp.with_timezone(&Local);
        let day = local.format("%Y-%m-%d").to_string();
        let hour = local.hour();
        let cutoff = self.cutoff(Utc::now());

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        bump(&mut state.total_requests, 1);
        if record.failed {
            bump(&mut state.failure_count, 1);
        } else {
            bump(&mut state.success_count, 1);
        }
        bump(&mut state.total_tokens, total);

        let api = state.apis.entry(record.api).or_default();
        bump(&mut api.total_requests, 1);
        bump(&mut api.total_tokens, total);

        let model = api.models.entry(record.model).or_default();
        bump(&mut model.total_requests, 1);
        bump(&mut model.total_tokens, total);
        if let Some(cutoff) = cutoff {
            model.details.retain(|d| d.timestamp >= cutoff);
        }
        model.details.push(RequestDetail {
            timestamp: record.timestamp,
            source: record.source,
            tokens,
            failed: record.failed,
        });

        bump(state.requests_by_day.entry(day.clone()).or_default(), 1);
        bump(state.requests_by_hour.entry(hour).or_default(), 1);
        bump(state.tokens_by_day.entry(day).or_default(), total);
        bump(state.tokens_by_hour.entry(hour).or_default(), total);
    }

    /// Drop every detail older than the retention window. Returns how many
    /// were removed.
    pub fn prune_details(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = self.cutoff(now) else {
            return 0;
        };
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        prune(&mut state, cutoff)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn api(&self, name: &str) -> Option<ApiStats> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .apis
            .get(name)
            .cloned()
    }

    pub fn total_requests(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).total_requests
    }

    pub fn total_tokens(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).total_tokens
    }

    pub fn success_count(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).failure_count
    }
}

fn bump(counter: &mut u64, by: u64) {
    *counter = counter.saturating_add(by);
}

fn prune(state: &mut StatsSnapshot, cutoff: DateTime<Utc>) -> usize {
    let mut removed = 0;
    for api in state.apis.values_mut() {
        for model in api.models.values_mut() {
            let before = model.details.len();
            model.details.retain(|d| d.timestamp >= cutoff);
            removed += before - model.details.len();
        }
    }
    removed
}

impl LedgerSnapshot for UsageStatistics {
    type Data = StatsSnapshot;

    const FILE_NAME: &'static str = STATS_FILE_NAME;
    const LABEL: &'static str = "usage statistics";

    fn export(&self, saved_at: DateTime<Utc>) -> StatsSnapshot {
        let mut snapshot = self.snapshot();
        snapshot.last_saved = Some(saved_at);
        snapshot
    }

    /// Totals are overwritten, APIs replaced by name, buckets merged by key.
    fn restore(&self, data: StatsSnapshot) -> PersistenceResult<usize> {
        let cutoff = self.cutoff(Utc::now());
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        state.total_requests = data.total_requests;
        state.success_count = data.success_count;
        state.failure_count = data.failure_count;
        state.total_tokens = data.total_tokens;

        let count = data.apis.len();
        state.apis.extend(data.apis);
        state.requests_by_day.extend(data.requests_by_day);
        state.requests_by_hour.extend(data.requests_by_hour);
        state.tokens_by_day.extend(data.tokens_by_day);
        state.tokens_by_hour.extend(data.tokens_by_hour);

        if let Some(cutoff) = cutoff {
            let removed = prune(&mut state, cutoff);
            if removed > 0 {
                tracing::debug!(removed, "Dropped expired request details from snapshot");
            }
        }
        Ok(count)
    }
}
