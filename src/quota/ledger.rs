//! Key → cumulative usage ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QuotaUsage;
use crate::persistence::{LedgerSnapshot, PersistenceError, PersistenceResult};

pub const QUOTA_SNAPSHOT_VERSION: u32 = 1;
pub const QUOTA_FILE_NAME: &str = "quota_usage.json";

/// On-disk shape of the quota ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    #[serde(default)]
    pub usage: BTreeMap<String, QuotaUsage>,
    /// Absent in files written by hand or by older tools.
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    QUOTA_SNAPSHOT_VERSION
}

/// Usage rows behind a single lock. Every read returns a copy.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    rows: RwLock<HashMap<String, QuotaUsage>>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, api_key: &str) -> Option<QuotaUsage> {
        self.rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(api_key)
            .cloned()
    }

    pub fn get_or_create(&self, api_key: &str) -> QuotaUsage {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.entry(api_key.to_string())
            .or_insert_with(|| QuotaUsage::new(api_key, Utc::now()))
            .clone()
    }

    /// Add one request's tokens and cost in a single critical section,
    /// creating the row first if needed. Returns the updated row.
    pub fn increment(
        &self,
        api_key: &str,
        tokens: u64,
        cost_usd: f64,
        at: DateTime<Utc>,
    ) -> QuotaUsage {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let row = rows
            .entry(api_key.to_string())
            .or_insert_with(|| QuotaUsage::new(api_key, at));
        row.record(tokens, cost_usd, at);
        row.clone()
    }

    /// Insert or overwrite a row.
    pub fn set(&self, usage: QuotaUsage) {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(usage.api_key.clone(), usage);
    }

    pub fn remove(&self, api_key: &str) -> Option<QuotaUsage> {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(api_key)
    }

    /// Drop every row; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let count = rows.len();
        rows.clear();
        count
    }

    pub fn snapshot(&self) -> HashMap<String, QuotaUsage> {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerSnapshot for QuotaLedger {
    type Data = QuotaSnapshot;

    const FILE_NAME: &'static str = QUOTA_FILE_NAME;
    const LABEL: &'static str = "quota usage";

    fn export(&self, saved_at: DateTime<Utc>) -> QuotaSnapshot {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        QuotaSnapshot {
            usage: rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            last_saved: Some(saved_at),
            version: QUOTA_SNAPSHOT_VERSION,
        }
    }

    /// Rows from the snapshot overwrite live rows with the same key.
    fn restore(&self, data: QuotaSnapshot) -> PersistenceResult<usize> {
        if data.version > QUOTA_SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: data.version,
                supported: QUOTA_SNAPSHOT_VERSION,
            });
        }

        let count = data.usage.len();
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        for (key, mut usage) in data.usage {
            if usage.api_key.is_empty() {
                usage.api_key = key.clone();
            }
            rows.insert(key, usage);
        }
        Ok(count)
    }
}
