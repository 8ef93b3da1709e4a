//! Application context owning every metering component.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ApiKeyPolicy, MeteringConfig};
use crate::persistence::PersistenceController;
use crate::pricing::PricingCatalog;
use crate::quota::{Admission, QuotaError, QuotaLedger, QuotaManager};
use crate::stats::{RequestRecord, UsageStatistics};
use crate::Result;

/// One instance of each component, constructed once at startup and shared
/// by reference with the request pipeline.
#[derive(Debug)]
pub struct Metering {
    config: MeteringConfig,
    pricing: Arc<PricingCatalog>,
    quota: Arc<QuotaManager>,
    stats: Arc<UsageStatistics>,
    quota_store: Arc<PersistenceController<QuotaLedger>>,
    stats_store: Arc<PersistenceController<UsageStatistics>>,
}

impl Metering {
    /// Build every component from `config` without touching the filesystem.
    pub fn new(config: MeteringConfig) -> Self {
        let interval = config.autosave_interval();
        let pricing = Arc::new(PricingCatalog::with_defaults());
        let quota = Arc::new(QuotaManager::new(Arc::clone(&pricing)));
        quota.load_policies(config.api_key_policies.clone());
        let stats = Arc::new(UsageStatistics::with_retention(config.detail_retention()));

        let quota_store = Arc::new(
            PersistenceController::new(Arc::clone(quota.ledger())).with_interval(interval),
        );
        let stats_store =
            Arc::new(PersistenceController::new(Arc::clone(&stats)).with_interval(interval));

        Self {
            config,
            pricing,
            quota,
            stats,
            quota_store,
            stats_store,
        }
    }

    /// Build, restore state from disk and start autosave.
    pub async fn start(config: MeteringConfig) -> Result<Self> {
        let metering = Self::new(config);
        metering.initialize().await?;
        Ok(metering)
    }

    /// Resolve snapshot paths, load pricing overrides and snapshots, then
    /// start both autosave tasks.
    ///
    /// An invalid configuration or an unusable data directory is an error.
    /// Unreadable pricing or snapshot files are logged and startup continues
    /// with current state.
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        let data_dir = self.config.data_dir();
        self.quota_store.set_path(data_dir)?;
        self.stats_store.set_path(data_dir)?;

        self.reload_pricing().await;

        if let Err(e) = self.quota_store.load().await {
            tracing::warn!(error = %e, "Failed to load quota usage");
        }
        if let Err(e) = self.stats_store.load().await {
            tracing::warn!(error = %e, "Failed to load usage statistics");
        }

        self.quota_store.start_autosave();
        self.stats_store.start_autosave();

        tracing::info!(
            data_dir = %data_dir.display(),
            policies = self.quota.all_policies().len(),
            models_priced = self.pricing.len(),
            "Metering initialized"
        );
        Ok(())
    }

    /// Stop autosave and write final snapshots. Safe to call without
    /// `initialize`.
    pub async fn shutdown(&self) {
        self.quota_store.stop_autosave().await;
        self.stats_store.stop_autosave().await;
    }

    /// Re-read the configured pricing sources; failures keep current prices.
    pub async fn reload_pricing(&self) {
        if let Some(dir) = &self.config.pricing_store_dir
            && let Err(e) = self.pricing.load_from_store_dir(dir).await
        {
            tracing::warn!(error = %e, "Failed to load pricing from config store");
        }
        if let Some(file) = &self.config.pricing_file
            && let Err(e) = self.pricing.load_from_file(file).await
        {
            tracing::warn!(error = %e, "Failed to load pricing file");
        }
    }

    pub fn reload_policies(&self, policies: HashMap<String, ApiKeyPolicy>) -> usize {
        self.quota.load_policies(policies)
    }

    pub fn admit(&self, api_key: &str, model: &str) -> std::result::Result<Admission, QuotaError> {
        self.quota.admit(api_key, model)
    }

    pub fn record_request(&self, record: RequestRecord) {
        self.stats.record_request(record);
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    pub fn pricing(&self) -> &Arc<PricingCatalog> {
        &self.pricing
    }

    pub fn quota(&self) -> &Arc<QuotaManager> {
        &self.quota
    }

    pub fn stats(&self) -> &Arc<UsageStatistics> {
        &self.stats
    }

    pub fn quota_store(&self) -> &Arc<PersistenceController<QuotaLedger>> {
        &self.quota_store
    }

    pub fn stats_store(&self) -> &Arc<PersistenceController<UsageStatistics>> {
        &self.stats_store
    }
}
