//! Per-key policy enforcement and usage accounting.

mod error;
mod gate;
mod ledger;
mod manager;
mod policy_store;
mod status;
mod types;

pub use error::{ErrorPayload, QuotaError, QuotaErrorKind};
pub use gate::Admission;
pub use ledger::{QUOTA_FILE_NAME, QUOTA_SNAPSHOT_VERSION, QuotaLedger, QuotaSnapshot};
pub use manager::QuotaManager;
pub use policy_store::PolicyStore;
pub use status::{PolicySummary, QuotaStatus, UsageSummary, mask_api_key};
pub use types::{CheckResult, QuotaUsage, TokenCounts};
