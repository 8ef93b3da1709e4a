//! Crash-safe snapshot persistence with autosave.
//!
//! One [`PersistenceController`] is created per ledger. It owns the snapshot
//! path, the periodic autosave task and a save lock that keeps timer saves
//! and the shutdown save from overlapping.
//!
//! # File layout
//!
//! ```text
//! <data-dir>/            (0700)
//! ├── quota_usage.json   (0600)
//! └── usage_stats.json   (0600)
//! ```

mod file;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Persistence path not set")]
    PathNotSet,

    #[error("Persistence directory must not be empty")]
    EmptyPath,

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// A ledger that can be exported to and merged from an on-disk snapshot.
pub trait LedgerSnapshot: Send + Sync + 'static {
    type Data: Serialize + DeserializeOwned + Send + 'static;

    /// File name inside the persistence directory.
    const FILE_NAME: &'static str;
    /// Name used in log events.
    const LABEL: &'static str;

    /// Deep copy of the ledger taken under its read lock.
    fn export(&self, saved_at: DateTime<Utc>) -> Self::Data;

    /// Merge a snapshot into the live ledger under its write lock.
    ///
    /// Must reject the snapshot before mutating anything if it cannot be
    /// applied. Returns the number of top-level entries merged.
    fn restore(&self, data: Self::Data) -> PersistenceResult<usize>;
}

struct AutosaveTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PersistenceController<L: LedgerSnapshot> {
    ledger: Arc<L>,
    path: RwLock<Option<PathBuf>>,
    interval: Duration,
    save_lock: tokio::sync::Mutex<()>,
    autosave: Mutex<Option<AutosaveTask>>,
}

impl<L: LedgerSnapshot> std::fmt::Debug for PersistenceController<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceController")
            .field("ledger", &L::LABEL)
            .field("path", &self.path())
            .field("interval", &self.interval)
            .field("autosave_running", &self.is_autosave_running())
            .finish()
    }
}

impl<L: LedgerSnapshot> PersistenceController<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            path: RwLock::new(None),
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            save_lock: tokio::sync::Mutex::new(()),
            autosave: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Resolve `dir` to an absolute path, create it owner-only, and target
    /// `dir/FILE_NAME` for later loads and saves. Returns the file path.
    pub fn set_path(&self, dir: impl AsRef<Path>) -> PersistenceResult<PathBuf> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(PersistenceError::EmptyPath);
        }
        let dir = std::path::absolute(dir).map_err(|source| PersistenceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        file::create_private_dir(&dir).map_err(|source| PersistenceError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(L::FILE_NAME);
        *self.path.write().unwrap_or_else(|e| e.into_inner()) = Some(path.clone());
        Ok(path)
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn require_path(&self) -> PersistenceResult<PathBuf> {
        self.path().ok_or(PersistenceError::PathNotSet)
    }

    /// Merge the snapshot file into the ledger.
    ///
    /// Returns `Ok(false)` when there is no file yet. A file that fails to
    /// parse is an error and nothing is merged.
    pub async fn load(&self) -> PersistenceResult<bool> {
        let path = self.require_path()?;
        let _guard = self.save_lock.lock().await;

        let read_path = path.clone();
        let bytes = tokio::task::spawn_blocking(move || file::read_if_exists(&read_path))
            .await?
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;

        let Some(bytes) = bytes else {
            tracing::debug!(
                ledger = L::LABEL,
                path = %path.display(),
                "Snapshot file does not exist, starting fresh"
            );
            return Ok(false);
        };

        let data: L::Data =
            serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Malformed {
                path: path.clone(),
                source,
            })?;
        let entries = self.ledger.restore(data)?;

        tracing::info!(
            ledger = L::LABEL,
            path = %path.display(),
            entries,
            "Loaded snapshot"
        );
        Ok(true)
    }

    /// Write the ledger to disk atomically.
    pub async fn save(&self) -> PersistenceResult<()> {
        let path = self.require_path()?;
        let _guard = self.save_lock.lock().await;

        let bytes = serde_json::to_vec_pretty(&self.ledger.export(Utc::now()))?;
        let size = bytes.len();

        let write_path = path.clone();
        tokio::task::spawn_blocking(move || file::write_atomic(&write_path, &bytes))
            .await?
            .map_err(|source| PersistenceError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            ledger = L::LABEL,
            path = %path.display(),
            bytes = size,
            "Saved snapshot"
        );
        Ok(())
    }

    pub fn is_autosave_running(&self) -> bool {
        self.autosave
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawn the periodic save task on the current Tokio runtime.
    ///
    /// Returns `false` without doing anything if autosave is already running
    /// or the interval is zero. Failed saves are logged and retried on the
    /// next tick.
    pub fn start_autosave(self: &Arc<Self>) -> bool {
        if self.interval.is_zero() {
            tracing::warn!(ledger = L::LABEL, "Autosave interval is zero, autosave disabled");
            return false;
        }

        let mut slot = self.autosave.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = Arc::downgrade(self);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else { break };
                        if let Err(e) = controller.save().await {
                            tracing::warn!(ledger = L::LABEL, error = %e, "Autosave failed");
                        }
                    }
                }
            }
        });

        *slot = Some(AutosaveTask { cancel, handle });
        tracing::info!(
            ledger = L::LABEL,
            interval_secs = period.as_secs(),
            "Autosave started"
        );
        true
    }

    /// Stop the autosave task, wait for it, then save once more.
    ///
    /// A no-op returning `false` when autosave was never started. The final
    /// save's outcome is logged, never returned.
    pub async fn stop_autosave(&self) -> bool {
        let task = self
            .autosave
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(task) = task else {
            return false;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            tracing::warn!(ledger = L::LABEL, error = %e, "Autosave task ended abnormally");
        }

        match self.save().await {
            Ok(()) => tracing::info!(ledger = L::LABEL, "Saved on shutdown"),
            Err(e) => tracing::warn!(ledger = L::LABEL, error = %e, "Final save failed"),
        }
        true
    }
}
