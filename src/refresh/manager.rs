//! Ownership of the active manifest snapshot.
//!
//! The manager performs the initial read (local cache, then the bundled
//! default), refreshes from a [`ManifestSource`], and atomically publishes
//! each successfully validated manifest. A failed refresh leaves the active
//! snapshot untouched.

use super::source::{ManifestCache, ManifestSource};
use crate::manifest::{DroppedRule, Manifest};
use crate::pipeline::ManifestProvider;
use crate::types::now_ms;
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

const STATUS_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Loading,
    Active,
    Refreshing,
    /// The last refresh failed; the previous snapshot is still served.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Loaded,
    Refreshed,
    Failed,
}

/// Where a manifest (or a failure) came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOrigin {
    Cache,
    Bundled,
    Remote(String),
}

impl fmt::Display for ManifestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestOrigin::Cache => f.write_str("cache"),
            ManifestOrigin::Bundled => f.write_str("bundled"),
            ManifestOrigin::Remote(location) => f.write_str(location),
        }
    }
}

/// Notification raised after every load or refresh attempt.
#[derive(Debug, Clone)]
pub struct ManifestStatus {
    pub kind: StatusKind,
    pub source: ManifestOrigin,
    pub version: Option<String>,
    pub invalid_rules: Vec<DroppedRule>,
    pub error: Option<String>,
}

impl ManifestStatus {
    fn success(kind: StatusKind, source: ManifestOrigin, manifest: &Manifest) -> Self {
        Self {
            kind,
            source,
            version: manifest.version().map(str::to_string),
            invalid_rules: manifest.invalid_rules().to_vec(),
            error: None,
        }
    }

    fn failure(source: ManifestOrigin, error: String) -> Self {
        Self {
            kind: StatusKind::Failed,
            source,
            version: None,
            invalid_rules: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind != StatusKind::Failed
    }
}

/// Statistics from a refresh operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    /// Number of rules kept after validation
    pub rules_loaded: usize,
    /// Number of rules dropped by validation
    pub rules_dropped: usize,
    /// Duration of refresh operation in milliseconds
    pub duration_ms: u64,
    /// Timestamp of refresh
    pub timestamp: u64,
}

type RefreshOutcome = Result<RefreshStats, String>;

/// Holds the active manifest and coordinates refreshes.
pub struct ManifestManager {
    active: RwLock<Arc<Manifest>>,
    state: RwLock<ManagerState>,
    source: Option<Arc<dyn ManifestSource>>,
    cache: Option<ManifestCache>,
    status_tx: broadcast::Sender<ManifestStatus>,
    in_flight: Mutex<Option<broadcast::Sender<RefreshOutcome>>>,
    last_status: RwLock<Option<ManifestStatus>>,
    last_refresh_at: RwLock<u64>,
}

impl ManifestManager {
    /// Creates a manager serving the bundled default until
    /// [`initialize`](Self::initialize) runs.
    ///
    /// # Arguments
    /// - `source`: remote origin for refreshes, or `None` for local-only use
    /// - `cache`: where the last good document is persisted
    pub fn new(source: Option<Arc<dyn ManifestSource>>, cache: Option<ManifestCache>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            active: RwLock::new(Arc::new(Manifest::bundled_default())),
            state: RwLock::new(ManagerState::Uninitialized),
            source,
            cache,
            status_tx,
            in_flight: Mutex::new(None),
            last_status: RwLock::new(None),
            last_refresh_at: RwLock::new(0),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Receives every status notification raised after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ManifestStatus> {
        self.status_tx.subscribe()
    }

    /// The most recent notification, if any was raised.
    pub fn last_status(&self) -> Option<ManifestStatus> {
        self.last_status.read().clone()
    }

    /// Milliseconds since UNIX epoch of the last successful refresh, or 0.
    pub fn last_refresh(&self) -> u64 {
        *self.last_refresh_at.read()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Loads the cached document, falling back to the bundled default.
    ///
    /// Always leaves the manager Active with a usable manifest and returns
    /// the status of the manifest that ended up active.
    pub async fn initialize(&self) -> ManifestStatus {
        self.set_state(ManagerState::Loading);

        if let Some(cache) = &self.cache {
            match cache.load().await {
                Ok(Some(text)) => match Manifest::parse(&text) {
                    Ok(manifest) => {
                        info!(
                            "Loaded cached manifest {} ({} rules)",
                            manifest.version().unwrap_or("unversioned"),
                            manifest.actions().len()
                        );
                        let status =
                            ManifestStatus::success(StatusKind::Loaded, ManifestOrigin::Cache, &manifest);
                        self.publish(manifest);
                        self.set_state(ManagerState::Active);
                        self.notify(status.clone());
                        return status;
                    }
                    Err(e) => {
                        warn!("Cached manifest is unusable: {}", e);
                        self.notify(ManifestStatus::failure(ManifestOrigin::Cache, e.to_string()));
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to read manifest cache: {}", e);
                    self.notify(ManifestStatus::failure(ManifestOrigin::Cache, e.to_string()));
                }
            }
        }

        let manifest = Manifest::bundled_default();
        info!("Using bundled default manifest");
        let status = ManifestStatus::success(StatusKind::Loaded, ManifestOrigin::Bundled, &manifest);
        self.publish(manifest);
        self.set_state(ManagerState::Active);
        self.notify(status.clone());
        status
    }

    /// Fetches, validates and publishes a new manifest.
    ///
    /// A call made while another refresh is in progress waits for and
    /// returns the outcome of that refresh instead of starting a second one.
    ///
    /// # Returns
    /// - `Ok(RefreshStats)`: the new manifest is active
    /// - `Err(String)`: the refresh failed; the previous manifest stays active
    pub async fn refresh(self: &Arc<Self>, bypass_cache: bool) -> RefreshOutcome {
        let mut outcome_rx = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    *in_flight = Some(tx);
                    let manager = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = manager.do_refresh(bypass_cache).await;
                        let tx = manager.in_flight.lock().take();
                        if let Some(tx) = tx {
                            let _ = tx.send(outcome);
                        }
                    });
                    rx
                }
            }
        };

        outcome_rx
            .recv()
            .await
            .unwrap_or_else(|e| Err(format!("refresh ended without a result: {}", e)))
    }

    /// Refresh that bypasses any intermediary caches.
    pub async fn force_refresh(self: &Arc<Self>) -> RefreshOutcome {
        self.refresh(true).await
    }

    async fn do_refresh(&self, bypass_cache: bool) -> RefreshOutcome {
        let start = now_ms();
        let source = match &self.source {
            Some(source) => source.clone(),
            None => return Err("no manifest source configured".to_string()),
        };
        let origin = ManifestOrigin::Remote(source.describe());
        let previous = self.state();
        self.set_state(ManagerState::Refreshing);

        let text = match source.fetch(bypass_cache).await {
            Ok(text) => text,
            Err(e) => return Err(self.fail(origin, previous, e.to_string())),
        };
        let manifest = match Manifest::parse(&text) {
            Ok(manifest) => manifest,
            Err(e) => return Err(self.fail(origin, previous, e.to_string())),
        };

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&text).await {
                warn!("Failed to write manifest cache {}: {}", cache.path().display(), e);
            }
        }

        let status = ManifestStatus::success(StatusKind::Refreshed, origin, &manifest);
        let stats = RefreshStats {
            rules_loaded: manifest.actions().len(),
            rules_dropped: manifest.invalid_rules().len(),
            duration_ms: now_ms().saturating_sub(start),
            timestamp: now_ms(),
        };
        self.publish(manifest);
        *self.last_refresh_at.write() = stats.timestamp;
        self.set_state(ManagerState::Active);
        info!(
            "Manifest refresh completed: {} rules loaded, {} dropped in {}ms",
            stats.rules_loaded, stats.rules_dropped, stats.duration_ms
        );
        self.notify(status);
        Ok(stats)
    }

    fn fail(&self, origin: ManifestOrigin, previous: ManagerState, message: String) -> String {
        warn!("Manifest refresh from {} failed: {}", origin, message);
        if previous == ManagerState::Uninitialized {
            error!("No manifest has been loaded; serving the bundled default");
        }
        self.set_state(ManagerState::Failed);
        self.notify(ManifestStatus::failure(origin, message.clone()));
        message
    }

    fn publish(&self, manifest: Manifest) {
        *self.active.write() = Arc::new(manifest);
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.write() = state;
    }

    fn notify(&self, status: ManifestStatus) {
        *self.last_status.write() = Some(status.clone());
        // No subscribers is not an error.
        let _ = self.status_tx.send(status);
    }
}

impl ManifestProvider for ManifestManager {
    fn current(&self) -> Arc<Manifest> {
        self.active.read().clone()
    }
}
