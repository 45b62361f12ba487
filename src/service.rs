//! # Telemetry Service
//!
//! Wires the session, channel router, manifest manager, event processor and
//! background scheduler into the single object a host application holds.

use crate::channel::{
    ChannelProperties, ChannelRouter, FileChannel, TelemetryChannel, ValidatorChain,
};
use crate::config::TelemetryConfig;
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use crate::manifest::Manifest;
use crate::pipeline::{EventProcessor, ManifestProvider, ProcessOutcome, ProcessorStats};
use crate::refresh::{
    HttpManifestSource, ManifestCache, ManifestManager, ManifestSource, ManifestStatus,
    RefreshStats, TaskScheduler, TimedTaskHandle,
};
use crate::session::TelemetrySession;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Id of the JSON-lines channel created from [`TelemetryConfig::file_channel`].
pub const FILE_CHANNEL_ID: &str = "file";

pub struct TelemetryService {
    config: TelemetryConfig,
    session: Arc<TelemetrySession>,
    router: Arc<ChannelRouter>,
    manager: Arc<ManifestManager>,
    processor: EventProcessor,
    scheduler: TaskScheduler,
    refresh_task: Mutex<Option<Arc<TimedTaskHandle>>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl TelemetryService {
    /// Builds a service from configuration. The remote source is HTTP when
    /// `manifest_url` is set.
    pub fn new(config: TelemetryConfig, session: Arc<TelemetrySession>) -> Result<Self> {
        let source: Option<Arc<dyn ManifestSource>> = match &config.manifest_url {
            Some(url) => Some(Arc::new(HttpManifestSource::new(
                url,
                &config.host_name,
                config.schema_version,
            )?)),
            None => None,
        };
        Self::with_source(config, session, source)
    }

    /// Builds a service refreshing from an arbitrary source.
    pub fn with_source(
        config: TelemetryConfig,
        session: Arc<TelemetrySession>,
        source: Option<Arc<dyn ManifestSource>>,
    ) -> Result<Self> {
        let validators = ValidatorChain::standard(
            config.disabled,
            session.clone(),
            &config.channel_overrides,
        );
        let router = Arc::new(ChannelRouter::new(validators));
        let cache = config.cache_path.clone().map(ManifestCache::new);
        let manager = Arc::new(ManifestManager::new(source, cache));
        let processor = EventProcessor::new(
            session.clone(),
            router.clone(),
            manager.clone() as Arc<dyn ManifestProvider>,
        );

        if let Some(file_config) = &config.file_channel {
            let channel = FileChannel::new(
                FILE_CHANNEL_ID,
                ChannelProperties::default_channel(),
                file_config.clone(),
            )?;
            router.register(Arc::new(channel));
        }

        Ok(Self {
            config,
            session,
            router,
            manager,
            processor,
            scheduler: TaskScheduler::new(),
            refresh_task: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Loads the initial manifest and starts the background refresh.
    ///
    /// Calling it again returns the status of the active manifest without
    /// restarting anything.
    pub async fn start(&self) -> Result<ManifestStatus> {
        self.ensure_live()?;
        if self.started.swap(true, Ordering::AcqRel) {
            if let Some(status) = self.manager.last_status() {
                return Ok(status);
            }
        }

        let status = self.manager.initialize().await;
        info!(
            "Telemetry session {} started with manifest {}",
            self.session.id(),
            status.version.as_deref().unwrap_or("unversioned")
        );

        if self.manager.has_source() && self.config.scheduler.enabled {
            let manager = self.manager.clone();
            let handle = self.scheduler.schedule_timed(
                Duration::ZERO,
                self.config.scheduler.clone(),
                move || {
                    let manager = manager.clone();
                    async move {
                        if let Err(e) = manager.refresh(false).await {
                            debug!("Scheduled manifest refresh failed: {}", e);
                        }
                    }
                },
            );
            *self.refresh_task.lock() = Some(handle);
        }
        Ok(status)
    }

    /// Runs the event through the pipeline and the channels.
    pub fn post(&self, event: TelemetryEvent) -> Result<ProcessOutcome> {
        self.ensure_live()?;
        Ok(self.processor.process(event))
    }

    /// Validates and registers a channel. Returns whether it became active.
    pub fn register_channel(&self, channel: Arc<dyn TelemetryChannel>) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.router.register(channel))
    }

    /// Refreshes from the remote source, bypassing caches. Joins a refresh
    /// already in progress.
    pub async fn force_refresh(&self) -> Result<RefreshStats> {
        self.ensure_live()?;
        self.manager
            .force_refresh()
            .await
            .map_err(TelemetryError::Fetch)
    }

    /// Refresh in the background without waiting for the outcome.
    pub fn request_refresh(&self) -> Result<()> {
        self.ensure_live()?;
        let manager = self.manager.clone();
        self.scheduler.schedule(async move {
            if let Err(e) = manager.force_refresh().await {
                debug!("Requested manifest refresh failed: {}", e);
            }
        });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManifestStatus> {
        self.manager.subscribe()
    }

    pub fn current_manifest(&self) -> Arc<Manifest> {
        self.manager.current()
    }

    pub fn manager(&self) -> &Arc<ManifestManager> {
        &self.manager
    }

    pub fn session(&self) -> &Arc<TelemetrySession> {
        &self.session
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Drops pending work immediately. Buffered channel output is not
    /// flushed.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.dispose();
        self.refresh_task.lock().take();
        info!("Telemetry session {} disposed", self.session.id());
    }

    /// Stops background work, waits for an in-flight refresh and flushes
    /// every channel within `budget`.
    ///
    /// # Returns
    /// - `Ok(())`: everything completed in time
    /// - `Err(TelemetryError::Timeout)`: the budget ran out; remaining work
    ///   was dropped
    /// - `Err(other)`: a channel failed to flush
    pub async fn dispose_async(&self, budget: Duration) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.refresh_task.lock().take();

        let drain = async {
            self.scheduler.shutdown().await;
            self.router.flush_all().await
        };
        match tokio::time::timeout(budget, drain).await {
            Ok(result) => {
                info!("Telemetry session {} disposed", self.session.id());
                result
            }
            Err(_) => {
                warn!(
                    "Telemetry disposal exceeded {}ms budget, dropping remaining work",
                    budget.as_millis()
                );
                self.scheduler.dispose();
                Err(TelemetryError::Timeout)
            }
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            warn!("Telemetry service used after disposal");
            return Err(TelemetryError::Disposed);
        }
        Ok(())
    }
}

impl Drop for TelemetryService {
    fn drop(&mut self) {
        self.dispose();
    }
}
