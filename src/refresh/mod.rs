//! Manifest refresh: where documents come from, who owns the active
//! snapshot, and the background schedule that keeps it current.
//!
//! 1. **Initial read** (ManifestManager::initialize): local cache, then the
//!    bundled default
//! 2. **Scheduled refresh** (TaskScheduler): jittered periodic task guarded
//!    against overlapping itself
//! 3. **Forced refresh** (ManifestManager::force_refresh): bypasses caches and
//!    joins an in-flight refresh if there is one

pub mod manager;
pub mod scheduler;
pub mod source;

pub use manager::{
    ManagerState, ManifestManager, ManifestOrigin, ManifestStatus, RefreshStats, StatusKind,
};
pub use scheduler::{GuardToken, ReentrancyGuard, SchedulerConfig, TaskScheduler, TimedTaskHandle};
pub use source::{manifest_url, FileManifestSource, HttpManifestSource, ManifestCache, ManifestSource};
