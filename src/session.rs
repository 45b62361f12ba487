//! Session policy flags and lazily computed host metadata.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Source of host metadata. Values are read once and cached by [`HostInfo`].
pub trait HostInfoProvider: Send + Sync {
    fn exe_name(&self) -> String;
    fn version(&self) -> String;
    fn culture(&self) -> String;
}

/// Reads host metadata from the running process and its environment.
#[derive(Debug, Default)]
pub struct ProcessHostInfo;

impl HostInfoProvider for ProcessHostInfo {
    fn exe_name(&self) -> String {
        std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn culture(&self) -> String {
        std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .ok()
            .and_then(|lang| lang.split('.').next().map(|s| s.replace('_', "-")))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "invariant".to_string())
    }
}

/// Host metadata computed on first use and cached for the process lifetime.
pub struct HostInfo {
    provider: Box<dyn HostInfoProvider>,
    exe_name: OnceLock<String>,
    version: OnceLock<String>,
    culture: OnceLock<String>,
}

impl HostInfo {
    pub fn new(provider: impl HostInfoProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            exe_name: OnceLock::new(),
            version: OnceLock::new(),
            culture: OnceLock::new(),
        }
    }

    pub fn exe_name(&self) -> &str {
        self.exe_name.get_or_init(|| self.provider.exe_name())
    }

    pub fn version(&self) -> &str {
        self.version.get_or_init(|| self.provider.version())
    }

    pub fn culture(&self) -> &str {
        self.culture.get_or_init(|| self.provider.culture())
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        HostInfo::new(ProcessHostInfo)
    }
}

/// Policy state of the current telemetry session.
///
/// Flags may change at any time from any thread; stages read them per
/// event and never cache them.
pub struct TelemetrySession {
    id: Uuid,
    opted_out: AtomicBool,
    can_collect_private_information: AtomicBool,
    internal_user: AtomicBool,
    host: Arc<HostInfo>,
    user_id: RwLock<Option<String>>,
}

impl TelemetrySession {
    pub fn new() -> Self {
        Self::with_host(Arc::new(HostInfo::default()))
    }

    pub fn with_host(host: Arc<HostInfo>) -> Self {
        Self {
            id: Uuid::new_v4(),
            opted_out: AtomicBool::new(false),
            can_collect_private_information: AtomicBool::new(false),
            internal_user: AtomicBool::new(false),
            host,
            user_id: RwLock::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn is_opted_out(&self) -> bool {
        self.opted_out.load(Ordering::Acquire)
    }

    pub fn set_opted_out(&self, value: bool) {
        self.opted_out.store(value, Ordering::Release);
    }

    /// Whether raw PII values may be attached next to their hashes.
    pub fn can_collect_private_information(&self) -> bool {
        self.can_collect_private_information.load(Ordering::Acquire)
    }

    pub fn set_can_collect_private_information(&self, value: bool) {
        self.can_collect_private_information
            .store(value, Ordering::Release);
    }

    pub fn is_internal_user(&self) -> bool {
        self.internal_user.load(Ordering::Acquire)
    }

    pub fn set_internal_user(&self, value: bool) {
        self.internal_user.store(value, Ordering::Release);
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }
}

impl Default for TelemetrySession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    impl HostInfoProvider for CountingProvider {
        fn exe_name(&self) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            "devenv".to_string()
        }

        fn version(&self) -> String {
            "17.0".to_string()
        }

        fn culture(&self) -> String {
            "en-US".to_string()
        }
    }

    #[test]
    fn test_host_info_is_computed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let host = HostInfo::new(CountingProvider {
            calls: calls.clone(),
        });
        assert_eq!(host.exe_name(), "devenv");
        assert_eq!(host.exe_name(), "devenv");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(host.culture(), "en-US");
    }

    #[test]
    fn test_session_flags_default_off() {
        let session = TelemetrySession::new();
        assert!(!session.is_opted_out());
        assert!(!session.can_collect_private_information());
        assert!(!session.is_internal_user());

        session.set_opted_out(true);
        session.set_can_collect_private_information(true);
        assert!(session.is_opted_out());
        assert!(session.can_collect_private_information());
    }

    #[test]
    fn test_sessions_have_distinct_ids() {
        assert_ne!(TelemetrySession::new().id(), TelemetrySession::new().id());
    }
}
