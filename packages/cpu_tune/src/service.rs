use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};

use crate::timer::ReconcileTimer;
use crate::{
    CpuCapabilities, CpuModel, CpuVendor, DirectoryFlagStore, FlagStore, IA32_MISC_ENABLE,
    InitError, KernelLockdown, Lifecycle, MatchScore, Platform, Properties, ProtectionPolicy,
    RegisterAccess, StartError, TickReport, TuningConfig, TuningEngine,
    UNSUPPORTED_PLATFORM_FLAG, WritePermission,
};

const SCORE_KNOWN_MODEL: MatchScore = MatchScore::new(1000);
const SCORE_UNKNOWN_MODEL: MatchScore = MatchScore::new(500);

#[derive(Debug)]
struct Session {
    engine: Arc<Mutex<TuningEngine>>,
    timer: ReconcileTimer,
}

/// The tuning service: keeps turbo boost, PROCHOT and hardware P-states where the operator wants
/// them for as long as it runs, and puts everything back when it stops.
///
/// Driven through the [`Lifecycle`] hooks. Dropping the service stops it.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # {
/// use std::sync::Arc;
///
/// use cpu_tune::fake::FakeHardware;
/// use cpu_tune::{CpuTune, Lifecycle, Platform, Properties};
///
/// let hardware = Arc::new(FakeHardware::builder().build());
/// let platform = Platform::fake(&hardware);
///
/// let mut service = CpuTune::with_state_directory(&platform, "/var/lib/cpu_tune");
///
/// assert!(service.probe(&platform).is_match());
/// service.init(&Properties::new()).unwrap();
/// service.start(&platform).unwrap();
///
/// service.stop(&platform);
/// service.free();
/// # }
/// ```
#[derive(Debug)]
pub struct CpuTune {
    flags: Arc<dyn FlagStore>,
    protection: Option<Arc<dyn ProtectionPolicy>>,
    config: Option<TuningConfig>,
    session: Option<Session>,
}

impl CpuTune {
    /// Creates the service with the given persistent flag store.
    ///
    /// Register writes are permitted or denied by the kernel lockdown mode of the platform
    /// passed to `start`, unless [`with_protection_policy()`][Self::with_protection_policy]
    /// says otherwise.
    #[must_use]
    pub fn new(flags: Arc<dyn FlagStore>) -> Self {
        Self {
            flags,
            protection: None,
            config: None,
            session: None,
        }
    }

    /// Creates the service with flags stored as files in `directory`.
    #[must_use]
    pub fn with_state_directory(platform: &Platform, directory: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DirectoryFlagStore::new(platform, directory)))
    }

    /// Replaces the protection policy consulted by `start`.
    #[must_use]
    pub fn with_protection_policy(mut self, protection: Arc<dyn ProtectionPolicy>) -> Self {
        self.protection = Some(protection);
        self
    }

    /// Whether a tuning session is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// The capabilities detected by the running session.
    #[must_use]
    pub fn capabilities(&self) -> Option<CpuCapabilities> {
        self.session
            .as_ref()
            .and_then(|session| session.engine.lock().capabilities())
    }

    /// Whether the running session has latched hardware P-states on.
    #[must_use]
    pub fn hardware_pstate_latched(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.engine.lock().hardware_pstate_latched())
    }

    /// Runs a reconciliation tick right away on the calling thread, serialized with the timer.
    ///
    /// Returns `None` if not running.
    pub fn reconcile_now(&self) -> Option<TickReport> {
        self.session
            .as_ref()
            .map(|session| session.engine.lock().tick())
    }

    fn reject(&self, reason: &str) -> MatchScore {
        warn!(reason, "platform not supported");

        if let Err(e) = self.flags.set(UNSUPPORTED_PLATFORM_FLAG) {
            warn!(error = %e, "failed to record unsupported platform flag");
        }

        MatchScore::NONE
    }

    fn end_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.timer.cancel();
        session.engine.lock().stop();

        info!("stopped");
    }
}

impl Lifecycle for CpuTune {
    fn probe(&mut self, platform: &Platform) -> MatchScore {
        info!(version = env!("CARGO_PKG_VERSION"), "probing");

        let access = RegisterAccess::new(platform);
        let capabilities = CpuCapabilities::detect(&access);

        if capabilities.vendor() != CpuVendor::Intel {
            return self.reject("not an Intel processor");
        }

        let first = platform.online_processors().head;
        if let Err(e) = access.read(IA32_MISC_ENABLE, Some(first)) {
            debug!(error = %e, "probe read failed");
            return self.reject("model-specific registers are not accessible");
        }

        if capabilities.model() == CpuModel::Unknown {
            SCORE_UNKNOWN_MODEL
        } else {
            SCORE_KNOWN_MODEL
        }
    }

    fn init(&mut self, properties: &Properties) -> Result<(), InitError> {
        if self.session.is_some() {
            return Err(InitError::SessionRunning);
        }

        if self.flags.is_set(UNSUPPORTED_PLATFORM_FLAG) {
            warn!("a previous probe found this platform unsupported");

            if let Err(e) = self.flags.clear(UNSUPPORTED_PLATFORM_FLAG) {
                warn!(error = %e, "failed to clear unsupported platform flag");
            }
        }

        let config = TuningConfig::from_properties(properties);

        if config.disabled() {
            info!("disabled by configuration");
            self.config = None;
            return Err(InitError::Disabled);
        }

        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self, platform: &Platform) -> Result<(), StartError> {
        if self.session.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        let config = self.config.clone().ok_or(StartError::NotInitialized)?;

        let permission = match &self.protection {
            Some(protection) => protection.register_writes(),
            None => KernelLockdown::new(platform).register_writes(),
        };
        if let WritePermission::Denied { reason } = permission {
            return Err(StartError::NotPermitted { reason });
        }

        let poll_interval = config.poll_interval();
        let mut engine = TuningEngine::new(platform, config);
        engine.capture_originals();

        // From here on, any early return restores what was captured.
        let engine = scopeguard::guard(Arc::new(Mutex::new(engine)), |engine| {
            engine.lock().stop();
        });

        engine.lock().tick();

        let timer = ReconcileTimer::start(poll_interval, {
            let engine = Arc::clone(&engine);
            move || {
                engine.lock().tick();
            }
        })
        .map_err(StartError::Timer)?;

        self.session = Some(Session {
            engine: ScopeGuard::into_inner(engine),
            timer,
        });

        info!(?poll_interval, "started");
        Ok(())
    }

    fn stop(&mut self, _platform: &Platform) {
        self.end_session();
    }

    fn free(&mut self) {
        self.end_session();
        self.config = None;
    }
}

impl Drop for CpuTune {
    fn drop(&mut self) {
        self.end_session();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::fake::FakeHardware;
    use crate::flags::MockFlagStore;
    use crate::protection::MockProtectionPolicy;
    use crate::{IA32_POWER_CTL, PROC_HOT_BIT};

    assert_impl_all!(CpuTune: Send, Sync);

    fn permissive() -> Arc<dyn ProtectionPolicy> {
        let mut protection = MockProtectionPolicy::new();
        protection
            .expect_register_writes()
            .returning(|| WritePermission::Permitted);
        Arc::new(protection)
    }

    fn quiet_flags() -> MockFlagStore {
        let mut flags = MockFlagStore::new();
        flags.expect_is_set().returning(|_| false);
        flags
    }

    #[test]
    fn probe_rejects_other_vendor_and_records_flag() {
        let hardware = Arc::new(FakeHardware::builder().vendor(*b"AuthenticAMD").build());

        let mut flags = MockFlagStore::new();
        flags
            .expect_set()
            .withf(|name| name == UNSUPPORTED_PLATFORM_FLAG)
            .times(1)
            .returning(|_| Ok(()));

        let mut service = CpuTune::new(Arc::new(flags));

        assert_eq!(service.probe(&Platform::fake(&hardware)), MatchScore::NONE);
    }

    #[test]
    fn probe_rejects_inaccessible_registers() {
        let hardware = Arc::new(FakeHardware::builder().fault_on(IA32_MISC_ENABLE).build());

        let mut flags = MockFlagStore::new();
        flags.expect_set().times(1).returning(|_| Ok(()));

        let mut service = CpuTune::new(Arc::new(flags));

        assert!(!service.probe(&Platform::fake(&hardware)).is_match());
    }

    #[test]
    fn probe_scores_known_model_higher() {
        let known = Arc::new(FakeHardware::builder().build());
        let unknown = Arc::new(FakeHardware::builder().model(0x01).build());

        let mut service = CpuTune::new(Arc::new(MockFlagStore::new()));

        let known = service.probe(&Platform::fake(&known));
        let unknown = service.probe(&Platform::fake(&unknown));

        assert!(unknown.is_match());
        assert!(known > unknown);
    }

    #[test]
    fn init_clears_stale_flag() {
        let mut flags = MockFlagStore::new();
        flags.expect_is_set().times(1).returning(|_| true);
        flags
            .expect_clear()
            .withf(|name| name == UNSUPPORTED_PLATFORM_FLAG)
            .times(1)
            .returning(|_| Ok(()));

        let mut service = CpuTune::new(Arc::new(flags));

        service.init(&Properties::new()).unwrap();
    }

    #[test]
    fn init_refuses_when_disabled() {
        let mut service = CpuTune::new(Arc::new(quiet_flags()));

        let error = service
            .init(&Properties::from_toml_str("disabled = true").unwrap())
            .unwrap_err();

        assert!(matches!(error, InitError::Disabled));

        let hardware = Arc::new(FakeHardware::builder().build());
        let error = service.start(&Platform::fake(&hardware)).unwrap_err();
        assert!(matches!(error, StartError::NotInitialized));
    }

    #[test]
    fn start_requires_init() {
        let hardware = Arc::new(FakeHardware::builder().build());
        let mut service = CpuTune::new(Arc::new(quiet_flags()));

        let error = service.start(&Platform::fake(&hardware)).unwrap_err();

        assert!(matches!(error, StartError::NotInitialized));
        assert_eq!(hardware.write_count(), 0);
    }

    #[test]
    fn start_refused_by_protection_policy_writes_nothing() {
        let hardware = Arc::new(FakeHardware::builder().build());

        let mut protection = MockProtectionPolicy::new();
        protection
            .expect_register_writes()
            .returning(|| WritePermission::Denied {
                reason: "testing".to_string(),
            });

        let mut service =
            CpuTune::new(Arc::new(quiet_flags())).with_protection_policy(Arc::new(protection));
        service.init(&Properties::new()).unwrap();

        let error = service.start(&Platform::fake(&hardware)).unwrap_err();

        assert!(matches!(error, StartError::NotPermitted { .. }));
        assert!(!service.is_running());
        assert_eq!(hardware.write_count(), 0);
    }

    #[test]
    fn start_applies_first_tick_synchronously() {
        let hardware = Arc::new(FakeHardware::builder().build());
        let platform = Platform::fake(&hardware);

        let mut service =
            CpuTune::new(Arc::new(quiet_flags())).with_protection_policy(permissive());
        service.init(&Properties::new()).unwrap();
        service.start(&platform).unwrap();

        assert!(service.is_running());
        assert!(service.hardware_pstate_latched());
        assert_ne!(
            hardware.register(IA32_POWER_CTL, Some(0)).unwrap() & PROC_HOT_BIT,
            0
        );

        let error = service.start(&platform).unwrap_err();
        assert!(matches!(error, StartError::AlreadyRunning));

        let error = service.init(&Properties::new()).unwrap_err();
        assert!(matches!(error, InitError::SessionRunning));
    }

    #[test]
    fn stop_restores_and_is_idempotent() {
        let hardware = Arc::new(FakeHardware::builder().build());
        let platform = Platform::fake(&hardware);
        let original = hardware.register(IA32_POWER_CTL, Some(1));

        let mut service =
            CpuTune::new(Arc::new(quiet_flags())).with_protection_policy(permissive());
        service.init(&Properties::new()).unwrap();
        service.start(&platform).unwrap();

        service.stop(&platform);
        service.stop(&platform);
        service.free();
        service.free();

        assert!(!service.is_running());
        assert_eq!(service.reconcile_now(), None);
        assert_eq!(hardware.register(IA32_POWER_CTL, Some(1)), original);
    }

    #[test]
    fn drop_restores() {
        let hardware = Arc::new(FakeHardware::builder().build());
        let platform = Platform::fake(&hardware);
        let original = hardware.register(IA32_POWER_CTL, Some(0));

        {
            let mut service =
                CpuTune::new(Arc::new(quiet_flags())).with_protection_policy(permissive());
            service.init(&Properties::new()).unwrap();
            service.start(&platform).unwrap();
        }

        assert_eq!(hardware.register(IA32_POWER_CTL, Some(0)), original);
    }

    #[test]
    fn lockdown_denies_by_default() {
        let hardware = Arc::new(
            FakeHardware::builder()
                .lockdown("none [integrity] confidentiality")
                .build(),
        );

        let mut service = CpuTune::new(Arc::new(quiet_flags()));
        service.init(&Properties::new()).unwrap();

        let error = service.start(&Platform::fake(&hardware)).unwrap_err();
        assert!(matches!(error, StartError::NotPermitted { .. }));
    }
}
