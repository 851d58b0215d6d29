//! The reconciliation engine: enforces the tuning policy on every tick and puts the original
//! register values back when the session ends.
//!
//! # Session
//!
//! A session walks through these states, in order:
//!
//! 1. [`SessionState::Uninitialized`] after [`TuningEngine::new()`].
//! 2. [`SessionState::CapabilitiesDetected`] after [`TuningEngine::detect_capabilities()`].
//! 3. [`SessionState::OriginalsCaptured`] after [`TuningEngine::capture_originals()`].
//! 4. [`SessionState::Running`] after the first [`TuningEngine::tick()`].
//! 5. [`SessionState::Stopped`] after [`TuningEngine::stop()`].
//!
//! # Writes
//!
//! The engine only writes a register when its live value differs from the desired one, and only
//! the bits that belong to a feature are changed. Under a static policy the first tick makes every
//! write that is needed and later ticks write nothing, unless an external agent changed a
//! register in the meantime.
//!
//! Apart from the hardware P-state enable bit, which cannot be cleared, every site the engine
//! writes is in the session's [`RegisterSnapshot`] and is restored on stop.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    CpuCapabilities, Feature, HWP_ENABLE_BIT, IA32_HWP_REQUEST, IA32_MISC_ENABLE, IA32_PM_ENABLE,
    IA32_POWER_CTL, InvalidFile, MSR_TURBO_RATIO_LIMIT, PROC_HOT_BIT, Platform, ProcessorId,
    RegisterAccess, RegisterError, RegisterSite, RegisterSnapshot, RestoreReport,
    TURBO_MODE_DISABLE_BIT, TuningConfig, TuningPolicy, with_bits,
};

/// Where a tuning session is in its lifetime.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the session lifetime is fixed"
)]
pub enum SessionState {
    /// Nothing has been read from the processor yet.
    Uninitialized,

    /// Processor capabilities are known.
    CapabilitiesDetected,

    /// Original register values are captured. Nothing has been written yet.
    OriginalsCaptured,

    /// At least one tick has run.
    Running,

    /// Originals have been restored. The engine does nothing more.
    Stopped,
}

/// What one reconciliation tick did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TickReport {
    changed: Vec<RegisterSite>,
    faults: usize,
}

impl TickReport {
    /// Sites that were written because they had drifted from the policy.
    #[must_use]
    pub fn changed(&self) -> &[RegisterSite] {
        &self.changed
    }

    /// Number of writes made.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.changed.len()
    }

    /// Number of register accesses that faulted and were skipped.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.faults
    }

    fn record(&mut self, site: RegisterSite, result: Result<bool, RegisterError>) -> bool {
        match result {
            Ok(true) => {
                self.changed.push(site);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(error = %e, "HardwareFault: skipping until the next tick");
                self.faults = self.faults.saturating_add(1);
                false
            }
        }
    }
}

/// Owns one tuning session on one platform.
#[derive(Debug)]
pub struct TuningEngine {
    platform: Platform,
    access: RegisterAccess,
    config: TuningConfig,
    processors: Vec<ProcessorId>,
    capabilities: Option<CpuCapabilities>,
    snapshot: RegisterSnapshot,
    hardware_pstate_latched: bool,
    reported_absent: BTreeSet<Feature>,
    reported_invalid: BTreeSet<InvalidFile>,
    reported_sticky: bool,
    state: SessionState,
}

impl TuningEngine {
    /// Creates an engine for a new session. Nothing is read or written yet.
    #[must_use]
    pub fn new(platform: &Platform, config: TuningConfig) -> Self {
        Self {
            platform: platform.clone(),
            access: RegisterAccess::new(platform),
            config,
            processors: platform.online_processors().into_iter().collect(),
            capabilities: None,
            snapshot: RegisterSnapshot::default(),
            hardware_pstate_latched: false,
            reported_absent: BTreeSet::new(),
            reported_invalid: BTreeSet::new(),
            reported_sticky: false,
            state: SessionState::Uninitialized,
        }
    }

    /// Detects the processor capabilities. Only the first call reads anything; the result is
    /// fixed for the rest of the session.
    pub fn detect_capabilities(&mut self) -> CpuCapabilities {
        if let Some(capabilities) = self.capabilities {
            return capabilities;
        }

        let capabilities = CpuCapabilities::detect(&self.access);
        self.capabilities = Some(capabilities);
        self.state = SessionState::CapabilitiesDetected;

        capabilities
    }

    /// Captures the original value of every site the session may write. Detects capabilities
    /// first if that has not happened yet. Only the first call captures anything.
    pub fn capture_originals(&mut self) {
        if self.state != SessionState::Uninitialized
            && self.state != SessionState::CapabilitiesDetected
        {
            return;
        }

        let capabilities = self.detect_capabilities();

        // Hardware P-state enable is sticky, so it is never restored. Finding it already set
        // also means the request register can be read right away.
        if capabilities.supports_hardware_pstate()
            && self
                .access
                .read(IA32_PM_ENABLE, None)
                .is_ok_and(|value| value & HWP_ENABLE_BIT != 0)
        {
            info!("hardware P-states were already enabled before this session");
            self.hardware_pstate_latched = true;
        }

        self.snapshot = RegisterSnapshot::capture(&self.access, self.tunable_sites(&capabilities));
        self.state = SessionState::OriginalsCaptured;

        debug!(sites = self.snapshot.len(), "captured original register values");
    }

    /// Runs one reconciliation tick: resolves the current policy and corrects every register
    /// that has drifted from it.
    ///
    /// Sites whose original value could not be captured so far are retried first, so a register
    /// that faulted at capture time is tuned from the first tick on which it can be read.
    ///
    /// Does nothing before originals are captured or after the session stopped.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let Some(capabilities) = self.capabilities else {
            return report;
        };

        match self.state {
            SessionState::OriginalsCaptured => self.state = SessionState::Running,
            SessionState::Running => {}
            SessionState::Uninitialized
            | SessionState::CapabilitiesDetected
            | SessionState::Stopped => return report,
        }

        // Nothing uncaptured has ever been written, so what is read now is still the original.
        let sites = self.tunable_sites(&capabilities);
        self.snapshot.capture_missing(&self.access, sites);

        let policy = TuningPolicy::resolve(&self.config, &capabilities, &self.platform);
        self.report_absent_capabilities(&policy);
        self.report_invalid_files(&policy);

        self.reconcile_turbo_boost(&policy, &mut report);
        self.reconcile_turbo_ratio_limit(&policy, &mut report);
        self.reconcile_proc_hot(&policy, &mut report);
        self.reconcile_hardware_pstate(&policy, &mut report);
        self.reconcile_hwp_request(&policy, &mut report);

        if report.writes() > 0 {
            debug!(writes = report.writes(), faults = report.faults(), "reconciled");
        }

        report
    }

    /// Restores every captured register and ends the session.
    ///
    /// Returns `None` if the session had already stopped.
    pub fn stop(&mut self) -> Option<RestoreReport> {
        if self.state == SessionState::Stopped {
            return None;
        }

        let report = self.snapshot.restore(&self.access);
        self.state = SessionState::Stopped;

        info!(
            restored = report.restored(),
            unchanged = report.unchanged(),
            failed = report.failed().len(),
            "restored original register values"
        );

        Some(report)
    }

    /// Where the session is in its lifetime.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The detected capabilities, once detected.
    #[must_use]
    pub fn capabilities(&self) -> Option<CpuCapabilities> {
        self.capabilities
    }

    /// The captured original values.
    #[must_use]
    pub fn snapshot(&self) -> &RegisterSnapshot {
        &self.snapshot
    }

    /// Whether hardware P-states have been enabled during this session, by us or before us.
    #[must_use]
    pub fn hardware_pstate_latched(&self) -> bool {
        self.hardware_pstate_latched
    }

    /// The poll interval the session was configured with.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    // Once per distinct content, so a file left broken does not flood the log every tick.
    fn report_invalid_files(&mut self, policy: &TuningPolicy) {
        for file in policy.invalid_files() {
            if self.reported_invalid.insert(file.clone()) {
                warn!(
                    path = %file.path().display(),
                    contents = file.contents(),
                    "ConfigInvalid: not a valid hexadecimal constant, ignoring"
                );
            }
        }
    }

    fn tunable_sites(&self, capabilities: &CpuCapabilities) -> Vec<RegisterSite> {
        let mut sites = Vec::new();
        sites.extend(RegisterSite::all(IA32_MISC_ENABLE, &self.processors));
        sites.extend(RegisterSite::all(IA32_POWER_CTL, &self.processors));

        if capabilities.turbo_ratio_limit_writable() {
            sites.push(RegisterSite::package(MSR_TURBO_RATIO_LIMIT));
        }

        // The request register only becomes accessible once hardware P-states are enabled.
        if capabilities.supports_hardware_pstate()
            && self.hardware_pstate_latched
            && self.config.hwp_request_path().is_some()
        {
            sites.extend(RegisterSite::all(IA32_HWP_REQUEST, &self.processors));
        }

        sites
    }

    fn report_absent_capabilities(&mut self, policy: &TuningPolicy) {
        for feature in policy.downgraded() {
            if self.reported_absent.insert(*feature) {
                info!(
                    %feature,
                    "CapabilityAbsent: not supported by this processor, ignoring for this session"
                );
            }
        }
    }

    // Every tuned site must be in the snapshot.
    fn modify(
        &self,
        site: RegisterSite,
        report: &mut TickReport,
        desired: impl FnOnce(u64) -> u64,
    ) -> bool {
        if !self.snapshot.contains(site) {
            return false;
        }

        report.record(site, self.access.modify_site(site, desired))
    }

    fn reconcile_turbo_boost(&self, policy: &TuningPolicy, report: &mut TickReport) {
        let disable = !policy.turbo_boost_enabled();

        for site in RegisterSite::all(IA32_MISC_ENABLE, &self.processors) {
            if self.modify(site, report, |value| {
                with_bits(value, TURBO_MODE_DISABLE_BIT, disable)
            }) {
                info!(%site, enabled = !disable, "corrected turbo boost");
            }
        }
    }

    fn reconcile_turbo_ratio_limit(&self, policy: &TuningPolicy, report: &mut TickReport) {
        let Some(limits) = policy.turbo_ratio_limits() else {
            return;
        };

        // Only meaningful while turbo is actually on.
        let Some(first) = self.processors.first() else {
            return;
        };
        match self.access.read(IA32_MISC_ENABLE, Some(*first)) {
            Ok(value) if value & TURBO_MODE_DISABLE_BIT == 0 => {}
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "HardwareFault: skipping until the next tick");
                report.faults = report.faults.saturating_add(1);
                return;
            }
        }

        let site = RegisterSite::package(MSR_TURBO_RATIO_LIMIT);
        if self.modify(site, report, |_| limits.raw()) {
            info!(%limits, "changed turbo ratio limit");
        }
    }

    fn reconcile_proc_hot(&self, policy: &TuningPolicy, report: &mut TickReport) {
        let disable = !policy.proc_hot_enabled();

        for site in RegisterSite::all(IA32_POWER_CTL, &self.processors) {
            if self.modify(site, report, |value| with_bits(value, PROC_HOT_BIT, disable)) {
                info!(%site, enabled = !disable, "corrected PROCHOT");
            }
        }
    }

    fn reconcile_hardware_pstate(&mut self, policy: &TuningPolicy, report: &mut TickReport) {
        let Some(requested) = policy.hardware_pstate_enabled() else {
            return;
        };

        if !self.hardware_pstate_latched {
            let site = RegisterSite::package(IA32_PM_ENABLE);

            let current = match self.access.read_site(site) {
                Ok(value) => value,
                Err(e) => {
                    report.record(site, Err(e));
                    return;
                }
            };

            if current & HWP_ENABLE_BIT != 0 {
                info!("hardware P-states found enabled");
                self.latch_hardware_pstate();
            } else if requested {
                let result = self.access.modify_site(site, |value| value | HWP_ENABLE_BIT);

                if report.record(site, result) {
                    info!("enabled hardware P-states");
                    self.latch_hardware_pstate();
                }
            }
        }

        if !requested && self.hardware_pstate_latched && !self.reported_sticky {
            info!("hardware P-states cannot be disabled until the processor is reset, ignoring");
            self.reported_sticky = true;
        }
    }

    fn latch_hardware_pstate(&mut self) {
        self.hardware_pstate_latched = true;

        if let Some(capabilities) = self.capabilities {
            let sites = self.tunable_sites(&capabilities);
            self.snapshot.capture_missing(&self.access, sites);
        }
    }

    fn reconcile_hwp_request(&self, policy: &TuningPolicy, report: &mut TickReport) {
        let Some(request) = policy.hwp_request() else {
            return;
        };

        if !self.hardware_pstate_latched {
            return;
        }

        for site in RegisterSite::all(IA32_HWP_REQUEST, &self.processors) {
            if self.modify(site, report, |_| request) {
                info!(
                    %site,
                    request = format_args!("0x{request:X}"),
                    "changed hardware P-state request"
                );
            }
        }
    }
}
