//! End-to-end tests that drive the service through its lifecycle against simulated hardware.

use std::path::Path;
use std::sync::Arc;

use cpu_tune::fake::FakeHardware;
use cpu_tune::{
    CpuTune, HWP_ENABLE_BIT, IA32_MISC_ENABLE, IA32_PM_ENABLE, IA32_POWER_CTL, Lifecycle,
    MSR_TURBO_RATIO_LIMIT, Platform, Properties, StartError, TURBO_MODE_DISABLE_BIT,
    UNSUPPORTED_PLATFORM_FLAG,
};

const STATE_DIRECTORY: &str = "/var/lib/cpu_tune";

// Long enough that the timer never fires while a test runs, so every tick is explicit.
const QUIET_INTERVAL: &str = "updateInterval = 3600000\n";

fn started(hardware: &Arc<FakeHardware>, config: &str) -> CpuTune {
    let platform = Platform::fake(hardware);
    let mut service = CpuTune::with_state_directory(&platform, STATE_DIRECTORY);

    assert!(service.probe(&platform).is_match());

    let properties = Properties::from_toml_str(&format!("{QUIET_INTERVAL}{config}")).unwrap();
    service.init(&properties).unwrap();
    service.start(&platform).unwrap();

    service
}

fn turbo_disabled(hardware: &FakeHardware, processor: u32) -> bool {
    hardware.register(IA32_MISC_ENABLE, Some(processor)).unwrap() & TURBO_MODE_DISABLE_BIT != 0
}

#[test]
fn tunes_heals_drift_and_restores() {
    let hardware = Arc::new(FakeHardware::builder().processor_count(2).build());
    let original = hardware.register(IA32_MISC_ENABLE, Some(0)).unwrap();

    let mut service = started(
        &hardware,
        "enableIntelTurboBoost = false\nenableIntelProcHot = true\nenableIntelSpeedShift = false\n",
    );

    assert!(turbo_disabled(&hardware, 0));
    assert!(turbo_disabled(&hardware, 1));
    assert_eq!(hardware.write_count(), 2);

    // Something else on the system turns turbo back on for one processor.
    hardware.set_register(IA32_MISC_ENABLE, Some(1), original);

    let report = service.reconcile_now().unwrap();
    assert_eq!(report.writes(), 1);
    assert!(turbo_disabled(&hardware, 1));

    // Nothing has drifted, nothing is written.
    assert_eq!(service.reconcile_now().unwrap().writes(), 0);

    service.stop(&Platform::fake(&hardware));

    assert!(!service.is_running());
    assert_eq!(hardware.register(IA32_MISC_ENABLE, Some(0)), Some(original));
    assert_eq!(hardware.register(IA32_MISC_ENABLE, Some(1)), Some(original));
    assert!(service.reconcile_now().is_none());
}

#[test]
fn runtime_toggle_file_overrides_static_setting() {
    let toggle = Path::new("/run/cpu_tune/turbo");
    let hardware = Arc::new(FakeHardware::builder().processor_count(1).build());
    hardware.set_file(toggle, "0\n");

    let service = started(
        &hardware,
        "enableIntelTurboBoost = true\nturboBoostAtRuntime = \"/run/cpu_tune/turbo\"\n",
    );

    assert!(turbo_disabled(&hardware, 0));

    hardware.set_file(toggle, "1\n");
    service.reconcile_now().unwrap();
    assert!(!turbo_disabled(&hardware, 0));

    // Without the file, the static setting applies again.
    hardware.set_file(toggle, "0\n");
    service.reconcile_now().unwrap();
    hardware.delete_file(toggle);
    service.reconcile_now().unwrap();
    assert!(!turbo_disabled(&hardware, 0));
}

#[test]
fn proc_hot_follows_configuration() {
    let hardware = Arc::new(FakeHardware::builder().processor_count(2).build());
    let original = hardware.register(IA32_POWER_CTL, Some(0)).unwrap();

    let mut service = started(&hardware, "enableIntelProcHot = false\n");

    for processor in [0, 1] {
        assert_eq!(
            hardware.register(IA32_POWER_CTL, Some(processor)).unwrap() & 1,
            1
        );
    }

    service.free();

    assert_eq!(hardware.register(IA32_POWER_CTL, Some(1)), Some(original));
}

#[test]
fn hardware_pstates_stay_enabled_after_stop() {
    let hardware = Arc::new(FakeHardware::builder().hardware_pstate(true).build());

    let mut service = started(&hardware, "enableIntelSpeedShift = true\n");

    assert!(service.hardware_pstate_latched());
    assert_eq!(
        hardware.register(IA32_PM_ENABLE, None).unwrap() & HWP_ENABLE_BIT,
        HWP_ENABLE_BIT
    );

    service.stop(&Platform::fake(&hardware));

    assert_eq!(
        hardware.register(IA32_PM_ENABLE, None).unwrap() & HWP_ENABLE_BIT,
        HWP_ENABLE_BIT
    );
}

#[test]
fn turbo_ratio_limits_are_applied_and_restored() {
    let hardware = Arc::new(FakeHardware::builder().processor_count(4).build());
    let original = hardware.register(MSR_TURBO_RATIO_LIMIT, None).unwrap();

    let mut service = started(&hardware, "turboRatioLimits = [40, 38, 36, 34]\n");

    assert_eq!(
        hardware.register(MSR_TURBO_RATIO_LIMIT, None),
        Some(0x2224_2628)
    );

    service.stop(&Platform::fake(&hardware));

    assert_eq!(hardware.register(MSR_TURBO_RATIO_LIMIT, None), Some(original));
}

#[test]
fn unsupported_platform_flag_is_recorded_then_cleared() {
    let flag = Path::new(STATE_DIRECTORY).join(UNSUPPORTED_PLATFORM_FLAG);

    let other = Arc::new(FakeHardware::builder().vendor(*b"AuthenticAMD").build());
    let platform = Platform::fake(&other);
    let mut service = CpuTune::with_state_directory(&platform, STATE_DIRECTORY);

    assert!(!service.probe(&platform).is_match());
    assert!(other.file(&flag).is_some());
    assert_eq!(other.write_count(), 0);

    let intel = Arc::new(FakeHardware::builder().file(&flag, "").build());
    let platform = Platform::fake(&intel);
    let mut service = CpuTune::with_state_directory(&platform, STATE_DIRECTORY);

    assert!(service.probe(&platform).is_match());
    service.init(&Properties::new()).unwrap();

    assert!(intel.file(&flag).is_none());
}

#[test]
fn lockdown_prevents_start() {
    let hardware = Arc::new(
        FakeHardware::builder()
            .lockdown("none [integrity] confidentiality")
            .build(),
    );
    let platform = Platform::fake(&hardware);
    let mut service = CpuTune::with_state_directory(&platform, STATE_DIRECTORY);

    assert!(service.probe(&platform).is_match());
    service
        .init(&Properties::from_toml_str("enableIntelTurboBoost = false").unwrap())
        .unwrap();

    assert!(matches!(
        service.start(&platform),
        Err(StartError::NotPermitted { .. })
    ));
    assert!(!service.is_running());
    assert_eq!(hardware.write_count(), 0);
}
