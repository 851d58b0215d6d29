//! Builder for configuring fake hardware.

use std::path::PathBuf;

use crate::fake::FakeHardware;
use crate::{Msr, ProcessorId};

/// A register value requested by the builder user, applied on top of the defaults.
#[derive(Clone, Copy, Debug)]
pub(super) enum RegisterOverride {
    /// Every site of the register holds this value.
    All(Msr, u64),

    /// One processor's copy of a per-processor register holds this value.
    On(Msr, ProcessorId, u64),

    /// The register does not exist on this silicon. Any access faults.
    Absent(Msr),
}

/// Builder for configuring [`FakeHardware`].
///
/// The defaults describe a 4-core Kaby Lake mobile processor (model 0x8E) with hardware P-states
/// supported but not yet enabled, turbo boost enabled, bi-directional PROCHOT disabled and a
/// writable turbo ratio limit. Kernel lockdown is not active and there are no files.
///
/// # Example
///
/// ```
/// use cpu_tune::fake::FakeHardware;
/// use cpu_tune::{IA32_MISC_ENABLE, TURBO_MODE_DISABLE_BIT};
///
/// let hardware = FakeHardware::builder()
///     .processor_count(2)
///     .register(IA32_MISC_ENABLE, TURBO_MODE_DISABLE_BIT)
///     .lockdown("[none] integrity confidentiality")
///     .build();
///
/// assert_eq!(
///     hardware.register(IA32_MISC_ENABLE, Some(1)),
///     Some(TURBO_MODE_DISABLE_BIT)
/// );
/// ```
#[derive(Clone, Debug)]
pub struct FakeHardwareBuilder {
    pub(super) processors: Vec<ProcessorId>,
    pub(super) publish_online_list: bool,
    pub(super) vendor: [u8; 12],
    pub(super) model: u8,
    pub(super) hardware_pstate: bool,
    pub(super) registers: Vec<RegisterOverride>,
    pub(super) faults: Vec<Msr>,
    pub(super) write_faults: Vec<Msr>,
    pub(super) files: Vec<(PathBuf, Vec<u8>)>,
    pub(super) lockdown: Option<String>,
}

impl Default for FakeHardwareBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHardwareBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processors: vec![0, 1, 2, 3],
            publish_online_list: true,
            vendor: *b"GenuineIntel",
            model: 0x8E,
            hardware_pstate: true,
            registers: Vec::new(),
            faults: Vec::new(),
            write_faults: Vec::new(),
            files: Vec::new(),
            lockdown: None,
        }
    }

    /// Sets the number of online logical processors, numbered from 0.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    #[must_use]
    pub fn processor_count(mut self, count: u32) -> Self {
        assert!(count > 0, "at least one processor must be configured");

        self.processors = (0..count).collect();
        self
    }

    /// Sets the exact IDs of the online logical processors. Gaps are allowed.
    ///
    /// # Panics
    ///
    /// Panics if `processors` is empty.
    #[must_use]
    pub fn processors(mut self, processors: impl IntoIterator<Item = ProcessorId>) -> Self {
        let mut processors = processors.into_iter().collect::<Vec<_>>();
        processors.sort_unstable();
        processors.dedup();

        assert!(
            !processors.is_empty(),
            "at least one processor must be configured"
        );

        self.processors = processors;
        self
    }

    /// Hides the list of online processors, as on a kernel without sysfs.
    #[must_use]
    pub fn without_online_list(mut self) -> Self {
        self.publish_online_list = false;
        self
    }

    /// Sets the 12-byte CPUID vendor string.
    #[must_use]
    pub fn vendor(mut self, vendor: [u8; 12]) -> Self {
        self.vendor = vendor;
        self
    }

    /// Sets the (extended) model number reported through CPUID leaf 1. The family is always 6.
    #[must_use]
    pub fn model(mut self, model: u8) -> Self {
        self.model = model;
        self
    }

    /// Sets whether hardware P-states are supported.
    ///
    /// Without support, CPUID does not advertise the feature and the hardware P-state registers
    /// do not exist.
    #[must_use]
    pub fn hardware_pstate(mut self, supported: bool) -> Self {
        self.hardware_pstate = supported;
        self
    }

    /// Sets the initial value of every site of `register`.
    #[must_use]
    pub fn register(mut self, register: Msr, value: u64) -> Self {
        self.registers.push(RegisterOverride::All(register, value));
        self
    }

    /// Sets the initial value of a per-processor register on one processor.
    #[must_use]
    pub fn register_on(mut self, register: Msr, processor: ProcessorId, value: u64) -> Self {
        self.registers
            .push(RegisterOverride::On(register, processor, value));
        self
    }

    /// Removes `register`. Reads and writes of it fault.
    #[must_use]
    pub fn absent(mut self, register: Msr) -> Self {
        self.registers.push(RegisterOverride::Absent(register));
        self
    }

    /// Makes every read and write of `register` fault, even though it holds a value.
    #[must_use]
    pub fn fault_on(mut self, register: Msr) -> Self {
        self.faults.push(register);
        self
    }

    /// Makes every write of `register` fault. Reads still succeed.
    #[must_use]
    pub fn fault_on_write(mut self, register: Msr) -> Self {
        self.write_faults.push(register);
        self
    }

    /// Creates a file with the given contents.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }

    /// Sets the contents of the kernel lockdown file, for example
    /// `"none [integrity] confidentiality"`.
    #[must_use]
    pub fn lockdown(mut self, contents: impl Into<String>) -> Self {
        self.lockdown = Some(contents.into());
        self
    }

    /// Creates the fake hardware.
    #[must_use]
    pub fn build(self) -> FakeHardware {
        FakeHardware::from_builder(self)
    }
}
