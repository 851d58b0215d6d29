//! Register indices and bit layouts used by the tuning engine.
//!
//! The numeric indices come from the Intel Software Developer's Manual, Volume 4
//! (Model-Specific Registers). They must match the manual exactly.

use derive_more::Display;

use crate::ProcessorId;

/// Whether a register holds one value for the whole package or one value per logical processor.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the architecture only defines these two access scopes for our registers"
)]
pub enum RegisterScope {
    /// One value shared by every logical processor in the package.
    Package,

    /// An independent value per logical processor. Accesses must name the processor.
    Processor,
}

/// A model-specific register, identified by its architectural index.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{name}(0x{index:X})")]
pub struct Msr {
    index: u32,
    name: &'static str,
    scope: RegisterScope,
}

impl Msr {
    /// Defines a register. Only used for the constants below and by tests.
    #[must_use]
    pub const fn new(index: u32, name: &'static str, scope: RegisterScope) -> Self {
        Self { index, name, scope }
    }

    /// The architectural register index passed to `rdmsr`/`wrmsr`.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// The register name as spelled in the architecture manual.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the register is package-wide or per logical processor.
    #[must_use]
    pub const fn scope(&self) -> RegisterScope {
        self.scope
    }
}

/// Core and thread counts of the package. Bits [15:0] are decoded as the core count.
pub const MSR_CORE_THREAD_COUNT: Msr =
    Msr::new(0x35, "MSR_CORE_THREAD_COUNT", RegisterScope::Package);

/// Platform information, including whether the turbo ratio limits are programmable.
pub const MSR_PLATFORM_INFO: Msr = Msr::new(0xCE, "MSR_PLATFORM_INFO", RegisterScope::Package);

/// Miscellaneous feature enables. Bit 38 disables turbo mode.
pub const IA32_MISC_ENABLE: Msr =
    Msr::new(0x1A0, "IA32_MISC_ENABLE", RegisterScope::Processor);

/// Maximum turbo ratio per number of active cores, one byte per group.
pub const MSR_TURBO_RATIO_LIMIT: Msr =
    Msr::new(0x1AD, "MSR_TURBO_RATIO_LIMIT", RegisterScope::Package);

/// Power control. Bit 0 enables bi-directional PROCHOT.
pub const IA32_POWER_CTL: Msr = Msr::new(0x1FC, "IA32_POWER_CTL", RegisterScope::Processor);

/// Hardware-controlled performance state enable. Bit 0 can only be cleared by a processor reset.
pub const IA32_PM_ENABLE: Msr = Msr::new(0x770, "IA32_PM_ENABLE", RegisterScope::Package);

/// Hardware-controlled performance state request (min/max/desired/EPP fields).
pub const IA32_HWP_REQUEST: Msr = Msr::new(0x774, "IA32_HWP_REQUEST", RegisterScope::Processor);

/// Set to disable turbo mode in `IA32_MISC_ENABLE`.
pub const TURBO_MODE_DISABLE_BIT: u64 = 1 << 38;

/// Bi-directional PROCHOT in `IA32_POWER_CTL`.
pub const PROC_HOT_BIT: u64 = 1 << 0;

/// Hardware P-state enable in `IA32_PM_ENABLE`. Sticky once set.
pub const HWP_ENABLE_BIT: u64 = 1 << 0;

/// Set in `MSR_PLATFORM_INFO` when `MSR_TURBO_RATIO_LIMIT` is writable.
pub const TURBO_RATIO_LIMIT_WRITABLE_BIT: u64 = 1 << 28;

/// Mask of the core count field in `MSR_CORE_THREAD_COUNT`.
pub const CORE_COUNT_MASK: u64 = 0xFFFF;

/// One concrete place a value lives: a register, plus the logical processor for per-processor
/// registers.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RegisterSite {
    register: Msr,
    processor: Option<ProcessorId>,
}

impl RegisterSite {
    /// The site of a package-wide register.
    #[must_use]
    pub const fn package(register: Msr) -> Self {
        Self {
            register,
            processor: None,
        }
    }

    /// The site of a register on one logical processor.
    #[must_use]
    pub const fn on_processor(register: Msr, processor: ProcessorId) -> Self {
        Self {
            register,
            processor: Some(processor),
        }
    }

    /// Every site of `register` across `processors`: one per processor for per-processor
    /// registers, exactly one for package registers.
    #[must_use]
    pub fn all(register: Msr, processors: &[ProcessorId]) -> Vec<Self> {
        match register.scope() {
            RegisterScope::Package => vec![Self::package(register)],
            RegisterScope::Processor => processors
                .iter()
                .map(|p| Self::on_processor(register, *p))
                .collect(),
        }
    }

    /// The register at this site.
    #[must_use]
    pub const fn register(&self) -> Msr {
        self.register
    }

    /// The logical processor, for per-processor sites.
    #[must_use]
    pub const fn processor(&self) -> Option<ProcessorId> {
        self.processor
    }
}

impl std::fmt::Display for RegisterSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.processor {
            Some(processor) => write!(f, "{} on processor {processor}", self.register),
            None => write!(f, "{}", self.register),
        }
    }
}

/// Returns `value` with `mask` set or cleared, leaving every other bit untouched.
#[must_use]
pub const fn with_bits(value: u64, mask: u64, set: bool) -> u64 {
    if set { value | mask } else { value & !mask }
}
