//! Processor identity and tuning feature support.

use std::fmt;

use derive_more::Display;
use tracing::{info, warn};

use crate::pal::CpuidLeaf;
use crate::{
    CORE_COUNT_MASK, MSR_CORE_THREAD_COUNT, MSR_PLATFORM_INFO, RegisterAccess,
    TURBO_RATIO_LIMIT_WRITABLE_BIT,
};

const CPUID_VENDOR_LEAF: u32 = 0x0;
const CPUID_SIGNATURE_LEAF: u32 = 0x1;
const CPUID_THERMAL_POWER_LEAF: u32 = 0x6;

// CPUID.06H:EAX[7]
const CPUID_HWP_BIT: u32 = 1 << 7;

const GENUINE_INTEL: &[u8; 12] = b"GenuineIntel";

/// Processor vendor, as reported by CPUID leaf 0.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "only Intel processors are tuned, everything else is lumped together"
)]
pub enum CpuVendor {
    /// "GenuineIntel".
    #[display("Intel")]
    Intel,

    /// Any other vendor string.
    #[display("other")]
    Other,
}

/// Intel processor models as returned by CPUID.
///
/// Several marketing variants share one model number because they are register-compatible
/// silicon. Those are exposed as aliases (associated constants) of the same value, so for
/// example [`CpuModel::KABYLAKE_ULT`] is equal to [`CpuModel::Kabylake`].
///
/// Models not in this list decode as [`CpuModel::Unknown`]. That is not an error: the features
/// themselves are detected separately, the model is informational.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
#[non_exhaustive]
#[expect(missing_docs, reason = "variants are microarchitecture code names")]
pub enum CpuModel {
    Unknown = 0x00,
    Penryn = 0x17,
    Nehalem = 0x1A,
    /// Lynnfield, Clarksfield.
    Fields = 0x1E,
    /// Havendale, Auburndale.
    Dales = 0x1F,
    NehalemEx = 0x2E,
    /// Clarkdale, Arrandale.
    Dales32nm = 0x25,
    /// Gulftown, Westmere-EP/-WS.
    Westmere = 0x2C,
    WestmereEx = 0x2F,
    SandyBridge = 0x2A,
    Jaketown = 0x2D,
    IvyBridge = 0x3A,
    IvyBridgeEp = 0x3E,
    Crystalwell = 0x46,
    Haswell = 0x3C,
    HaswellEp = 0x3F,
    HaswellUlt = 0x45,
    Broadwell = 0x3D,
    Brystalwell = 0x47,
    Skylake = 0x4E,
    SkylakeDt = 0x5E,
    SkylakeW = 0x55,
    Kabylake = 0x8E,
    KabylakeDt = 0x9E,
    Cannonlake = 0x66,
    IcelakeY = 0x7D,
    IcelakeU = 0x7E,
    /// Desktop Comet Lake.
    CometlakeS = 0x9F,
    /// Also sold as 10th generation Amber Lake Y.
    CometlakeY = 0xA5,
    CometlakeU = 0xA6,
    /// Desktop Rocket Lake.
    RocketlakeS = 0xA7,
    /// Desktop Alder Lake.
    AlderlakeS = 0x97,
    /// Desktop Raptor Lake.
    RaptorlakeS = 0xBF,
}

#[expect(missing_docs, reason = "aliases are self-describing")]
impl CpuModel {
    pub const BROADWELL_ULX: Self = Self::Broadwell;
    pub const BROADWELL_ULT: Self = Self::Broadwell;
    pub const SKYLAKE_ULT: Self = Self::Skylake;
    pub const SKYLAKE_ULX: Self = Self::Skylake;
    pub const KABYLAKE_ULT: Self = Self::Kabylake;
    pub const KABYLAKE_ULX: Self = Self::Kabylake;
}

impl CpuModel {
    const KNOWN: [Self; 32] = [
        Self::Penryn,
        Self::Nehalem,
        Self::Fields,
        Self::Dales,
        Self::NehalemEx,
        Self::Dales32nm,
        Self::Westmere,
        Self::WestmereEx,
        Self::SandyBridge,
        Self::Jaketown,
        Self::IvyBridge,
        Self::IvyBridgeEp,
        Self::Crystalwell,
        Self::Haswell,
        Self::HaswellEp,
        Self::HaswellUlt,
        Self::Broadwell,
        Self::Brystalwell,
        Self::Skylake,
        Self::SkylakeDt,
        Self::SkylakeW,
        Self::Kabylake,
        Self::KabylakeDt,
        Self::Cannonlake,
        Self::IcelakeY,
        Self::IcelakeU,
        Self::CometlakeS,
        Self::CometlakeY,
        Self::CometlakeU,
        Self::RocketlakeS,
        Self::AlderlakeS,
        Self::RaptorlakeS,
    ];

    /// Maps a raw (extended) model number to the known model, or [`CpuModel::Unknown`].
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|model| model.raw() == raw)
            .unwrap_or(Self::Unknown)
    }

    /// The raw model number.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (0x{:02X})", self.raw())
    }
}

/// Decodes the model number from the CPUID leaf 1 signature, applying the extended model field
/// for families 0x6 and 0xF.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "model is assembled from two 4-bit fields"
)]
pub(crate) const fn decode_model_number(signature: u32) -> u8 {
    let family = (signature >> 8) & 0xF;
    let base_model = (signature >> 4) & 0xF;
    let extended_model = (signature >> 16) & 0xF;

    let model = if family == 0x6 || family == 0xF {
        base_model | (extended_model << 4)
    } else {
        base_model
    };

    model as u8
}

fn decode_vendor(leaf: CpuidLeaf) -> CpuVendor {
    // The vendor string is spread over EBX, EDX, ECX in that order.
    let vendor: Vec<u8> = [leaf.ebx, leaf.edx, leaf.ecx]
        .into_iter()
        .flat_map(u32::to_le_bytes)
        .collect();

    if vendor.as_slice() == GENUINE_INTEL.as_slice() {
        CpuVendor::Intel
    } else {
        CpuVendor::Other
    }
}

/// What the processor is and which tuning features it supports.
///
/// Computed once per tuning session, before any register is written, and never changed
/// afterwards. Detection itself never fails: each field that cannot be determined falls back to
/// its "unsupported" value on its own.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CpuCapabilities {
    vendor: CpuVendor,
    model: CpuModel,
    supports_hardware_pstate: bool,
    core_count: u16,
    turbo_ratio_limit_writable: bool,
}

impl CpuCapabilities {
    /// Detects the capabilities of the processor behind `access`.
    ///
    /// This is a pure function of the CPUID and register values it reads.
    #[must_use]
    pub fn detect(access: &RegisterAccess) -> Self {
        let vendor_leaf = access.cpuid(CPUID_VENDOR_LEAF, 0);
        let vendor = decode_vendor(vendor_leaf);
        let max_leaf = vendor_leaf.eax;

        let model = if max_leaf >= CPUID_SIGNATURE_LEAF {
            CpuModel::from_raw(decode_model_number(
                access.cpuid(CPUID_SIGNATURE_LEAF, 0).eax,
            ))
        } else {
            CpuModel::Unknown
        };

        let supports_hardware_pstate = max_leaf >= CPUID_THERMAL_POWER_LEAF
            && access.cpuid(CPUID_THERMAL_POWER_LEAF, 0).eax & CPUID_HWP_BIT != 0;

        let core_count = match access.read(MSR_CORE_THREAD_COUNT, None) {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "masked to the 16-bit core count field"
            )]
            Ok(value) => (value & CORE_COUNT_MASK) as u16,
            Err(e) => {
                warn!(error = %e, "core count unavailable");
                0
            }
        };

        let turbo_ratio_limit_writable = match access.read(MSR_PLATFORM_INFO, None) {
            Ok(value) => value & TURBO_RATIO_LIMIT_WRITABLE_BIT != 0,
            Err(e) => {
                warn!(error = %e, "turbo ratio limit permission unavailable, assuming read-only");
                false
            }
        };

        let capabilities = Self {
            vendor,
            model,
            supports_hardware_pstate,
            core_count,
            turbo_ratio_limit_writable,
        };

        info!(
            vendor = %capabilities.vendor,
            model = %capabilities.model,
            hwp = if supports_hardware_pstate { "supported" } else { "unsupported" },
            cores = core_count,
            turbo_ratio_limit = if turbo_ratio_limit_writable { "RW" } else { "RO" },
            "detected processor capabilities"
        );

        capabilities
    }

    /// The processor vendor.
    #[must_use]
    pub const fn vendor(&self) -> CpuVendor {
        self.vendor
    }

    /// The processor model.
    #[must_use]
    pub const fn model(&self) -> CpuModel {
        self.model
    }

    /// Whether hardware-managed performance states (Intel Speed Shift) are supported.
    #[must_use]
    pub const fn supports_hardware_pstate(&self) -> bool {
        self.supports_hardware_pstate
    }

    /// Number of physical cores, or 0 if unknown.
    #[must_use]
    pub const fn core_count(&self) -> u16 {
        self.core_count
    }

    /// Whether the turbo ratio limit register is writable on this processor.
    #[must_use]
    pub const fn turbo_ratio_limit_writable(&self) -> bool {
        self.turbo_ratio_limit_writable
    }
}

impl fmt::Display for CpuCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vendor:            {}", self.vendor)?;
        writeln!(f, "model:             {}", self.model)?;
        writeln!(
            f,
            "hardware P-state:  {}",
            if self.supports_hardware_pstate { "supported" } else { "unsupported" }
        )?;
        writeln!(f, "cores:             {}", self.core_count)?;
        write!(
            f,
            "turbo ratio limit: {}",
            if self.turbo_ratio_limit_writable { "RW" } else { "RO" }
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use mockall::predicate::eq;

    use super::*;
    use crate::fake::FakeHardware;
    use crate::pal::{BindingsFacade, FilesystemFacade, MockBindings, MsrFacade};
    use crate::{IA32_MISC_ENABLE, Platform};

    fn detect(hardware: FakeHardware) -> CpuCapabilities {
        let platform = Platform::fake(&Arc::new(hardware));
        CpuCapabilities::detect(&RegisterAccess::new(&platform))
    }

    #[test]
    fn extended_model_formula() {
        // Kaby Lake mobile: family 6, model 0xE, extended model 0x8, stepping 9.
        assert_eq!(decode_model_number(0x0008_06E9), 0x8E);
        // Raptor Lake desktop: family 6, model 0x7, extended model 0xB, stepping 1.
        assert_eq!(decode_model_number(0x000B_0671), 0xB7);
        // Family 0xF also uses the extended model.
        assert_eq!(decode_model_number(0x0002_0F32), 0x23);
        // Other families ignore it.
        assert_eq!(decode_model_number(0x0003_0521), 0x2);
    }

    #[test]
    fn aliases_share_one_value() {
        assert_eq!(CpuModel::KABYLAKE_ULT, CpuModel::Kabylake);
        assert_eq!(CpuModel::KABYLAKE_ULX, CpuModel::Kabylake);
        assert_eq!(CpuModel::SKYLAKE_ULX, CpuModel::Skylake);
        assert_eq!(CpuModel::BROADWELL_ULT, CpuModel::Broadwell);
        assert_eq!(CpuModel::from_raw(0x8E), CpuModel::KABYLAKE_ULX);
    }

    #[test]
    fn unknown_model_is_not_fatal() {
        assert_eq!(CpuModel::from_raw(0x01), CpuModel::Unknown);
        assert_eq!(CpuModel::from_raw(0xFF), CpuModel::Unknown);
        assert_eq!(CpuModel::from_raw(0xBF), CpuModel::RaptorlakeS);
    }

    #[test]
    fn display_model() {
        assert_eq!(CpuModel::Kabylake.to_string(), "Kabylake (0x8E)");
    }

    #[test]
    fn detects_kabylake() {
        let capabilities = detect(FakeHardware::builder().build());

        assert_eq!(capabilities.vendor(), CpuVendor::Intel);
        assert_eq!(capabilities.model(), CpuModel::Kabylake);
        assert!(capabilities.supports_hardware_pstate());
        assert_eq!(capabilities.core_count(), 4);
        assert!(capabilities.turbo_ratio_limit_writable());
    }

    #[test]
    fn detection_is_deterministic() {
        let hardware = Arc::new(
            FakeHardware::builder()
                .model(0x9E)
                .register(MSR_PLATFORM_INFO, 0)
                .build(),
        );
        let access = RegisterAccess::new(&Platform::fake(&hardware));

        let first = CpuCapabilities::detect(&access);
        let second = CpuCapabilities::detect(&access);

        assert_eq!(first, second);
        assert_eq!(first.model(), CpuModel::KabylakeDt);
        assert!(!first.turbo_ratio_limit_writable());
    }

    #[test]
    fn read_failures_degrade_single_fields() {
        let capabilities = detect(
            FakeHardware::builder()
                .fault_on(MSR_CORE_THREAD_COUNT)
                .fault_on(MSR_PLATFORM_INFO)
                .build(),
        );

        assert_eq!(capabilities.model(), CpuModel::Kabylake);
        assert!(capabilities.supports_hardware_pstate());
        assert_eq!(capabilities.core_count(), 0);
        assert!(!capabilities.turbo_ratio_limit_writable());
    }

    #[test]
    fn no_hwp_before_skylake() {
        let capabilities = detect(
            FakeHardware::builder()
                .model(0x3C)
                .hardware_pstate(false)
                .build(),
        );

        assert_eq!(capabilities.model(), CpuModel::Haswell);
        assert!(!capabilities.supports_hardware_pstate());
    }

    #[test]
    fn leaves_above_maximum_are_not_queried() {
        let mut bindings = MockBindings::new();
        bindings
            .expect_cpuid()
            .with(eq(CPUID_VENDOR_LEAF), eq(0))
            .times(1)
            .returning(|_, _| CpuidLeaf {
                eax: 0,
                ..CpuidLeaf::default()
            });

        let hardware = Arc::new(FakeHardware::builder().build());
        let platform = Platform::from_facades(
            MsrFacade::Fake(Arc::clone(&hardware)),
            BindingsFacade::from_mock(bindings),
            FilesystemFacade::Fake(hardware),
        );

        let capabilities = CpuCapabilities::detect(&RegisterAccess::new(&platform));

        assert_eq!(capabilities.vendor(), CpuVendor::Other);
        assert_eq!(capabilities.model(), CpuModel::Unknown);
        assert!(!capabilities.supports_hardware_pstate());
        assert_eq!(capabilities.core_count(), 4);
    }

    #[test]
    fn other_vendor() {
        let capabilities = detect(FakeHardware::builder().vendor(*b"AuthenticAMD").build());

        assert_eq!(capabilities.vendor(), CpuVendor::Other);
    }

    #[test]
    fn unrelated_registers_do_not_matter() {
        let a = detect(FakeHardware::builder().register(IA32_MISC_ENABLE, 0).build());
        let b = detect(
            FakeHardware::builder()
                .register(IA32_MISC_ENABLE, u64::MAX)
                .build(),
        );

        assert_eq!(a, b);
    }
}
