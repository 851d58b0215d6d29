//! Resolution of configuration into the register state the engine enforces.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::Display;

use crate::pal::Filesystem;
use crate::{CpuCapabilities, Platform, TuningConfig};

/// Maximum number of bytes of a hardware P-state request file that are considered.
const HWP_REQUEST_FILE_MAX_LEN: usize = 10;

/// A tuning feature, for log messages and capability downgrade reporting.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Feature {
    /// Intel Turbo Boost.
    #[display("turbo boost")]
    TurboBoost,

    /// Bi-directional PROCHOT.
    #[display("PROCHOT")]
    ProcHot,

    /// Hardware-managed performance states (Intel Speed Shift).
    #[display("hardware P-states")]
    HardwarePstate,

    /// Programmable turbo ratio limits.
    #[display("turbo ratio limit")]
    TurboRatioLimit,

    /// Hardware P-state request override.
    #[display("hardware P-state request")]
    HwpRequest,
}

/// Maximum turbo ratio per number of active cores, packed one byte per core group as the
/// turbo ratio limit register expects: byte 0 applies with 1 active core, byte 1 with 2, and so on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TurboRatioLimits(u64);

impl TurboRatioLimits {
    /// Packs up to 8 ratios, lowest active-core count first.
    ///
    /// Returns `None` if there are no ratios, more than 8, or any ratio is zero.
    #[must_use]
    pub fn from_ratios(ratios: &[u8]) -> Option<Self> {
        if ratios.is_empty() || ratios.len() > 8 || ratios.contains(&0) {
            return None;
        }

        let packed = ratios
            .iter()
            .rev()
            .fold(0_u64, |packed, ratio| (packed << 8) | u64::from(*ratio));

        Some(Self(packed))
    }

    /// Uses a raw register value as-is.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw register value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurboRatioLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Parses a hexadecimal constant with an optional `0x`/`0X` prefix, ignoring surrounding
/// whitespace and trailing NUL bytes.
#[must_use]
pub fn parse_hex(text: &str) -> Option<u64> {
    let text = text.trim_end_matches('\0').trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    u64::from_str_radix(digits, 16).ok()
}

/// A configuration file whose contents are not a valid hexadecimal constant.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InvalidFile {
    path: PathBuf,
    contents: String,
}

impl InvalidFile {
    /// The file that was read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the file held, trimmed.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.contents
    }
}

/// The desired register state for one reconciliation tick.
///
/// Resolved from [`TuningConfig`] on every tick so that runtime toggle files take effect without
/// a restart, and gated by [`CpuCapabilities`]: a feature the processor lacks is downgraded to a
/// no-op and listed in [`downgraded()`][Self::downgraded].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TuningPolicy {
    turbo_boost_enabled: bool,
    proc_hot_enabled: bool,
    hardware_pstate_enabled: Option<bool>,
    poll_interval: Duration,
    turbo_ratio_limits: Option<TurboRatioLimits>,
    hwp_request: Option<u64>,
    downgraded: Vec<Feature>,
    invalid_files: Vec<InvalidFile>,
}

impl TuningPolicy {
    /// Resolves the policy for the current tick.
    ///
    /// Runtime toggle files that exist override the static switches. Files that are missing or
    /// empty leave the static switch in effect.
    #[must_use]
    pub fn resolve(
        config: &TuningConfig,
        capabilities: &CpuCapabilities,
        platform: &Platform,
    ) -> Self {
        let filesystem = platform.filesystem();
        let mut downgraded = Vec::new();
        let mut invalid_files = Vec::new();

        let turbo_boost_enabled = runtime_switch(filesystem, config.turbo_boost_path())
            .unwrap_or_else(|| config.turbo_boost());
        let proc_hot_enabled = runtime_switch(filesystem, config.proc_hot_path())
            .unwrap_or_else(|| config.proc_hot());
        let speed_shift_requested = runtime_switch(filesystem, config.speed_shift_path())
            .unwrap_or_else(|| config.speed_shift());

        let hardware_pstate_enabled = if capabilities.supports_hardware_pstate() {
            Some(speed_shift_requested)
        } else {
            if speed_shift_requested {
                downgraded.push(Feature::HardwarePstate);
            }
            None
        };

        let requested_limits =
            turbo_ratio_limits(config, capabilities, filesystem, &mut invalid_files);
        let turbo_ratio_limits = if capabilities.turbo_ratio_limit_writable() {
            requested_limits
        } else {
            if requested_limits.is_some() {
                downgraded.push(Feature::TurboRatioLimit);
            }
            None
        };

        let requested_hwp_request = config
            .hwp_request_path()
            .and_then(|path| {
                hex_file(filesystem, path, HWP_REQUEST_FILE_MAX_LEN, &mut invalid_files)
            });
        let hwp_request = if capabilities.supports_hardware_pstate() {
            requested_hwp_request
        } else {
            if requested_hwp_request.is_some() {
                downgraded.push(Feature::HwpRequest);
            }
            None
        };

        Self {
            turbo_boost_enabled,
            proc_hot_enabled,
            hardware_pstate_enabled,
            poll_interval: config.poll_interval(),
            turbo_ratio_limits,
            hwp_request,
            downgraded,
            invalid_files,
        }
    }

    /// Whether turbo boost should be enabled.
    #[must_use]
    pub fn turbo_boost_enabled(&self) -> bool {
        self.turbo_boost_enabled
    }

    /// Whether bi-directional PROCHOT should be enabled.
    #[must_use]
    pub fn proc_hot_enabled(&self) -> bool {
        self.proc_hot_enabled
    }

    /// Whether hardware P-states should be enabled, or `None` if the processor lacks them.
    #[must_use]
    pub fn hardware_pstate_enabled(&self) -> Option<bool> {
        self.hardware_pstate_enabled
    }

    /// How often the engine reconciles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Turbo ratio limits to program, if configured and writable.
    #[must_use]
    pub fn turbo_ratio_limits(&self) -> Option<TurboRatioLimits> {
        self.turbo_ratio_limits
    }

    /// Hardware P-state request to program, if configured and supported.
    #[must_use]
    pub fn hwp_request(&self) -> Option<u64> {
        self.hwp_request
    }

    /// Features that were requested but are not supported by the processor.
    #[must_use]
    pub fn downgraded(&self) -> &[Feature] {
        &self.downgraded
    }

    /// Configuration files that were ignored because they could not be parsed. Their settings
    /// fall back as if the file did not exist.
    #[must_use]
    pub fn invalid_files(&self) -> &[InvalidFile] {
        &self.invalid_files
    }
}

// '1' enables, any other first byte disables. None if there is no readable byte.
fn runtime_switch(filesystem: &impl Filesystem, path: Option<&Path>) -> Option<bool> {
    let path = path?;

    match filesystem.read_prefix(path, 1) {
        Ok(bytes) => bytes.first().map(|first| *first == b'1'),
        Err(_) => None,
    }
}

fn hex_file(
    filesystem: &impl Filesystem,
    path: &Path,
    max_len: usize,
    invalid_files: &mut Vec<InvalidFile>,
) -> Option<u64> {
    let bytes = filesystem.read_prefix(path, max_len).ok()?;
    let text = String::from_utf8_lossy(&bytes);

    let value = parse_hex(&text);

    if value.is_none() {
        invalid_files.push(InvalidFile {
            path: path.to_path_buf(),
            contents: text.trim_end_matches('\0').trim().to_owned(),
        });
    }

    value
}

fn turbo_ratio_limits(
    config: &TuningConfig,
    capabilities: &CpuCapabilities,
    filesystem: &impl Filesystem,
    invalid_files: &mut Vec<InvalidFile>,
) -> Option<TurboRatioLimits> {
    // Two hex digits per core plus the optional prefix.
    let max_len = usize::from(capabilities.core_count())
        .saturating_mul(2)
        .saturating_add(2);

    config
        .turbo_ratio_limit_path()
        .and_then(|path| hex_file(filesystem, path, max_len, invalid_files))
        .map(TurboRatioLimits::from_raw)
        .or_else(|| config.turbo_ratio_limits())
}
