//! Configuration provider and the typed tuning configuration derived from it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use toml::{Table, Value};
use tracing::warn;

use crate::{ConfigError, TurboRatioLimits};

const DISABLED: &str = "disabled";
const ENABLE_TURBO_BOOST: &str = "enableIntelTurboBoost";
const ENABLE_PROC_HOT: &str = "enableIntelProcHot";
const ENABLE_SPEED_SHIFT: &str = "enableIntelSpeedShift";
const UPDATE_INTERVAL: &str = "updateInterval";
const TURBO_BOOST_AT_RUNTIME: &str = "turboBoostAtRuntime";
const PROC_HOT_AT_RUNTIME: &str = "procHotAtRuntime";
const SPEED_SHIFT_AT_RUNTIME: &str = "speedShiftAtRuntime";
const HWP_REQUEST_CONFIG_PATH: &str = "hwpRequestConfigPath";
const TURBO_RATIO_LIMITS: &str = "turboRatioLimits";
const TURBO_RATIO_LIMIT_CONFIG_PATH: &str = "turboRatioLimitConfigPath";
const STATE_DIRECTORY: &str = "stateDirectory";

const DEFAULT_UPDATE_INTERVAL_MS: u32 = 2000;
const DEFAULT_STATE_DIRECTORY: &str = "/var/lib/cpu_tune";

/// Named configuration properties with typed, defaulted lookups.
///
/// Backed by a flat TOML table. A property that is missing yields the caller's default silently.
/// A property that is present but has the wrong type also yields the default, and is logged as
/// `ConfigInvalid`.
///
/// # Example
///
/// ```
/// use cpu_tune::Properties;
///
/// let properties = Properties::from_toml_str(
///     r#"
///     enableIntelProcHot = true
///     updateInterval = 500
///     "#,
/// )
/// .unwrap();
///
/// assert!(properties.bool_or("enableIntelProcHot", false));
/// assert_eq!(properties.integer_or("updateInterval", 2000), 500);
/// assert!(properties.bool_or("enableIntelTurboBoost", true));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    table: Table,
}

impl Properties {
    /// Creates an empty set of properties. Every lookup yields its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses properties from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table = text.parse::<Table>().map_err(ConfigError::Parse)?;
        Ok(Self { table })
    }

    /// Loads properties from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and [`ConfigError::Parse`] if it
    /// is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Read)?;
        Self::from_toml_str(&text)
    }

    /// Sets a property, replacing any previous value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.table.insert(name.to_string(), value.into());
    }

    /// Whether the property is present, whatever its type.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// A boolean property.
    #[must_use]
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        match self.table.get(name) {
            None => default,
            Some(Value::Boolean(value)) => *value,
            Some(other) => invalid(name, other, "expected a boolean", default),
        }
    }

    /// An integer property.
    #[must_use]
    pub fn integer_or(&self, name: &str, default: i64) -> i64 {
        match self.table.get(name) {
            None => default,
            Some(Value::Integer(value)) => *value,
            Some(other) => invalid(name, other, "expected an integer", default),
        }
    }

    /// A string property, or `None` if missing or not a string.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.table.get(name) {
            None => None,
            Some(Value::String(value)) => Some(value),
            Some(other) => invalid(name, other, "expected a string", None),
        }
    }

    /// An array property, or `None` if missing or not an array.
    #[must_use]
    pub fn array(&self, name: &str) -> Option<&[Value]> {
        match self.table.get(name) {
            None => None,
            Some(Value::Array(values)) => Some(values),
            Some(other) => invalid(name, other, "expected an array", None),
        }
    }

    fn path(&self, name: &str) -> Option<PathBuf> {
        self.string(name)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }
}

fn invalid<T>(name: &str, value: &Value, reason: &str, default: T) -> T {
    warn!(
        property = name,
        value = %value,
        reason,
        "ConfigInvalid: using the default instead"
    );
    default
}

/// Everything the service needs to know from its configuration, validated and defaulted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TuningConfig {
    disabled: bool,
    turbo_boost: bool,
    proc_hot: bool,
    speed_shift: bool,
    poll_interval: Duration,
    turbo_boost_path: Option<PathBuf>,
    proc_hot_path: Option<PathBuf>,
    speed_shift_path: Option<PathBuf>,
    hwp_request_path: Option<PathBuf>,
    turbo_ratio_limits: Option<TurboRatioLimits>,
    turbo_ratio_limit_path: Option<PathBuf>,
    state_directory: PathBuf,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self::from_properties(&Properties::new())
    }
}

impl TuningConfig {
    /// Reads the tuning configuration from `properties`.
    ///
    /// Never fails: every invalid property is logged and replaced by its default.
    #[must_use]
    pub fn from_properties(properties: &Properties) -> Self {
        let default_interval = i64::from(DEFAULT_UPDATE_INTERVAL_MS);
        let interval_ms = match properties.integer_or(UPDATE_INTERVAL, default_interval) {
            value @ 1..=0xFFFF_FFFF => value,
            value => {
                warn!(
                    property = UPDATE_INTERVAL,
                    value,
                    default = default_interval,
                    "ConfigInvalid: update interval must be a positive number of milliseconds"
                );
                default_interval
            }
        };

        Self {
            disabled: properties.bool_or(DISABLED, false),
            turbo_boost: properties.bool_or(ENABLE_TURBO_BOOST, true),
            proc_hot: properties.bool_or(ENABLE_PROC_HOT, false),
            speed_shift: properties.bool_or(ENABLE_SPEED_SHIFT, true),
            poll_interval: Duration::from_millis(interval_ms.unsigned_abs()),
            turbo_boost_path: properties.path(TURBO_BOOST_AT_RUNTIME),
            proc_hot_path: properties.path(PROC_HOT_AT_RUNTIME),
            speed_shift_path: properties.path(SPEED_SHIFT_AT_RUNTIME),
            hwp_request_path: properties.path(HWP_REQUEST_CONFIG_PATH),
            turbo_ratio_limits: turbo_ratio_limits(properties),
            turbo_ratio_limit_path: properties.path(TURBO_RATIO_LIMIT_CONFIG_PATH),
            state_directory: properties
                .path(STATE_DIRECTORY)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIRECTORY)),
        }
    }

    /// Whether the operator switched the service off.
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Static turbo boost switch.
    #[must_use]
    pub fn turbo_boost(&self) -> bool {
        self.turbo_boost
    }

    /// Static bi-directional PROCHOT switch.
    #[must_use]
    pub fn proc_hot(&self) -> bool {
        self.proc_hot
    }

    /// Static hardware P-state (Speed Shift) switch.
    #[must_use]
    pub fn speed_shift(&self) -> bool {
        self.speed_shift
    }

    /// Interval between reconciliation ticks.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runtime toggle file for turbo boost.
    #[must_use]
    pub fn turbo_boost_path(&self) -> Option<&Path> {
        self.turbo_boost_path.as_deref()
    }

    /// Runtime toggle file for bi-directional PROCHOT.
    #[must_use]
    pub fn proc_hot_path(&self) -> Option<&Path> {
        self.proc_hot_path.as_deref()
    }

    /// Runtime toggle file for hardware P-states.
    #[must_use]
    pub fn speed_shift_path(&self) -> Option<&Path> {
        self.speed_shift_path.as_deref()
    }

    /// File holding the hardware P-state request override as a hexadecimal constant.
    #[must_use]
    pub fn hwp_request_path(&self) -> Option<&Path> {
        self.hwp_request_path.as_deref()
    }

    /// Turbo ratio limits given inline.
    #[must_use]
    pub fn turbo_ratio_limits(&self) -> Option<TurboRatioLimits> {
        self.turbo_ratio_limits
    }

    /// File holding the turbo ratio limits as a hexadecimal constant. Takes precedence over the
    /// inline table while it is readable and valid.
    #[must_use]
    pub fn turbo_ratio_limit_path(&self) -> Option<&Path> {
        self.turbo_ratio_limit_path.as_deref()
    }

    /// Directory of the persistent flag store.
    #[must_use]
    pub fn state_directory(&self) -> &Path {
        &self.state_directory
    }
}

fn turbo_ratio_limits(properties: &Properties) -> Option<TurboRatioLimits> {
    let values = properties.array(TURBO_RATIO_LIMITS)?;

    let ratios = values
        .iter()
        .map(|value| value.as_integer().and_then(|ratio| u8::try_from(ratio).ok()))
        .collect::<Option<Vec<_>>>();

    let limits = ratios.as_deref().and_then(TurboRatioLimits::from_ratios);

    if limits.is_none() {
        warn!(
            property = TURBO_RATIO_LIMITS,
            "ConfigInvalid: expected 1 to 8 ratios between 1 and 255, ignoring"
        );
    }

    limits
}
