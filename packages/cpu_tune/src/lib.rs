#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Keeps the performance-related model-specific registers of Intel processors in a configured
//! state for as long as a tuning session runs, and puts them back the way they were when the
//! session ends.
//!
//! The crate is built from a handful of layers:
//!
//! * [`CpuCapabilities`] describes what the processor is and which optional controls it offers,
//!   as detected through CPUID and a few read-only registers.
//! * [`TuningConfig`] is the static configuration, read from a TOML property table
//!   ([`Properties`]). Some settings can be overridden at runtime through small files that are
//!   re-read on every reconciliation pass; [`TuningPolicy`] is the resolved result of one pass.
//! * [`TuningEngine`] owns a session: it captures the original register values into a
//!   [`RegisterSnapshot`], reconciles the hardware towards the policy on every [`tick()`], and
//!   restores the snapshot on [`stop()`].
//! * [`CpuTune`] drives the engine through the [`Lifecycle`] hooks (probe, init, start, stop,
//!   free) and runs the periodic reconciliation on a background thread.
//!
//! # Tuned registers
//!
//! | Register | Scope | Control |
//! |----------|-------|---------|
//! | `IA32_MISC_ENABLE` (0x1A0) | per processor | turbo boost, bit 38 clear means enabled |
//! | `IA32_POWER_CTL` (0x1FC) | per processor | PROCHOT, bit 0 clear means enabled |
//! | `MSR_TURBO_RATIO_LIMIT` (0x1AD) | package | maximum ratio per active core count |
//! | `IA32_PM_ENABLE` (0x770) | package | hardware P-states, bit 0, sticky until reset |
//! | `IA32_HWP_REQUEST` (0x774) | per processor | hardware P-state request |
//!
//! The engine only writes a register site whose original value it was able to capture, and only
//! when the desired value differs from the current one.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "test-util")]
//! # {
//! use std::sync::Arc;
//!
//! use cpu_tune::fake::FakeHardware;
//! use cpu_tune::{Platform, Properties, TuningConfig, TuningEngine};
//!
//! let hardware = Arc::new(FakeHardware::builder().processor_count(2).build());
//! let platform = Platform::fake(&hardware);
//!
//! let properties = Properties::from_toml_str("enableIntelTurboBoost = false").unwrap();
//! let mut engine = TuningEngine::new(&platform, TuningConfig::from_properties(&properties));
//!
//! engine.detect_capabilities();
//! engine.capture_originals();
//! engine.tick();
//!
//! // Turbo boost is now disabled on every processor.
//! assert_eq!(hardware.writes_to(cpu_tune::IA32_MISC_ENABLE), 2);
//!
//! // Stopping puts the original values back.
//! engine.stop();
//! # }
//! ```
//!
//! [`tick()`]: TuningEngine::tick
//! [`stop()`]: TuningEngine::stop

mod capabilities;
mod config;
mod engine;
mod error;
mod flags;
mod lifecycle;
mod pal;
mod platform;
mod policy;
mod protection;
mod register_access;
mod registers;
mod service;
mod snapshot;
mod timer;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod fake;

pub use capabilities::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use flags::*;
pub use lifecycle::*;
pub use platform::*;
pub use policy::*;
pub use protection::*;
pub use register_access::*;
pub use registers::*;
pub use service::*;
pub use snapshot::*;

/// Index of a logical processor, as numbered by the operating system.
pub type ProcessorId = u32;
