//! Simulated processor for testing code that drives the tuning engine.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! The fake models the parts of an Intel processor and Linux host the service touches: CPUID,
//! the model-specific registers (with package-wide registers shared by all processors and the
//! sticky hardware P-state enable bit), the list of online processors, the kernel lockdown mode
//! and arbitrary files such as runtime toggles.
//!
//! Every register write made through the platform is recorded, so tests can assert exactly what
//! the engine wrote. Writes made with [`FakeHardware::set_register()`] simulate an external agent
//! (firmware, the operating system) and are not recorded.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use cpu_tune::fake::FakeHardware;
//! use cpu_tune::{CpuCapabilities, CpuModel, Platform, RegisterAccess};
//!
//! let hardware = Arc::new(FakeHardware::builder().model(0x9E).processor_count(8).build());
//! let platform = Platform::fake(&hardware);
//!
//! let capabilities = CpuCapabilities::detect(&RegisterAccess::new(&platform));
//! assert_eq!(capabilities.model(), CpuModel::KabylakeDt);
//! ```

mod builder;
mod hardware;

pub use builder::FakeHardwareBuilder;
pub use hardware::{FakeHardware, RegisterWrite};
