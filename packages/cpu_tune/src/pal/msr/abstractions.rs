#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

use crate::ProcessorId;

/// Raw access to the model-specific registers of one logical processor.
///
/// This layer knows nothing about register scopes or meanings. It executes exactly one
/// privileged read or write and reports whatever the operating system says. Failures are
/// returned, never raised: an uncontained `rdmsr`/`wrmsr` fault would take the host down.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait MsrDevice: Debug + Send + Sync + 'static {
    /// Reads the 64-bit value of register `index` on `processor`.
    fn read(&self, processor: ProcessorId, index: u32) -> io::Result<u64>;

    /// Writes the 64-bit `value` to register `index` on `processor`.
    fn write(&self, processor: ProcessorId, index: u32, value: u64) -> io::Result<()>;
}
