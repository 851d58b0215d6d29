#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

/// The four output registers of one CPUID leaf.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct CpuidLeaf {
    pub(crate) eax: u32,
    pub(crate) ebx: u32,
    pub(crate) ecx: u32,
    pub(crate) edx: u32,
}

/// Bindings for FFI calls into the processor and the operating system.
///
/// All PAL FFI calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    // cpuid with the given leaf (EAX) and subleaf (ECX)
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf;

    // pthread_sigmask(SIG_BLOCK) for SIGINT and SIGTERM on the current thread
    fn block_termination_signals(&self) -> io::Result<()>;

    // sigwait() for SIGINT or SIGTERM, returning the signal number
    fn wait_for_termination_signal(&self) -> io::Result<i32>;
}
