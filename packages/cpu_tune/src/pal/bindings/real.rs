use std::io;
#[cfg(unix)]
use std::{mem, ptr};

use crate::pal::{Bindings, CpuidLeaf};

/// FFI bindings that target the real operating system and processor that the build is
/// targeting.
///
/// You would only use different bindings in unit tests that need to use mock bindings or the
/// fake platform.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

#[cfg(unix)]
fn termination_signal_set() -> libc::sigset_t {
    // SAFETY: All zeroes is a valid sigset_t to hand to sigemptyset().
    let mut set: libc::sigset_t = unsafe { mem::zeroed() };

    // The return values are ignored because these only fail for invalid signal numbers.
    // SAFETY: No safety requirements beyond passing a valid set.
    unsafe { libc::sigemptyset(&raw mut set) };
    // SAFETY: No safety requirements beyond passing a valid set.
    unsafe { libc::sigaddset(&raw mut set, libc::SIGINT) };
    // SAFETY: No safety requirements beyond passing a valid set.
    unsafe { libc::sigaddset(&raw mut set, libc::SIGTERM) };

    set
}

// Real OS bindings are excluded from coverage measurement because:
// 1. CPUID results depend on the machine running the tests.
// 2. Signal delivery cannot be exercised without affecting the test harness process.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    #[cfg(target_arch = "x86_64")]
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf {
        // SAFETY: CPUID is available on every x86_64 processor.
        let result = unsafe { std::arch::x86_64::__cpuid_count(leaf, subleaf) };

        CpuidLeaf {
            eax: result.eax,
            ebx: result.ebx,
            ecx: result.ecx,
            edx: result.edx,
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn cpuid(&self, _leaf: u32, _subleaf: u32) -> CpuidLeaf {
        // All zeroes decodes as an unknown vendor, which makes probe() reject the platform.
        CpuidLeaf::default()
    }

    #[cfg(unix)]
    fn block_termination_signals(&self) -> io::Result<()> {
        let set = termination_signal_set();

        // SAFETY: No safety requirements beyond passing valid arguments.
        let result =
            unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &raw const set, ptr::null_mut()) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::from_raw_os_error(result))
        }
    }

    #[cfg(unix)]
    fn wait_for_termination_signal(&self) -> io::Result<i32> {
        let set = termination_signal_set();
        let mut signal: libc::c_int = 0;

        // SAFETY: No safety requirements beyond passing valid arguments.
        let result = unsafe { libc::sigwait(&raw const set, &raw mut signal) };

        if result == 0 {
            Ok(signal)
        } else {
            Err(io::Error::from_raw_os_error(result))
        }
    }

    #[cfg(not(unix))]
    fn block_termination_signals(&self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    #[cfg(not(unix))]
    fn wait_for_termination_signal(&self) -> io::Result<i32> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
