//! The platform handle passed to the lifecycle hooks.

use std::io;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

use nonempty::NonEmpty;
use tracing::warn;

use crate::ProcessorId;
#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakeHardware;
use crate::pal::{Bindings, BindingsFacade, Filesystem, FilesystemFacade, MsrFacade};

/// The processor and operating system that the service tunes.
///
/// This is the "provider" of the host lifecycle: [`Lifecycle::probe()`], [`Lifecycle::start()`]
/// and [`Lifecycle::stop()`] all receive it. Production code uses [`Platform::current()`]; tests
/// substitute a fake platform (with the `test-util` feature) so the whole engine can run against
/// simulated registers.
///
/// Cloning is cheap and all clones refer to the same underlying platform.
///
/// [`Lifecycle::probe()`]: crate::Lifecycle::probe
/// [`Lifecycle::start()`]: crate::Lifecycle::start
/// [`Lifecycle::stop()`]: crate::Lifecycle::stop
#[derive(Clone, Debug)]
pub struct Platform {
    msr: MsrFacade,
    bindings: BindingsFacade,
    filesystem: FilesystemFacade,
}

impl Platform {
    /// The real platform the process is running on.
    #[must_use]
    pub const fn current() -> Self {
        Self {
            msr: MsrFacade::target(),
            bindings: BindingsFacade::target(),
            filesystem: FilesystemFacade::target(),
        }
    }

    /// A platform backed entirely by simulated hardware.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn fake(hardware: &Arc<FakeHardware>) -> Self {
        Self {
            msr: MsrFacade::Fake(Arc::clone(hardware)),
            bindings: BindingsFacade::Fake(Arc::clone(hardware)),
            filesystem: FilesystemFacade::Fake(Arc::clone(hardware)),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_facades(
        msr: MsrFacade,
        bindings: BindingsFacade,
        filesystem: FilesystemFacade,
    ) -> Self {
        Self {
            msr,
            bindings,
            filesystem,
        }
    }

    pub(crate) fn msr(&self) -> &MsrFacade {
        &self.msr
    }

    pub(crate) fn bindings(&self) -> &BindingsFacade {
        &self.bindings
    }

    pub(crate) fn filesystem(&self) -> &FilesystemFacade {
        &self.filesystem
    }

    /// The logical processors that are currently online.
    ///
    /// If the operating system does not tell us, we assume only processor 0 exists. The first
    /// entry is the processor used for package-wide register access.
    #[must_use]
    pub fn online_processors(&self) -> NonEmpty<ProcessorId> {
        let Some(contents) = self.filesystem.get_cpu_online_contents() else {
            return NonEmpty::new(0);
        };

        match cpulist::parse(contents.trim()) {
            Ok(processors) => NonEmpty::from_vec(processors).unwrap_or_else(|| NonEmpty::new(0)),
            Err(e) => {
                warn!(
                    error = %e,
                    "unreadable list of online processors, assuming processor 0 only"
                );
                NonEmpty::new(0)
            }
        }
    }

    /// Blocks SIGINT and SIGTERM on the calling thread so they can be received with
    /// [`wait_for_termination_signal()`][Self::wait_for_termination_signal].
    ///
    /// Call this on the main thread before any other thread is spawned; new threads inherit the
    /// signal mask.
    ///
    /// # Errors
    ///
    /// Returns the operating system error if the signal mask cannot be changed.
    pub fn block_termination_signals(&self) -> io::Result<()> {
        self.bindings.block_termination_signals()
    }

    /// Waits until SIGINT or SIGTERM is delivered and returns the signal number.
    ///
    /// # Errors
    ///
    /// Returns the operating system error if waiting fails.
    pub fn wait_for_termination_signal(&self) -> io::Result<i32> {
        self.bindings.wait_for_termination_signal()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::pal::MockFilesystem;

    assert_impl_all!(Platform: Send, Sync, Clone);

    fn platform_with_online(contents: Option<&'static str>) -> Platform {
        let mut filesystem = MockFilesystem::new();
        filesystem
            .expect_get_cpu_online_contents()
            .returning(move || contents.map(str::to_string));

        Platform::from_facades(
            MsrFacade::target(),
            BindingsFacade::target(),
            FilesystemFacade::from_mock(filesystem),
        )
    }

    #[test]
    fn online_processors_parses_cpulist() {
        let platform = platform_with_online(Some("0-3,6\n"));

        let processors = platform.online_processors();
        assert_eq!(processors.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 6]);
    }

    #[test]
    fn online_processors_defaults_to_zero_when_missing() {
        let platform = platform_with_online(None);

        assert_eq!(platform.online_processors(), NonEmpty::new(0));
    }

    #[test]
    fn online_processors_defaults_to_zero_when_garbled() {
        let platform = platform_with_online(Some("zero-three"));

        assert_eq!(platform.online_processors(), NonEmpty::new(0));
    }
}
