use std::fmt::Debug;
use std::io;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakeHardware;
#[cfg(test)]
use crate::pal::MockBindings;
use crate::pal::{Bindings, BuildTargetBindings, CpuidLeaf};

/// Hides the different FFI binding implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakeHardware>),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

static BUILD_TARGET_BINDINGS: BuildTargetBindings = BuildTargetBindings;

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_BINDINGS)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Bindings for BindingsFacade {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf {
        match self {
            Self::Target(bindings) => bindings.cpuid(leaf, subleaf),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.cpuid(leaf, subleaf),
            #[cfg(test)]
            Self::Mock(mock) => mock.cpuid(leaf, subleaf),
        }
    }

    fn block_termination_signals(&self) -> io::Result<()> {
        match self {
            Self::Target(bindings) => bindings.block_termination_signals(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.block_termination_signals(),
            #[cfg(test)]
            Self::Mock(mock) => mock.block_termination_signals(),
        }
    }

    fn wait_for_termination_signal(&self) -> io::Result<i32> {
        match self {
            Self::Target(bindings) => bindings.wait_for_termination_signal(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.wait_for_termination_signal(),
            #[cfg(test)]
            Self::Mock(mock) => mock.wait_for_termination_signal(),
        }
    }
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(_) => f.debug_struct("BindingsFacade::Fake").finish(),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
