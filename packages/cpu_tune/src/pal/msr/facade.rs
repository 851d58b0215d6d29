use std::fmt::Debug;
use std::io;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

use crate::ProcessorId;
#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakeHardware;
#[cfg(test)]
use crate::pal::MockMsrDevice;
use crate::pal::{BuildTargetMsrDevice, MsrDevice};

/// Hides the different register device implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum MsrFacade {
    Target(&'static BuildTargetMsrDevice),

    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakeHardware>),

    #[cfg(test)]
    Mock(Arc<MockMsrDevice>),
}

static BUILD_TARGET_MSR_DEVICE: BuildTargetMsrDevice = BuildTargetMsrDevice;

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl MsrFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_MSR_DEVICE)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockMsrDevice) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl MsrDevice for MsrFacade {
    fn read(&self, processor: ProcessorId, index: u32) -> io::Result<u64> {
        match self {
            Self::Target(device) => device.read(processor, index),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.read(processor, index),
            #[cfg(test)]
            Self::Mock(mock) => mock.read(processor, index),
        }
    }

    fn write(&self, processor: ProcessorId, index: u32, value: u64) -> io::Result<()> {
        match self {
            Self::Target(device) => device.write(processor, index, value),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.write(processor, index, value),
            #[cfg(test)]
            Self::Mock(mock) => mock.write(processor, index, value),
        }
    }
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Debug for MsrFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(_) => f.debug_struct("MsrFacade::Fake").finish(),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
