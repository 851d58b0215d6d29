use std::fmt::Debug;
use std::io;
use std::path::Path;
#[cfg(any(test, feature = "test-util"))]
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
use crate::fake::FakeHardware;
#[cfg(test)]
use crate::pal::MockFilesystem;
use crate::pal::{BuildTargetFilesystem, Filesystem};

/// Hides the different filesystem implementations behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum FilesystemFacade {
    Target(&'static BuildTargetFilesystem),

    #[cfg(any(test, feature = "test-util"))]
    Fake(Arc<FakeHardware>),

    #[cfg(test)]
    Mock(Arc<MockFilesystem>),
}

static BUILD_TARGET_FILESYSTEM: BuildTargetFilesystem = BuildTargetFilesystem;

// Facade types are trivial pass-through layers - not worth testing.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl FilesystemFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_FILESYSTEM)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockFilesystem) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Filesystem for FilesystemFacade {
    fn get_cpu_online_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_cpu_online_contents(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.get_cpu_online_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_cpu_online_contents(),
        }
    }

    fn get_lockdown_contents(&self) -> Option<String> {
        match self {
            Self::Target(filesystem) => filesystem.get_lockdown_contents(),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.get_lockdown_contents(),
            #[cfg(test)]
            Self::Mock(mock) => mock.get_lockdown_contents(),
        }
    }

    fn read_prefix(&self, path: &Path, max_len: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Target(filesystem) => filesystem.read_prefix(path, max_len),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.read_prefix(path, max_len),
            #[cfg(test)]
            Self::Mock(mock) => mock.read_prefix(path, max_len),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        match self {
            Self::Target(filesystem) => filesystem.exists(path),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.exists(path),
            #[cfg(test)]
            Self::Mock(mock) => mock.exists(path),
        }
    }

    fn create_empty_file(&self, path: &Path) -> io::Result<()> {
        match self {
            Self::Target(filesystem) => filesystem.create_empty_file(path),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.create_empty_file(path),
            #[cfg(test)]
            Self::Mock(mock) => mock.create_empty_file(path),
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match self {
            Self::Target(filesystem) => filesystem.remove_file(path),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(hardware) => hardware.remove_file(path),
            #[cfg(test)]
            Self::Mock(mock) => mock.remove_file(path),
        }
    }
}

// Debug implementations have no API contract to test.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)]
impl Debug for FilesystemFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(any(test, feature = "test-util"))]
            Self::Fake(_) => f.debug_struct("FilesystemFacade::Fake").finish(),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
