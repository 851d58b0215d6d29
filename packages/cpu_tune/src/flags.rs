use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Platform;
use crate::pal::{Filesystem, FilesystemFacade};

/// Set by `probe` when it rejects the platform, cleared by the next `init`.
pub const UNSUPPORTED_PLATFORM_FLAG: &str = "unsupported-platform";

/// Named boolean flags that survive a restart of the service.
///
/// A flag is either set or not. There are no values.
#[cfg_attr(test, mockall::automock)]
pub trait FlagStore: Debug + Send + Sync {
    /// Whether the flag is set.
    fn is_set(&self, name: &str) -> bool;

    /// Sets the flag. Setting a flag that is already set is not an error.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the flag cannot be persisted.
    fn set(&self, name: &str) -> io::Result<()>;

    /// Clears the flag. Clearing a flag that is not set is not an error.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the flag cannot be removed.
    fn clear(&self, name: &str) -> io::Result<()>;
}

/// Stores each flag as an empty file in a directory.
#[derive(Clone, Debug)]
pub struct DirectoryFlagStore {
    directory: PathBuf,
    filesystem: FilesystemFacade,
}

impl DirectoryFlagStore {
    /// Creates a flag store in `directory` on the given platform. The directory is created when
    /// the first flag is set.
    #[must_use]
    pub fn new(platform: &Platform, directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            filesystem: platform.filesystem().clone(),
        }
    }

    /// The directory holding the flags.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn flag_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

impl FlagStore for DirectoryFlagStore {
    fn is_set(&self, name: &str) -> bool {
        self.filesystem.exists(&self.flag_path(name))
    }

    fn set(&self, name: &str) -> io::Result<()> {
        let path = self.flag_path(name);
        debug!(flag = name, path = %path.display(), "setting flag");
        self.filesystem.create_empty_file(&path)
    }

    fn clear(&self, name: &str) -> io::Result<()> {
        let path = self.flag_path(name);

        match self.filesystem.remove_file(&path) {
            Ok(()) => {
                debug!(flag = name, path = %path.display(), "cleared flag");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
