#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;
use std::path::Path;

/// Abstraction over the files the service touches: the kernel's virtual filesystems, the
/// operator's runtime toggle files and the flag store directory.
///
/// All I/O is synchronous and blocking. Every file involved is either virtual or tiny.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Filesystem: Debug + Send + Sync + 'static {
    /// Gets the contents of the /sys/devices/system/cpu/online file or `None` if it does not
    /// exist.
    ///
    /// This is a cpulist format file ("0,1,2-4,5-10:2" style list).
    fn get_cpu_online_contents(&self) -> Option<String>;

    /// Gets the contents of the /sys/kernel/security/lockdown file or `None` if it does not
    /// exist (kernel built without the lockdown LSM).
    ///
    /// This is a single line listing the modes with the active one in brackets, for example
    /// "none [integrity] confidentiality".
    fn get_lockdown_contents(&self) -> Option<String>;

    /// Reads at most `max_len` bytes from the start of the file at `path`.
    fn read_prefix(&self, path: &Path, max_len: usize) -> io::Result<Vec<u8>>;

    /// Returns `true` if something exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Creates an empty file at `path`, creating missing parent directories.
    fn create_empty_file(&self, path: &Path) -> io::Result<()>;

    /// Removes the file at `path`.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}
