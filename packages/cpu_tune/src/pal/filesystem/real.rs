use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use crate::pal::Filesystem;

/// The filesystem of the real operating system that the build is targeting.
///
/// You would only use different filesystems in unit tests that need to use a mock filesystem
/// or the fake platform. Even then, tests that only touch ordinary files should prefer the real
/// filesystem with a temporary directory for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetFilesystem;

// The kernel virtual files are excluded from coverage measurement because their presence
// depends on the kernel configuration of the test machine. Ordinary file operations are
// covered by the flag store and configuration tests via temporary directories.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Filesystem for BuildTargetFilesystem {
    fn get_cpu_online_contents(&self) -> Option<String> {
        fs::read_to_string("/sys/devices/system/cpu/online").ok()
    }

    fn get_lockdown_contents(&self) -> Option<String> {
        fs::read_to_string("/sys/kernel/security/lockdown").ok()
    }

    fn read_prefix(&self, path: &Path, max_len: usize) -> io::Result<Vec<u8>> {
        let file = File::open(path)?;

        let mut buffer = Vec::with_capacity(max_len);
        file.take(u64::try_from(max_len).unwrap_or(u64::MAX))
            .read_to_end(&mut buffer)?;

        Ok(buffer)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_empty_file(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        File::create(path).map(drop)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
