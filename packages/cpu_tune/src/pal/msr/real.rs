use std::io;
#[cfg(target_os = "linux")]
use std::fs::{File, OpenOptions};
#[cfg(target_os = "linux")]
use std::os::unix::fs::FileExt;

use crate::ProcessorId;
use crate::pal::MsrDevice;

/// Register access on the real processor the build is targeting.
///
/// On Linux this goes through the `msr` kernel module, which exposes every logical processor's
/// registers as `/dev/cpu/<n>/msr`, with the register index used as the file offset. The module
/// turns a trapping `rdmsr`/`wrmsr` into an `EIO` error instead of a fault.
///
/// Other operating systems have no such interface and every access fails with
/// [`io::ErrorKind::Unsupported`].
#[derive(Debug, Default)]
pub(crate) struct BuildTargetMsrDevice;

#[cfg(target_os = "linux")]
fn device_path(processor: ProcessorId) -> String {
    format!("/dev/cpu/{processor}/msr")
}

// Real register access is excluded from coverage measurement because it requires root
// privileges and the msr kernel module, neither of which exist on test machines.
#[cfg_attr(coverage_nightly, coverage(off))]
impl MsrDevice for BuildTargetMsrDevice {
    #[cfg(target_os = "linux")]
    fn read(&self, processor: ProcessorId, index: u32) -> io::Result<u64> {
        let file = File::open(device_path(processor))?;

        let mut buffer = [0_u8; 8];
        file.read_exact_at(&mut buffer, u64::from(index))?;

        Ok(u64::from_ne_bytes(buffer))
    }

    #[cfg(target_os = "linux")]
    fn write(&self, processor: ProcessorId, index: u32, value: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(device_path(processor))?;

        file.write_all_at(&value.to_ne_bytes(), u64::from(index))
    }

    #[cfg(not(target_os = "linux"))]
    fn read(&self, _processor: ProcessorId, _index: u32) -> io::Result<u64> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    #[cfg(not(target_os = "linux"))]
    fn write(&self, _processor: ProcessorId, _index: u32, _value: u64) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}
