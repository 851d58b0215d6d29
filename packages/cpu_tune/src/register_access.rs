//! Fault-contained access to model-specific registers.

use tracing::trace;

use crate::error::Result;
use crate::pal::{Bindings, CpuidLeaf, MsrDevice};
use crate::{Msr, Platform, ProcessorId, RegisterError, RegisterScope, RegisterSite};

/// Reads and writes model-specific registers of a [`Platform`].
///
/// Package-wide registers ignore the processor argument and are accessed through the first
/// online processor. Per-processor registers must name the processor.
///
/// Every failure of the underlying privileged access is returned as
/// [`RegisterError::HardwareFault`]. Callers skip the operation and carry on.
#[derive(Clone, Debug)]
pub struct RegisterAccess {
    platform: Platform,
    package_processor: ProcessorId,
}

impl RegisterAccess {
    /// Creates register access for the given platform.
    #[must_use]
    pub fn new(platform: &Platform) -> Self {
        Self {
            platform: platform.clone(),
            package_processor: platform.online_processors().head,
        }
    }

    /// Reads `register`, on `processor` if it is a per-processor register.
    ///
    /// # Errors
    ///
    /// [`RegisterError::HardwareFault`] if the access trapped, [`RegisterError::ProcessorRequired`]
    /// if a per-processor register was read without naming the processor.
    pub fn read(&self, register: Msr, processor: Option<ProcessorId>) -> Result<u64> {
        let (site, target) = self.resolve(register, processor)?;

        let value = self
            .platform
            .msr()
            .read(target, register.index())
            .map_err(|source| RegisterError::HardwareFault { site, source })?;

        trace!(%site, value = format_args!("0x{value:X}"), "read register");

        Ok(value)
    }

    /// Writes `value` to `register`, on `processor` if it is a per-processor register.
    ///
    /// # Errors
    ///
    /// [`RegisterError::HardwareFault`] if the access trapped, [`RegisterError::ProcessorRequired`]
    /// if a per-processor register was written without naming the processor.
    pub fn write(&self, register: Msr, value: u64, processor: Option<ProcessorId>) -> Result<()> {
        let (site, target) = self.resolve(register, processor)?;

        self.platform
            .msr()
            .write(target, register.index(), value)
            .map_err(|source| RegisterError::HardwareFault { site, source })?;

        trace!(%site, value = format_args!("0x{value:X}"), "wrote register");

        Ok(())
    }

    /// Writes `desired` only if the register does not already hold it.
    ///
    /// Returns whether a write occurred. This is the only write path the tuning engine uses: it
    /// keeps bus traffic down and avoids re-triggering side effects of a write (such as another
    /// latch attempt on a sticky bit) when nothing needs to change.
    ///
    /// # Errors
    ///
    /// Same as [`read()`][Self::read] and [`write()`][Self::write]. If the read fails, no write
    /// is attempted.
    pub fn apply_if_changed(
        &self,
        register: Msr,
        desired: u64,
        processor: Option<ProcessorId>,
    ) -> Result<bool> {
        let current = self.read(register, processor)?;
        self.write_if_changed(register, current, desired, processor)
    }

    /// [`read()`][Self::read] addressed by site.
    ///
    /// # Errors
    ///
    /// Same as [`read()`][Self::read].
    pub fn read_site(&self, site: RegisterSite) -> Result<u64> {
        self.read(site.register(), site.processor())
    }

    /// [`apply_if_changed()`][Self::apply_if_changed] addressed by site.
    ///
    /// # Errors
    ///
    /// Same as [`apply_if_changed()`][Self::apply_if_changed].
    pub fn apply_site_if_changed(&self, site: RegisterSite, desired: u64) -> Result<bool> {
        self.apply_if_changed(site.register(), desired, site.processor())
    }

    /// Reads `site`, derives the desired value from the current one and writes it only if it
    /// differs. Returns whether a write occurred.
    ///
    /// # Errors
    ///
    /// Same as [`apply_if_changed()`][Self::apply_if_changed].
    pub fn modify_site(
        &self,
        site: RegisterSite,
        desired: impl FnOnce(u64) -> u64,
    ) -> Result<bool> {
        let current = self.read_site(site)?;
        self.write_if_changed(site.register(), current, desired(current), site.processor())
    }

    fn write_if_changed(
        &self,
        register: Msr,
        current: u64,
        desired: u64,
        processor: Option<ProcessorId>,
    ) -> Result<bool> {
        if current == desired {
            return Ok(false);
        }

        self.write(register, desired, processor)?;
        Ok(true)
    }

    pub(crate) fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidLeaf {
        self.platform.bindings().cpuid(leaf, subleaf)
    }

    fn resolve(
        &self,
        register: Msr,
        processor: Option<ProcessorId>,
    ) -> Result<(RegisterSite, ProcessorId)> {
        match (register.scope(), processor) {
            (RegisterScope::Package, _) => {
                Ok((RegisterSite::package(register), self.package_processor))
            }
            (RegisterScope::Processor, Some(processor)) => {
                Ok((RegisterSite::on_processor(register, processor), processor))
            }
            (RegisterScope::Processor, None) => Err(RegisterError::ProcessorRequired {
                register: register.to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;

    use mockall::predicate::eq;

    use super::*;
    use crate::pal::{BindingsFacade, FilesystemFacade, MockFilesystem, MockMsrDevice, MsrFacade};
    use crate::{IA32_MISC_ENABLE, IA32_PM_ENABLE};

    fn access_with(device: MockMsrDevice) -> RegisterAccess {
        let mut filesystem = MockFilesystem::new();
        filesystem
            .expect_get_cpu_online_contents()
            .returning(|| Some("2-5".to_string()));

        let platform = Platform::from_facades(
            MsrFacade::from_mock(device),
            BindingsFacade::target(),
            FilesystemFacade::from_mock(filesystem),
        );

        RegisterAccess::new(&platform)
    }

    #[test]
    fn package_register_uses_first_online_processor() {
        let mut device = MockMsrDevice::new();
        device
            .expect_read()
            .with(eq(2), eq(IA32_PM_ENABLE.index()))
            .times(2)
            .returning(|_, _| Ok(1));

        let access = access_with(device);

        assert_eq!(access.read(IA32_PM_ENABLE, None).unwrap(), 1);
        assert_eq!(access.read(IA32_PM_ENABLE, Some(4)).unwrap(), 1);
    }

    #[test]
    fn processor_register_requires_processor() {
        let access = access_with(MockMsrDevice::new());

        let error = access.read(IA32_MISC_ENABLE, None).unwrap_err();
        assert!(matches!(error, RegisterError::ProcessorRequired { .. }));
    }

    #[test]
    fn fault_is_contained() {
        let mut device = MockMsrDevice::new();
        device
            .expect_read()
            .returning(|_, _| Err(io::Error::from_raw_os_error(5)));

        let access = access_with(device);

        let error = access.read(IA32_MISC_ENABLE, Some(3)).unwrap_err();
        match error {
            RegisterError::HardwareFault { site, .. } => {
                assert_eq!(site, RegisterSite::on_processor(IA32_MISC_ENABLE, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn apply_if_changed_skips_equal_value() {
        let mut device = MockMsrDevice::new();
        device.expect_read().returning(|_, _| Ok(0x85_0089));
        device.expect_write().never();

        let access = access_with(device);

        assert!(!access.apply_if_changed(IA32_MISC_ENABLE, 0x85_0089, Some(2)).unwrap());
    }

    #[test]
    fn apply_if_changed_writes_different_value() {
        let mut device = MockMsrDevice::new();
        device.expect_read().returning(|_, _| Ok(0x85_0089));
        device
            .expect_write()
            .with(eq(3), eq(IA32_MISC_ENABLE.index()), eq(0x40_0085_0089))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let access = access_with(device);

        assert!(
            access
                .apply_if_changed(IA32_MISC_ENABLE, 0x40_0085_0089, Some(3))
                .unwrap()
        );
    }

    #[test]
    fn modify_site_preserves_unrelated_bits() {
        let mut device = MockMsrDevice::new();
        device.expect_read().returning(|_, _| Ok(0xFFFF_0000_0000_0000));
        device
            .expect_write()
            .with(eq(4), eq(IA32_MISC_ENABLE.index()), eq(0xFFFF_0000_0000_0001))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let access = access_with(device);

        assert!(
            access
                .modify_site(RegisterSite::on_processor(IA32_MISC_ENABLE, 4), |v| v | 1)
                .unwrap()
        );
    }

    #[test]
    fn modify_site_skips_unchanged_value() {
        let mut device = MockMsrDevice::new();
        device.expect_read().returning(|_, _| Ok(1));
        device.expect_write().never();

        let access = access_with(device);

        assert!(
            !access
                .modify_site(RegisterSite::package(IA32_PM_ENABLE), |v| v | 1)
                .unwrap()
        );
    }

    #[test]
    fn modify_site_does_not_write_after_failed_read() {
        let mut device = MockMsrDevice::new();
        device
            .expect_read()
            .returning(|_, _| Err(io::Error::from_raw_os_error(5)));
        device.expect_write().never();

        let access = access_with(device);

        assert!(matches!(
            access.modify_site(RegisterSite::package(IA32_PM_ENABLE), |v| v | 1),
            Err(RegisterError::HardwareFault { .. })
        ));
    }

    #[test]
    fn apply_if_changed_does_not_write_after_failed_read() {
        let mut device = MockMsrDevice::new();
        device
            .expect_read()
            .returning(|_, _| Err(io::Error::from_raw_os_error(5)));
        device.expect_write().never();

        let access = access_with(device);

        access
            .apply_if_changed(IA32_MISC_ENABLE, 0, Some(2))
            .unwrap_err();
    }
}
