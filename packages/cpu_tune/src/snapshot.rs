use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::Result;
use crate::{RegisterAccess, RegisterSite};

/// Original values of every register site a tuning session may write, captured before the first
/// write and written back when the session ends.
///
/// A site whose original value could not be read is left out. The engine never writes a site that
/// is not in the snapshot, so nothing is ever changed that could not be put back.
///
/// The hardware P-state enable register is never part of a snapshot: its enable bit can only be
/// cleared by a processor reset, so there is no original to return to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegisterSnapshot {
    originals: BTreeMap<RegisterSite, u64>,
}

impl RegisterSnapshot {
    /// Reads the current value of every site in `sites`.
    pub fn capture(access: &RegisterAccess, sites: impl IntoIterator<Item = RegisterSite>) -> Self {
        let mut snapshot = Self::default();

        for site in sites {
            if let Err(e) = snapshot.capture_site(access, site) {
                warn!(
                    %site,
                    error = %e,
                    "cannot capture original value, site is not tuned until it can be read"
                );
            }
        }

        snapshot
    }

    /// Captures the sites in `sites` that are not captured yet, for registers that only become
    /// accessible partway through a session. Sites already captured keep their original value.
    ///
    /// Called on every tick, so failures are only logged at debug level.
    pub fn capture_missing(
        &mut self,
        access: &RegisterAccess,
        sites: impl IntoIterator<Item = RegisterSite>,
    ) {
        for site in sites {
            if self.originals.contains_key(&site) {
                continue;
            }

            if let Err(e) = self.capture_site(access, site) {
                debug!(%site, error = %e, "original value still cannot be captured");
            }
        }
    }

    fn capture_site(&mut self, access: &RegisterAccess, site: RegisterSite) -> Result<()> {
        let value = access.read_site(site)?;

        debug!(%site, original = format_args!("0x{value:X}"), "captured original");
        self.originals.insert(site, value);

        Ok(())
    }

    /// Whether the original value of `site` was captured.
    #[must_use]
    pub fn contains(&self, site: RegisterSite) -> bool {
        self.originals.contains_key(&site)
    }

    /// The original value of `site`, if captured.
    #[must_use]
    pub fn original(&self, site: RegisterSite) -> Option<u64> {
        self.originals.get(&site).copied()
    }

    /// Number of captured sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.originals.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// The captured sites in a stable order.
    pub fn sites(&self) -> impl Iterator<Item = RegisterSite> + '_ {
        self.originals.keys().copied()
    }

    /// Writes every original value back.
    ///
    /// Best effort: a site that cannot be restored is logged and skipped, and the remaining sites
    /// are still attempted. Sites that already hold their original value are not written.
    pub fn restore(&self, access: &RegisterAccess) -> RestoreReport {
        let mut report = RestoreReport::default();

        for (site, original) in &self.originals {
            match access.apply_site_if_changed(*site, *original) {
                Ok(true) => {
                    debug!(%site, original = format_args!("0x{original:X}"), "restored original");
                    report.restored = report.restored.saturating_add(1);
                }
                Ok(false) => {
                    report.unchanged = report.unchanged.saturating_add(1);
                }
                Err(e) => {
                    warn!(%site, error = %e, "failed to restore original value");
                    report.failed.push(*site);
                }
            }
        }

        report
    }
}

/// Outcome of [`RegisterSnapshot::restore()`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RestoreReport {
    restored: usize,
    unchanged: usize,
    failed: Vec<RegisterSite>,
}

impl RestoreReport {
    /// Sites that were written back.
    #[must_use]
    pub fn restored(&self) -> usize {
        self.restored
    }

    /// Sites that already held their original value.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.unchanged
    }

    /// Sites that could not be restored.
    #[must_use]
    pub fn failed(&self) -> &[RegisterSite] {
        &self.failed
    }

    /// Whether every site now holds its original value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fake::FakeHardware;
    use crate::{IA32_MISC_ENABLE, IA32_POWER_CTL, Platform, TURBO_MODE_DISABLE_BIT};

    fn setup(hardware: FakeHardware) -> (Arc<FakeHardware>, RegisterAccess) {
        let hardware = Arc::new(hardware);
        let access = RegisterAccess::new(&Platform::fake(&hardware));
        (hardware, access)
    }

    #[test]
    fn captures_every_readable_site() {
        let (_, access) = setup(FakeHardware::builder().processor_count(2).build());

        let snapshot = RegisterSnapshot::capture(
            &access,
            RegisterSite::all(IA32_MISC_ENABLE, &[0, 1])
                .into_iter()
                .chain(RegisterSite::all(IA32_POWER_CTL, &[0, 1])),
        );

        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.contains(RegisterSite::on_processor(IA32_POWER_CTL, 1)));
    }

    #[test]
    fn unreadable_site_is_left_out() {
        let (_, access) = setup(FakeHardware::builder().fault_on(IA32_POWER_CTL).build());

        let snapshot = RegisterSnapshot::capture(
            &access,
            [
                RegisterSite::on_processor(IA32_MISC_ENABLE, 0),
                RegisterSite::on_processor(IA32_POWER_CTL, 0),
            ],
        );

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains(RegisterSite::on_processor(IA32_POWER_CTL, 0)));
        assert_eq!(snapshot.original(RegisterSite::on_processor(IA32_POWER_CTL, 0)), None);
    }

    #[test]
    fn capture_missing_keeps_first_original() {
        let (hardware, access) = setup(FakeHardware::builder().processor_count(1).build());
        let site = RegisterSite::on_processor(IA32_MISC_ENABLE, 0);

        let mut snapshot = RegisterSnapshot::capture(&access, [site]);
        let original = snapshot.original(site).unwrap();

        hardware.set_register(IA32_MISC_ENABLE, Some(0), original | TURBO_MODE_DISABLE_BIT);
        snapshot.capture_missing(
            &access,
            [site, RegisterSite::on_processor(IA32_POWER_CTL, 0)],
        );

        assert_eq!(snapshot.original(site), Some(original));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn restore_writes_back_only_changed_sites() {
        let (hardware, access) = setup(FakeHardware::builder().processor_count(2).build());
        let sites = RegisterSite::all(IA32_MISC_ENABLE, &[0, 1]);

        let snapshot = RegisterSnapshot::capture(&access, sites);
        let original = hardware.register(IA32_MISC_ENABLE, Some(0)).unwrap();

        hardware.set_register(IA32_MISC_ENABLE, Some(1), original | TURBO_MODE_DISABLE_BIT);

        let report = snapshot.restore(&access);

        assert_eq!(report.restored(), 1);
        assert_eq!(report.unchanged(), 1);
        assert!(report.is_complete());
        assert_eq!(hardware.register(IA32_MISC_ENABLE, Some(1)), Some(original));
        assert_eq!(hardware.write_count(), 1);
    }

    #[test]
    fn restore_continues_after_failure() {
        let (hardware, access) = setup(FakeHardware::builder().processor_count(1).build());

        let snapshot = RegisterSnapshot::capture(
            &access,
            [
                RegisterSite::on_processor(IA32_MISC_ENABLE, 0),
                RegisterSite::on_processor(IA32_POWER_CTL, 0),
            ],
        );
        let misc = snapshot
            .original(RegisterSite::on_processor(IA32_MISC_ENABLE, 0))
            .unwrap();

        hardware.set_register(IA32_MISC_ENABLE, Some(0), misc | TURBO_MODE_DISABLE_BIT);
        hardware.set_register(IA32_POWER_CTL, Some(0), 0);
        hardware.set_fault(IA32_MISC_ENABLE, true);

        let report = snapshot.restore(&access);

        assert_eq!(
            report.failed(),
            &[RegisterSite::on_processor(IA32_MISC_ENABLE, 0)]
        );
        assert_eq!(report.restored(), 1);
        assert!(!report.is_complete());
    }
}
