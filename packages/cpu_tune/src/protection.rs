use std::fmt::Debug;

use tracing::debug;

use crate::Platform;
use crate::pal::{Filesystem, FilesystemFacade};

/// Whether the platform allows the service to write model-specific registers.
#[derive(Clone, Debug, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a write is either permitted or it is not"
)]
pub enum WritePermission {
    /// Register writes are allowed.
    Permitted,

    /// Register writes are not allowed.
    Denied {
        /// Human-readable explanation.
        reason: String,
    },
}

/// Decides whether register writes are permitted under the platform's protection policy.
///
/// Consulted once by `start`, before anything is written.
#[cfg_attr(test, mockall::automock)]
pub trait ProtectionPolicy: Debug + Send + Sync {
    /// Checks the current policy.
    fn register_writes(&self) -> WritePermission;
}

/// The Linux kernel lockdown LSM. In `integrity` or `confidentiality` mode, the kernel refuses
/// writes to `/dev/cpu/*/msr`.
///
/// A kernel without the lockdown LSM, or one in `none` mode, permits writes.
#[derive(Clone, Debug)]
pub struct KernelLockdown {
    filesystem: FilesystemFacade,
}

impl KernelLockdown {
    /// Checks the lockdown mode of the given platform.
    #[must_use]
    pub fn new(platform: &Platform) -> Self {
        Self {
            filesystem: platform.filesystem().clone(),
        }
    }
}

impl ProtectionPolicy for KernelLockdown {
    fn register_writes(&self) -> WritePermission {
        let Some(contents) = self.filesystem.get_lockdown_contents() else {
            debug!("kernel lockdown not available, register writes permitted");
            return WritePermission::Permitted;
        };

        match active_lockdown_mode(&contents) {
            None | Some("none") => WritePermission::Permitted,
            Some(mode) => WritePermission::Denied {
                reason: format!("kernel lockdown is in {mode} mode"),
            },
        }
    }
}

// "none [integrity] confidentiality" -> "integrity"
fn active_lockdown_mode(contents: &str) -> Option<&str> {
    let start = contents.find('[')?;
    let rest = contents.get(start.checked_add(1)?..)?;
    let end = rest.find(']')?;
    rest.get(..end)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::fake::FakeHardware;

    assert_impl_all!(KernelLockdown: Send, Sync, ProtectionPolicy);

    fn permission(lockdown: Option<&str>) -> WritePermission {
        let hardware = Arc::new(FakeHardware::builder().build());
        hardware.set_lockdown(lockdown);

        KernelLockdown::new(&Platform::fake(&hardware)).register_writes()
    }

    #[test]
    fn active_mode_parsing() {
        assert_eq!(
            active_lockdown_mode("none [integrity] confidentiality\n"),
            Some("integrity")
        );
        assert_eq!(active_lockdown_mode("[none] integrity"), Some("none"));
        assert_eq!(active_lockdown_mode("none integrity"), None);
        assert_eq!(active_lockdown_mode("[none"), None);
    }

    #[test]
    fn no_lockdown_permits() {
        assert_eq!(permission(None), WritePermission::Permitted);
        assert_eq!(
            permission(Some("[none] integrity confidentiality")),
            WritePermission::Permitted
        );
    }

    #[test]
    fn integrity_denies() {
        let WritePermission::Denied { reason } =
            permission(Some("none [integrity] confidentiality"))
        else {
            panic!("lockdown in integrity mode must deny register writes");
        };

        assert!(reason.contains("integrity"), "{reason}");
    }

    #[test]
    fn confidentiality_denies() {
        assert!(matches!(
            permission(Some("none integrity [confidentiality]")),
            WritePermission::Denied { .. }
        ));
    }
}
