use derive_more::Display;

use crate::{InitError, Platform, Properties, StartError};

/// How well a service matches a platform, as reported by [`Lifecycle::probe()`].
///
/// Zero means "does not match"; the host must not proceed to `init` in that case. Higher scores
/// are better matches.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MatchScore(u32);

impl MatchScore {
    /// The platform is not supported.
    pub const NONE: Self = Self(0);

    /// Creates a score.
    #[must_use]
    pub const fn new(score: u32) -> Self {
        Self(score)
    }

    /// The raw score.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Whether the platform is supported at all.
    #[must_use]
    pub const fn is_match(self) -> bool {
        self.0 > 0
    }
}

/// The hooks a host calls to drive a service through its life.
///
/// The host calls them in this order: `probe`, `init`, `start`, then `stop` and `free`. `stop`
/// and `free` may be called at any time and any number of times. When `start` fails, nothing it
/// acquired is left behind.
pub trait Lifecycle {
    /// Decides whether the service supports `platform`. Must not change anything on the platform
    /// apart from the service's own persistent flags.
    fn probe(&mut self, platform: &Platform) -> MatchScore;

    /// Reads the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] if the service must not run.
    fn init(&mut self, properties: &Properties) -> Result<(), InitError>;

    /// Starts tuning `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if tuning could not start. Any register already written has been
    /// restored and no timer is left running.
    fn start(&mut self, platform: &Platform) -> Result<(), StartError>;

    /// Stops tuning and restores the original register values. Does nothing if not running.
    fn stop(&mut self, platform: &Platform);

    /// Releases everything the service holds. Stops first if still running.
    fn free(&mut self);
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn match_score() {
        assert!(!MatchScore::NONE.is_match());
        assert!(MatchScore::new(1).is_match());
        assert!(MatchScore::new(1000) > MatchScore::new(500));
        assert_eq!(MatchScore::default(), MatchScore::NONE);
        assert_eq!(MatchScore::new(42).to_string(), "42");
    }
}
