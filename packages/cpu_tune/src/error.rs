use std::io;

use thiserror::Error;

use crate::RegisterSite;

/// Errors from reading or writing a model-specific register.
///
/// None of these are fatal. The engine abandons the single operation that failed and tries
/// again on the next tick.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegisterError {
    /// The privileged access trapped: the register does not exist on this silicon, the
    /// processor index is invalid, or the operating system refused the access.
    #[error("hardware fault accessing {site}: {source}")]
    HardwareFault {
        /// Where the access was attempted.
        site: RegisterSite,

        /// What the operating system reported.
        #[source]
        source: io::Error,
    },

    /// A per-processor register was accessed without naming the processor.
    #[error("{register} is a per-processor register and requires a processor index")]
    ProcessorRequired {
        /// Name of the register that was accessed.
        register: String,
    },
}

/// Errors that make `init` refuse to run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InitError {
    /// The configuration asks for the service to stay off.
    #[error("disabled by configuration")]
    Disabled,

    /// `init` was called on a service that is already running.
    #[error("cannot initialize while a tuning session is running")]
    SessionRunning,
}

/// Errors that make `start` fail. When `start` fails, no timer is left registered and every
/// register that was already captured has been restored.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartError {
    /// `start` was called before a successful `init`.
    #[error("not initialized")]
    NotInitialized,

    /// `start` was called on a service that is already running.
    #[error("already running")]
    AlreadyRunning,

    /// The platform's protection policy does not allow writing model-specific registers.
    #[error("register writes are not permitted by the platform protection policy: {reason}")]
    NotPermitted {
        /// Human-readable explanation from the protection policy.
        reason: String,
    },

    /// The reconciliation timer thread could not be created.
    #[error("failed to start the reconciliation timer: {0}")]
    Timer(#[source] io::Error),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Read(#[source] io::Error),

    /// The configuration file is not valid TOML.
    #[error("failed to parse configuration file: {0}")]
    Parse(#[source] toml::de::Error),
}

/// A specialized `Result` type for register operations.
pub(crate) type Result<T> = std::result::Result<T, RegisterError>;
