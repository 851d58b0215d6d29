#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the cpu_tune service.
//!
//! This module is excluded from mutation testing because testing process entry/exit behavior
//! is impractical - it requires spawning subprocesses and checking exit codes.

use std::path::PathBuf;
use std::process::ExitCode;

use argh::FromArgs;
use cpu_tune::{
    CpuCapabilities, CpuTune, InitError, Lifecycle, Platform, Properties, RegisterAccess,
    TuningConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STATE_DIRECTORY_PROPERTY: &str = "stateDirectory";

/// Keeps turbo boost, PROCHOT and hardware P-states of Intel processors in the configured state
/// and restores the original register values on exit.
#[derive(FromArgs)]
struct Args {
    /// path to the TOML configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// directory for persistent state flags, overriding the configuration file
    #[argh(option)]
    state_dir: Option<PathBuf>,

    /// print the detected processor capabilities and exit without changing anything
    #[argh(switch)]
    detect: bool,
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let platform = Platform::current();

    if args.detect {
        let capabilities = CpuCapabilities::detect(&RegisterAccess::new(&platform));
        println!("{capabilities}");
        return ExitCode::SUCCESS;
    }

    let mut properties = match args.config {
        Some(path) => match Properties::load(&path) {
            Ok(properties) => properties,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => Properties::new(),
    };

    if let Some(directory) = args.state_dir {
        properties.set(STATE_DIRECTORY_PROPERTY, directory.display().to_string());
    }

    // Signals must be blocked before the reconciliation thread exists so it inherits the mask.
    if let Err(e) = platform.block_termination_signals() {
        error!(error = %e, "cannot block termination signals");
        return ExitCode::FAILURE;
    }

    let config = TuningConfig::from_properties(&properties);
    let mut service = CpuTune::with_state_directory(&platform, config.state_directory());

    if !service.probe(&platform).is_match() {
        error!("this platform is not supported");
        return ExitCode::FAILURE;
    }

    match service.init(&properties) {
        Ok(()) => {}
        Err(InitError::Disabled) => {
            info!("tuning is disabled by configuration");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!(error = %e, "cannot initialize");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = service.start(&platform) {
        error!(error = %e, "cannot start tuning");
        service.free();
        return ExitCode::FAILURE;
    }

    match platform.wait_for_termination_signal() {
        Ok(signal) => info!(signal, "termination requested"),
        Err(e) => error!(error = %e, "cannot wait for termination signal, stopping"),
    }

    service.stop(&platform);
    service.free();

    ExitCode::SUCCESS
}
