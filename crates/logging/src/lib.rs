//! CovenantSQL logging
//!
//! tracing-subscriber wiring shared by `cqld` and the test harnesses. The
//! daemon knows two levels of output, matching its `--verbose` flag; a
//! `RUST_LOG` filter in the environment overrides both.

use tracing_subscriber::EnvFilter;

/// How much the daemon logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Lifecycle and per-database events (default)
    #[default]
    Normal,
    /// Adds per-connection, per-stream and per-allocation-round detail
    Verbose,
}

impl Verbosity {
    pub fn from_flag(verbose: bool) -> Self {
        if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Initialize logging at the given verbosity.
///
/// # Panics
///
/// Panics if a subscriber is already installed; use `try_init` from tests.
pub fn init(verbosity: Verbosity) {
    try_init(verbosity).expect("failed to initialize logging");
}

/// Try to initialize logging, returning an error if already initialized.
pub fn try_init(verbosity: Verbosity) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}
