//! Tracing subscriber setup.

use a3s_pack_core::LogLevel;
use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` does not decide.
///
/// `--verbose` and `--quiet` win over the configured level.
pub fn default_directive(verbose: bool, quiet: bool, configured: Option<LogLevel>) -> String {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::ERROR
    } else {
        configured.map(tracing::Level::from).unwrap_or(tracing::Level::WARN)
    };
    level.to_string().to_lowercase()
}

/// Install the global subscriber, writing to stderr.
pub fn init(verbose: bool, quiet: bool, configured: Option<LogLevel>) {
    let directive = default_directive(verbose, quiet, configured);
    let filter = if verbose || quiet {
        EnvFilter::new(directive)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
