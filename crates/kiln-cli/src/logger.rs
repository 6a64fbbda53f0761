//! Logging setup for the `kiln` binary.
//!
//! Library crates only emit `tracing` events; this module installs the one
//! subscriber that prints them.
//!
//! ```rust,no_run
//! use kiln_cli::logger::init_logger;
//!
//! init_logger(false, false, false);
//! tracing::info!("Starting build");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "kiln=debug,kiln_cli=debug,kiln_build=debug,kiln_rolldown=debug";
const QUIET_FILTER: &str = "error";
const DEFAULT_FILTER: &str = "kiln=info,kiln_cli=info,kiln_build=info,kiln_rolldown=info";

/// Filter for the given flags.
///
/// 1. `--verbose`: debug for kiln crates
/// 2. `--quiet`: errors only
/// 3. `RUST_LOG`, when set and valid
/// 4. info for kiln crates
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global subscriber can only be installed once per process, so only
    // the filter selection is exercised here.

    #[test]
    fn test_verbose_wins() {
        assert_eq!(filter_for(true, false).to_string(), EnvFilter::new(VERBOSE_FILTER).to_string());
    }

    #[test]
    fn test_quiet_is_errors_only() {
        assert_eq!(filter_for(false, true).to_string(), EnvFilter::new(QUIET_FILTER).to_string());
    }
}
