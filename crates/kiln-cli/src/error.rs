//! Error types for the `kiln` binary.
//!
//! Every variant renders as an actionable message, most with a `Hint:` line.
//! Library errors convert in through `#[from]`, and [`cli_error_to_miette`]
//! turns the final error into a report in `main`.
//!
//! ```rust,no_run
//! use kiln_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_entry(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Check the `client` field in kiln.config.json")
//! }
//! ```

use std::path::PathBuf;

use miette::Report;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A library operation was misused or hit an I/O failure.
    #[error("Build error: {0}")]
    Build(#[from] kiln_build::Error),

    /// One or more targets did not compile. Diagnostics were already reported.
    #[error("Build failed for {}\n\nHint: Fix the errors reported above and run the build again", .targets.join(", "))]
    BuildFailed { targets: Vec<String> },

    /// `kiln serve` found no persisted output for a target it must serve.
    #[error("No build output for '{target}' (expected {})\n\nHint: Run `kiln build` before `kiln serve`", .manifest.display())]
    NotBuilt { target: String, manifest: PathBuf },

    #[error("File watcher error: {0}\n\nHint: Check that the project directory exists and the system watch limit is not exhausted")]
    Watch(#[from] kiln_build::WatchError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

/// Problems with `kiln.config.json`, the `KILN_*` environment or flags.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}\n\nHint: Create a kiln.config.json file or pass --config <path>", .0.display())]
    NotFound(PathBuf),

    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField { field: String, hint: String },

    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    #[error("Entry point for '{field}' not found: {}\n\nHint: Paths in kiln.config.json are relative to the project root", .path.display())]
    EntryNotFound { field: String, path: PathBuf },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Context helpers for any error convertible into [`CliError`].
pub trait ResultExt<T> {
    /// Turn a not-found I/O error into [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Append a `Hint:` line.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                CliError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}: {}", msg, err))
        })
    }
}

/// Report for `main`. Each category gets a diagnostic code.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => miette::miette!(code = "kiln::config", "{}", e),
        CliError::BuildFailed { .. } => miette::miette!(code = "kiln::build_failed", "{}", err),
        CliError::NotBuilt { .. } => miette::miette!(code = "kiln::not_built", "{}", err),
        CliError::Watch(_) => miette::miette!(code = "kiln::watch", "{}", err),
        CliError::Server(_) => miette::miette!(code = "kiln::server", "{}", err),
        _ => miette::miette!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_not_found() {
        let msg = ConfigError::NotFound(PathBuf::from("kiln.config.json")).to_string();
        assert!(msg.contains("Config file not found"));
        assert!(msg.contains("kiln.config.json"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_build_failed_lists_targets() {
        let err = CliError::BuildFailed {
            targets: vec!["client".to_string(), "api".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Build failed for client, api"));
        assert!(msg.contains("Hint:"));
    }

    #[test]
    fn test_not_built_points_at_build() {
        let err = CliError::NotBuilt {
            target: "client".to_string(),
            manifest: PathBuf::from(".kiln/client/kiln-manifest.json"),
        };
        assert!(err.to_string().contains("kiln build"));
    }

    #[test]
    fn test_cli_error_from_library_errors() {
        let err: CliError = kiln_build::Error::from(kiln_build::UsageError::UnknownTarget("admin".into())).into();
        assert!(matches!(err, CliError::Build(_)));

        let err: CliError = kiln_build::WatchError::Handshake("limit".into()).into();
        assert!(matches!(err, CliError::Watch(_)));
    }

    #[test]
    fn test_result_ext_with_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.with_path("/app/src/main.tsx").unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(_)));
    }

    #[test]
    fn test_result_ext_with_hint_and_context() {
        let result: std::result::Result<(), ConfigError> = Err(ConfigError::NotFound(PathBuf::from("x.json")));
        let msg = result.with_hint("Try creating the file").unwrap_err().to_string();
        assert!(msg.contains("Hint: Try creating the file"));

        let result: std::result::Result<(), ConfigError> = Err(ConfigError::NotFound(PathBuf::from("x.json")));
        let msg = result.context("Failed to load project").unwrap_err().to_string();
        assert!(msg.starts_with("Failed to load project: "));
    }
}
