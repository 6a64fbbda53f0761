use thiserror::Error;

use kiln_build::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the adapter itself, as opposed to rejected sources.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid output path: {0}")]
    InvalidOutputPath(String),

    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("Virtual entry: {0}")]
    VirtualEntry(String),
}

impl From<Error> for Diagnostic {
    fn from(error: Error) -> Self {
        Diagnostic::error(error.to_string())
    }
}
