//! Build diagnostics and the error-reporting seam.
//!
//! Bundlers hand back [`Diagnostic`]s. When a build fails the service passes
//! a summary plus every known source location to an [`ErrorReporter`]; how
//! that is presented is the reporter's business.

use std::path::{Path, PathBuf};

use miette::{LabeledSpan, MietteDiagnostic, NamedSource, Report};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A position in a source file (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    /// What is wrong at this position. May be empty.
    #[serde(default)]
    pub message: String,
}

impl Location {
    pub fn new(path: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// One message from the bundler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Option<Location>,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            severity: Severity::Warning,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Headline for a failed build: the single message, or a count plus all messages.
pub fn summarize(target: &str, diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => format!("Build '{}' failed with an unknown bundler error", target),
        [only] => format!("Build '{}' failed: {}", target, only.message),
        many => format!(
            "Build '{}' failed with {} errors: {}",
            target,
            many.len(),
            many.iter()
                .map(|d| d.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

/// Every location carried by `diagnostics`, with the diagnostic's message
/// filled in where the location has none.
pub fn locations(diagnostics: &[Diagnostic]) -> Vec<Location> {
    diagnostics
        .iter()
        .filter_map(|d| {
            d.location.clone().map(|mut location| {
                if location.message.is_empty() {
                    location.message = d.message.clone();
                }
                location
            })
        })
        .collect()
}

/// Presentation collaborator for build failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str, locations: &[Location]);
}

/// Renders source-framed errors with miette and logs them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalReporter;

impl TerminalReporter {
    pub fn new() -> Self {
        Self
    }

    /// Source-framed rendering of one location, or `None` when the source
    /// file cannot be read or the position is out of range.
    pub fn render(&self, headline: &str, location: &Location) -> Option<String> {
        let source = std::fs::read_to_string(&location.path).ok()?;
        let offset = line_col_to_offset(&source, location.line, location.column)?;
        let length = span_length(&source, offset);

        let label = if location.message.is_empty() {
            "here".to_string()
        } else {
            location.message.clone()
        };
        let diagnostic = MietteDiagnostic::new(headline.to_string())
            .with_labels(vec![LabeledSpan::at(offset..offset + length, label)]);
        let report = Report::new(diagnostic).with_source_code(NamedSource::new(
            location.path.display().to_string(),
            source,
        ));

        Some(format!("{:?}", report))
    }
}

impl ErrorReporter for TerminalReporter {
    fn report(&self, message: &str, locations: &[Location]) {
        if locations.is_empty() {
            tracing::error!("{}", message);
            return;
        }

        for location in locations {
            match self.render(message, location) {
                Some(rendered) => tracing::error!("{}", rendered),
                None if location.message.is_empty() => {
                    tracing::error!("{} ({})", message, location)
                }
                None => tracing::error!("{} ({}: {})", message, location, location.message),
            }
        }
    }
}

/// One call to [`ErrorReporter::report`], as recorded by [`MemoryReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub message: String,
    pub locations: Vec<Location>,
}

/// Keeps every report in memory. Backs the dev server's error overlay.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<ReportedError>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ReportedError> {
        self.reports.lock().clone()
    }

    pub fn last(&self) -> Option<ReportedError> {
        self.reports.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, message: &str, locations: &[Location]) {
        self.reports.lock().push(ReportedError {
            message: message.to_string(),
            locations: locations.to_vec(),
        });
    }
}

/// Fans one report out to several reporters.
pub struct TeeReporter {
    reporters: Vec<std::sync::Arc<dyn ErrorReporter>>,
}

impl TeeReporter {
    pub fn new(reporters: Vec<std::sync::Arc<dyn ErrorReporter>>) -> Self {
        Self { reporters }
    }
}

impl ErrorReporter for TeeReporter {
    fn report(&self, message: &str, locations: &[Location]) {
        for reporter in &self.reporters {
            reporter.report(message, locations);
        }
    }
}

/// Convert a 1-based line and column to a byte offset.
pub fn line_col_to_offset(source: &str, line: u32, column: u32) -> Option<usize> {
    if line == 0 {
        return None;
    }

    let mut offset = 0;
    for (index, text) in source.split_inclusive('\n').enumerate() {
        if index + 1 == line as usize {
            let text = text.trim_end_matches(['\n', '\r']);
            let column_bytes = if column <= 1 {
                0
            } else {
                text.char_indices()
                    .nth((column - 1) as usize)
                    .map(|(pos, _)| pos)
                    .unwrap_or(text.len())
            };
            return Some(offset + column_bytes);
        }
        offset += text.len();
    }
    None
}

/// Highlight the identifier at `offset`, or a single character.
fn span_length(source: &str, offset: usize) -> usize {
    let Some(remaining) = source.get(offset..) else {
        return 1;
    };
    remaining
        .char_indices()
        .find(|(_, c)| !c.is_alphanumeric() && *c != '_')
        .map(|(pos, _)| pos)
        .unwrap_or(remaining.len())
        .max(1)
}

/// Display a path relative to `root` when it is inside it.
pub fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
