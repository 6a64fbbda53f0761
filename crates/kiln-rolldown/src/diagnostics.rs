//! Diagnostic extraction from Rolldown errors.
//!
//! Rolldown's error types are only inspected through their `Debug` output,
//! which keeps this crate insulated from upstream API churn. Every
//! `path:line:column` mention becomes one located diagnostic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use kiln_build::{Diagnostic, Location};
use regex::Regex;

const MAX_MESSAGE_LEN: usize = 400;

static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"((?:[A-Za-z]:)?[^\s"'`()\[\]{}:,]+\.(?:tsx?|jsx?|mjs|cjs|mts|cts|css|json)):(\d+):(\d+)"#)
        .unwrap_or_else(|e| panic!("location pattern is invalid: {}", e))
});

static MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"message: "((?:[^"\\]|\\.)*)""#).unwrap_or_else(|e| panic!("message pattern is invalid: {}", e))
});

/// Diagnostics for a failed Rolldown build. Relative paths are resolved
/// against `root`. Never empty.
pub fn extract(error: &dyn std::fmt::Debug, root: &Path) -> Vec<Diagnostic> {
    let text = format!("{error:?}");
    let message = headline(&text);

    let mut seen = BTreeSet::new();
    let mut diagnostics = Vec::new();
    for captures in LOCATION.captures_iter(&text) {
        let (Some(path), Some(line), Some(column)) = (captures.get(1), captures.get(2), captures.get(3)) else {
            continue;
        };
        let (Ok(line), Ok(column)) = (line.as_str().parse::<u32>(), column.as_str().parse::<u32>()) else {
            continue;
        };
        let path = resolve(path.as_str(), root);
        if !seen.insert((path.clone(), line, column)) {
            continue;
        }
        diagnostics.push(Diagnostic::error(message.clone()).at(Location::new(path, line, column)));
    }

    if diagnostics.is_empty() {
        diagnostics.push(Diagnostic::error(message));
    }
    diagnostics
}

/// The most readable one-line summary of a debug dump: an embedded
/// `message: "..."` field when there is one, else the first non-empty line.
fn headline(text: &str) -> String {
    let raw = MESSAGE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\n", " ").replace("\\\"", "\""))
        .unwrap_or_else(|| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("Rolldown build failed")
                .to_string()
        });

    if raw.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = raw.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{}...", truncated)
    } else {
        raw
    }
}

fn resolve(path: &str, root: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct FakeDiagnostic {
        kind: &'static str,
        message: &'static str,
    }

    #[test]
    fn test_locations_are_extracted() {
        let error = FakeDiagnostic {
            kind: "ParseError",
            message: "Unexpected token (src/main.tsx:3:14)",
        };
        let diags = extract(&error, Path::new("/app"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "Unexpected token (src/main.tsx:3:14)");

        let location = diags[0].location.as_ref().unwrap();
        assert_eq!(location.path, Path::new("/app/src/main.tsx"));
        assert_eq!((location.line, location.column), (3, 14));
    }

    #[test]
    fn test_duplicate_mentions_collapse() {
        let error = vec![
            "Could not resolve './missing' in /app/src/page.ts:1:20",
            "at /app/src/page.ts:1:20",
            "at /app/src/other.js:7:1",
        ];
        let diags = extract(&error, Path::new("/app"));
        let paths: Vec<_> = diags
            .iter()
            .map(|d| d.location.as_ref().unwrap().path.clone())
            .collect();
        assert_eq!(paths, vec![PathBuf::from("/app/src/page.ts"), PathBuf::from("/app/src/other.js")]);
    }

    #[test]
    fn test_unlocated_error_still_yields_one_diagnostic() {
        let diags = extract(&"entry module not found", Path::new("/app"));
        assert_eq!(diags.len(), 1);
        assert!(diags[0].location.is_none());
        assert_eq!(diags[0].message, "\"entry module not found\"");
    }

    #[test]
    fn test_long_messages_are_truncated() {
        let long = "x".repeat(1000);
        let diags = extract(&long, Path::new("/app"));
        assert!(diags[0].message.ends_with("..."));
        assert_eq!(diags[0].message.chars().count(), MAX_MESSAGE_LEN + 3);
    }
}
