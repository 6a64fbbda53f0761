//! Writing Rolldown output to disk.
//!
//! Entry chunks and stylesheets nothing else refers to are renamed to
//! `<entry>-<hash>.<ext>`, where the hash is the first eight hex digits of
//! the blake3 digest of the file contents. Files other outputs refer to
//! (shared chunks, source maps) keep the name Rolldown gave them so the
//! references stay valid.
//!
//! All paths are validated to stay inside the output directory, and every
//! file goes through a temp file plus rename so a reader never sees a
//! partially written bundle file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::error::{Error, Result};

const HASH_LEN: usize = 8;

/// One file produced by a compile, before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    /// Path relative to the output directory, as Rolldown named it.
    pub filename: String,
    pub contents: Vec<u8>,
}

impl Emitted {
    pub fn new(filename: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            contents: contents.into(),
        }
    }
}

/// Final relative name for every emitted file, in emission order.
pub fn plan<'a>(emitted: &'a [Emitted], entry_names: &[&str]) -> Vec<(String, &'a [u8])> {
    emitted
        .iter()
        .map(|file| {
            let name = if is_referenced(file, emitted) {
                file.filename.clone()
            } else {
                hashed_name(&file.filename, &file.contents, entry_names)
            };
            (name, file.contents.as_slice())
        })
        .collect()
}

/// `<entry>-<hash>.<ext>` for a script or stylesheet emitted for one of
/// `entry_names`; anything else keeps `filename`.
pub fn hashed_name(filename: &str, contents: &[u8], entry_names: &[&str]) -> String {
    let path = Path::new(filename);
    let (Some(stem), Some(ext)) = (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|s| s.to_str()),
    ) else {
        return filename.to_string();
    };
    if !matches!(ext, "js" | "mjs" | "cjs" | "css") {
        return filename.to_string();
    }

    // longest entry name the stem starts with, so `admin-panel` beats `admin`
    let entry = entry_names
        .iter()
        .filter(|name| stem == **name || stem.starts_with(&format!("{}-", name)))
        .max_by_key(|name| name.len());
    let Some(entry) = entry else {
        return filename.to_string();
    };

    let digest = blake3::hash(contents).to_hex();
    let file = format!("{}-{}.{}", entry, &digest[..HASH_LEN], ext);
    match filename.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, file),
        None => file,
    }
}

fn is_referenced(file: &Emitted, emitted: &[Emitted]) -> bool {
    let basename = file.filename.rsplit('/').next().unwrap_or(&file.filename);
    emitted
        .iter()
        .filter(|other| other.filename != file.filename && can_refer(&other.filename))
        .any(|other| String::from_utf8_lossy(&other.contents).contains(basename))
}

// Source maps name the file they describe; that is not a reference.
fn can_refer(filename: &str) -> bool {
    !filename.ends_with(".map")
}

/// Write `files` under `dir`, returning the absolute paths written.
pub fn write_bundle(dir: &Path, files: &[(String, &[u8])]) -> Result<Vec<PathBuf>> {
    let dir = normalize_dir(dir)?;
    fs::create_dir_all(&dir).map_err(|e| {
        Error::WriteFailure(format!(
            "Failed to create output directory '{}': {}",
            dir.display(),
            e
        ))
    })?;

    let mut operations = Vec::with_capacity(files.len());
    for (name, contents) in files {
        operations.push((validate_output_path(&dir, name)?, *contents));
    }
    write_files_atomic(&operations)?;
    Ok(operations.into_iter().map(|(path, _)| path).collect())
}

/// Delete files from an earlier compile that the latest one did not write.
pub fn remove_stale(previous: &[PathBuf], current: &[PathBuf]) {
    let keep: BTreeSet<&PathBuf> = current.iter().collect();
    for path in previous.iter().filter(|path| !keep.contains(path)) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Failed to remove stale output {}: {}", path.display(), e);
            }
        }
    }
}

fn normalize_dir(dir: &Path) -> Result<PathBuf> {
    let cleaned = dir.clean();
    if cleaned.is_absolute() {
        return Ok(cleaned);
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::InvalidOutputPath(format!("Failed to get current directory: {}", e)))?;
    Ok(cwd.join(cleaned).clean())
}

fn validate_output_path(base_dir: &Path, filename: &str) -> Result<PathBuf> {
    if filename.contains('\0') {
        return Err(Error::InvalidOutputPath(
            "Filename contains null byte".to_string(),
        ));
    }

    let full_path = base_dir.join(Path::new(filename).clean()).clean();
    if !full_path.starts_with(base_dir) || full_path == base_dir {
        return Err(Error::InvalidOutputPath(format!(
            "Path '{}' escapes output directory '{}'",
            filename,
            base_dir.display()
        )));
    }
    Ok(full_path)
}

fn write_files_atomic(operations: &[(PathBuf, &[u8])]) -> Result<()> {
    let mut temp_files: Vec<(PathBuf, PathBuf)> = Vec::new();

    for (target, contents) in operations {
        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                cleanup_temp_files(&temp_files);
                return Err(Error::WriteFailure(format!(
                    "Failed to create directory '{}': {}",
                    parent.display(),
                    e
                )));
            }
        }

        let mut temp = target.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        if let Err(e) = fs::write(&temp, contents) {
            cleanup_temp_files(&temp_files);
            return Err(Error::WriteFailure(format!(
                "Failed to write temporary file '{}': {}",
                temp.display(),
                e
            )));
        }
        temp_files.push((temp, target.clone()));
    }

    for (temp, target) in &temp_files {
        if let Err(e) = fs::rename(temp, target) {
            cleanup_temp_files(&temp_files);
            return Err(Error::WriteFailure(format!(
                "Failed to rename '{}' to '{}': {}",
                temp.display(),
                target.display(),
                e
            )));
        }
    }
    Ok(())
}

fn cleanup_temp_files(temp_files: &[(PathBuf, PathBuf)]) {
    for (temp, _) in temp_files {
        if temp.exists() {
            if let Err(e) = fs::remove_file(temp) {
                tracing::warn!("Failed to clean up temporary file '{}': {}", temp.display(), e);
            }
        }
    }
}
