//! Guideline directory loader.
//!
//! Walks a guidelines directory, reads plain-text guideline files and tags
//! each with a specialty derived from its path. Text extraction from PDFs
//! happens upstream; a PDF without an extracted text sibling is reported as a
//! per-document failure rather than aborting the load.

use std::fs;
use std::path::{Path, PathBuf};

use super::index::IngestFailure;
use super::types::{GuidelineDocument, DEFAULT_SPECIALTY};
use super::StorageError;

/// Directory names recognized as specialty tags.
pub const KNOWN_SPECIALTIES: &[&str] = &[
    "cardiology",
    "neurology",
    "surgery",
    "pediatrics",
    "oncology",
    "emergency",
    "general",
    "infectious",
    "pulmonary",
    "respiratory",
    "icu",
    "critical",
];

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Documents read from disk plus the files that could not be read.
#[derive(Debug, Clone, Default)]
pub struct LoadedGuidelines {
    pub documents: Vec<GuidelineDocument>,
    pub failures: Vec<IngestFailure>,
}

/// Specialty tag for a file: the first path component (relative to the
/// guidelines root) naming a known specialty, else `general`.
pub fn specialty_from_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .map(str::to_lowercase)
        .find(|part| KNOWN_SPECIALTIES.contains(&part.as_str()))
        .unwrap_or_else(|| DEFAULT_SPECIALTY.to_string())
}

/// Load every guideline file under `root`, recursively, in path order.
///
/// Only an unreadable `root` is an error; individual files fail softly.
pub fn load_guideline_dir(root: &Path) -> Result<LoadedGuidelines, StorageError> {
    let mut files = Vec::new();
    collect_files(root, &mut files).map_err(|source| StorageError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    files.sort();

    let mut loaded = LoadedGuidelines::default();
    for path in &files {
        let name = file_name(path);
        match load_file(root, path) {
            Ok(Some(document)) => {
                tracing::debug!(source = %name, "Loaded guideline");
                loaded.documents.push(document);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "Guideline file not loaded");
                loaded.failures.push(IngestFailure {
                    source_document: name,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        documents = loaded.documents.len(),
        failures = loaded.failures.len(),
        "Guideline directory scanned"
    );
    Ok(loaded)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// `Ok(None)` for files that are silently skipped: hidden files, unrelated
/// formats, and PDFs whose extracted text sits next to them.
fn load_file(root: &Path, path: &Path) -> Result<Option<GuidelineDocument>, StorageError> {
    if file_name(path).starts_with('.') {
        return Ok(None);
    }

    match extension(path).as_deref() {
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => {
            let text = fs::read_to_string(path).map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let relative = path.strip_prefix(root).unwrap_or(path);
            Ok(Some(GuidelineDocument {
                source_document: file_name(path),
                specialty: Some(specialty_from_path(relative)),
                text,
            }))
        }
        Some("pdf") => {
            let has_extracted_text = TEXT_EXTENSIONS
                .iter()
                .any(|ext| path.with_extension(ext).is_file());
            if has_extracted_text {
                Ok(None)
            } else {
                Err(StorageError::UnsupportedFormat(path.to_path_buf()))
            }
        }
        _ => Ok(None),
    }
}
