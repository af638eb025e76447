//! Filesystem discovery: dataset files and compressed artifact sets.

use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::error::CoreError;

/// Recursively list files under `root` whose path relative to `root`
/// matches `pattern`.
///
/// `*` does not cross directory boundaries; `**` does. The returned paths
/// are relative to `root` and sorted.
pub fn discover(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, CoreError> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            CoreError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();

    tracing::info!(
        root = %root.display(),
        pattern,
        count = files.len(),
        "Discovered dataset files",
    );
    Ok(files)
}

/// Collect every file next to `artifact` whose name starts with the
/// artifact's stem.
///
/// Codecs may split one logical stream into siblings with different
/// suffixes (`cube.bin`, `cube.bin.h`, `cube.attr`); size-derived metrics
/// need all of them. The result is sorted.
pub async fn collect_artifacts(artifact: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let Some(parent) = artifact.parent() else {
        return Ok(Vec::new());
    };
    let Some(stem) = artifact.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };

    let mut entries = match tokio::fs::read_dir(parent).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::io(parent, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoreError::io(parent, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file && entry.file_name().to_string_lossy().starts_with(&stem) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
