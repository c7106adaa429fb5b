use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Smallest csv log in `dir`. The log rotator embeds dates in file names, so
/// lexicographic order is chronological order. Fails with `NoLogsFound` when
/// the directory holds no csv files at all.
pub fn first_log_file(dir: &Path) -> Result<PathBuf> {
    smallest_after(dir, None)?.ok_or_else(|| IngestError::NoLogsFound(dir.to_path_buf()))
}

/// Smallest csv log in `dir` whose file name sorts strictly after `after`,
/// or None when no newer file exists yet.
pub fn next_log_file(dir: &Path, after: &str) -> Result<Option<PathBuf>> {
    smallest_after(dir, Some(after))
}

fn smallest_after(dir: &Path, after: Option<&str>) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| IngestError::DirectoryUnreadable {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut best: Option<(String, PathBuf)> = None;

    for entry in entries {
        let entry = entry.map_err(|e| IngestError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if let Some(after) = after {
            if name.as_str() <= after {
                continue;
            }
        }
        match &best {
            Some((current, _)) if *current <= name => {}
            _ => best = Some((name, path)),
        }
    }

    Ok(best.map(|(_, path)| path))
}
