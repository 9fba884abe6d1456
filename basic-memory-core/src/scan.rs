//! File-system scanning and change detection
//!
//! [`scan_tree`] walks a project root and hashes every non-hidden file.
//! [`diff_changes`] compares that scan against the checksums currently
//! in the store and classifies each path as new, modified, deleted, or
//! moved.

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Recursively walk `root`, skipping dotfiles and dot-directories at
/// every level, and hash every regular file found.
///
/// Returns a map of POSIX-style paths (relative to `root`) to their
/// content checksum.
pub fn scan_tree(root: &Path) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut HashMap<String, String>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::Scan {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::Scan {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type().map_err(|e| Error::Scan {
            path: path.clone(),
            source: e,
        })?;

        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let bytes = std::fs::read(&path).map_err(|e| Error::Scan {
                path: path.clone(),
                source: e,
            })?;
            let rel = relative_posix_path(root, &path);
            out.insert(rel, hash_bytes(&bytes));
        }
    }

    Ok(())
}

fn relative_posix_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A file's ctime/mtime, used as the `created`/`modified` fallback when
/// a Markdown file's frontmatter declares neither.
pub fn file_times(path: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let metadata = std::fs::metadata(path).map_err(|e| Error::Scan {
        path: path.to_path_buf(),
        source: e,
    })?;
    let ctime = Utc.timestamp_opt(metadata.ctime(), 0).single().unwrap_or_else(Utc::now);
    let mtime = Utc.timestamp_opt(metadata.mtime(), 0).single().unwrap_or_else(Utc::now);
    Ok((ctime, mtime))
}

/// The outcome of comparing a fresh scan against the store's recorded
/// checksums.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// (old_path, new_path) pairs sharing an identical checksum
    pub moves: Vec<(String, String)>,
}

/// Diff a fresh `scan` against `stored` checksums, pairing up moves by
/// matching checksum (at most one move per checksum).
pub fn diff_changes(
    scan: &HashMap<String, String>,
    stored: &HashMap<String, String>,
) -> ChangeSet {
    let mut new = Vec::new();
    let mut modified = Vec::new();
    let mut deleted = Vec::new();

    for (path, checksum) in scan {
        match stored.get(path) {
            None => new.push(path.clone()),
            Some(old_checksum) if old_checksum != checksum => modified.push(path.clone()),
            _ => {}
        }
    }
    for path in stored.keys() {
        if !scan.contains_key(path) {
            deleted.push(path.clone());
        }
    }

    new.sort();
    modified.sort();
    deleted.sort();

    let moves = pair_moves(&mut new, &mut deleted, scan, stored);

    ChangeSet {
        new,
        modified,
        deleted,
        moves,
    }
}

fn pair_moves(
    new: &mut Vec<String>,
    deleted: &mut Vec<String>,
    scan: &HashMap<String, String>,
    stored: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut moves = Vec::new();
    let mut used_checksums = std::collections::HashSet::new();

    let mut i = 0;
    while i < new.len() {
        let new_path = &new[i];
        let checksum = &scan[new_path];

        if used_checksums.contains(checksum) {
            i += 1;
            continue;
        }

        let old_path = deleted
            .iter()
            .find(|old| stored[*old] == *checksum)
            .cloned();

        if let Some(old_path) = old_path {
            used_checksums.insert(checksum.clone());
            deleted.retain(|p| p != &old_path);
            moves.push((old_path, new_path.clone()));
            new.remove(i);
        } else {
            i += 1;
        }
    }

    moves
}
