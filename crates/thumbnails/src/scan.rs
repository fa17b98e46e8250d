//! Recursive directory scanning for reference images
//!
//! Walks a collection root depth-unbounded and returns every file whose
//! extension is on the image allow-list. Unreadable subdirectories are
//! skipped so a single permission problem never aborts the scan.

use crate::mtime_millis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions recognized as images, matched case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "svg"];

/// One image file found during a scan.
///
/// Ephemeral scan output; the host application persists a snapshot of these
/// records per collection, so the type is serde-serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceImage {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// Display name (the file name component).
    pub name: String,
    /// Path relative to the scanned collection root.
    pub relative_path: PathBuf,
    /// Filesystem mtime at scan time, milliseconds since the epoch.
    pub modified_millis: u64,
}

/// Scan a directory tree for image files.
///
/// Output order is enumeration order, not sorted. A missing or unreadable
/// root yields an empty list; unreadable subtrees are skipped and their
/// siblings still scanned. No side effects beyond filesystem reads.
pub fn scan_directory(root: &Path) -> Vec<SourceImage> {
    let mut images = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("skipping unreadable entry under {}: {}", root.display(), err);
                None
            }
        })
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension() else {
            continue;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        // A file that vanishes or turns unreadable between listing and stat
        // is dropped from the result, not an error.
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                log::debug!("skipping {}: {}", path.display(), err);
                continue;
            }
        };
        let modified_millis = match mtime_millis(&metadata) {
            Ok(millis) => millis,
            Err(err) => {
                log::debug!("skipping {}: {}", path.display(), err);
                continue;
            }
        };

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();

        images.push(SourceImage {
            path: path.to_path_buf(),
            name,
            relative_path,
            modified_millis,
        });
    }

    images
}
