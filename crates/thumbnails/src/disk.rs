//! Persistent disk cache for rendered thumbnails
//!
//! A flat directory of JPEG files named by cache key. Presence is existence;
//! there is no manifest or index. Each entry's own mtime doubles as a
//! freshness witness against source edits, and an age-based sweep reclaims
//! entries that have not been accessed recently. Disk entries are cache, not
//! source data: anything deleted here is regenerated on the next request.

use crate::{generate, mtime_millis, CACHE_FILE_EXT};
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handle to one cache directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open (creating if needed) a cache directory. Failure here is the one
    /// hard error in the subsystem: without the directory no caching works.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an entry for `key` would live at, whether or not it exists.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    /// An entry is valid only if present and its own mtime is at or after the
    /// source's. Guards against a source edit too fast for mtime granularity
    /// to move the cache key, and against a half-superseded entry being read
    /// as current.
    pub fn is_valid(&self, key: &str, source_mtime_millis: u64) -> bool {
        let Some(path) = self.get(key) else {
            return false;
        };
        let Ok(metadata) = fs::metadata(&path) else {
            return false;
        };
        match mtime_millis(&metadata) {
            Ok(entry_mtime) => entry_mtime >= source_mtime_millis,
            Err(_) => false,
        }
    }

    /// Store rendered bytes under `key`. The write is staged through a temp
    /// file, so concurrent puts for the same key race benignly and a partial
    /// file is never observable.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        generate::write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// One pass over the cache directory deleting entries whose last access
    /// time is strictly older than `max_age`. Returns the number deleted.
    ///
    /// Entries that vanish mid-sweep were deleted by someone else; that is
    /// success, not an error. Runs at startup and on user request, never on a
    /// timer.
    pub fn sweep(&self, max_age: Duration) -> Result<usize> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list cache directory: {}", self.dir.display()))?;

        let mut deleted = 0;
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != CACHE_FILE_EXT) {
                continue;
            }

            // Vanished between listing and stat: already gone, move on.
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            // atime where the filesystem tracks it, mtime otherwise.
            let Ok(stamp) = metadata.accessed().or_else(|_| metadata.modified()) else {
                continue;
            };
            let Ok(age) = stamp.elapsed() else {
                continue;
            };

            if age > max_age {
                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => log::warn!("Failed to sweep {}: {}", path.display(), err),
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn open_creates_the_directory() -> Result<()> {
        let temp_dir = tempdir()?;
        let dir = temp_dir.path().join("nested/cache");

        let cache = DiskCache::open(&dir)?;

        assert!(dir.is_dir());
        assert_eq!(cache.dir(), dir);
        Ok(())
    }

    #[test]
    fn put_then_get_roundtrips() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache = DiskCache::open(temp_dir.path())?;

        assert_eq!(cache.get("deadbeef.jpg"), None);

        let path = cache.put("deadbeef.jpg", b"jpeg bytes")?;
        assert_eq!(cache.get("deadbeef.jpg"), Some(path.clone()));
        assert_eq!(fs::read(&path)?, b"jpeg bytes");
        Ok(())
    }

    #[test]
    fn validity_requires_entry_at_least_as_new_as_source() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache = DiskCache::open(temp_dir.path())?;

        let path = cache.put("cafe.jpg", b"bytes")?;
        let entry_mtime = mtime_millis(&fs::metadata(&path)?)?;

        // Source older or same age as the entry: valid.
        assert!(cache.is_valid("cafe.jpg", entry_mtime));
        assert!(cache.is_valid("cafe.jpg", entry_mtime.saturating_sub(10_000)));

        // Source newer than the entry: stale.
        assert!(!cache.is_valid("cafe.jpg", entry_mtime + 10_000));

        // Absent entry is never valid.
        assert!(!cache.is_valid("missing.jpg", 0));
        Ok(())
    }

    #[test]
    fn sweep_deletes_only_stale_fixed_extension_entries() -> Result<()> {
        let temp_dir = tempdir()?;
        let cache = DiskCache::open(temp_dir.path())?;

        cache.put("a.jpg", b"a")?;
        cache.put("b.jpg", b"b")?;
        cache.put("c.jpg", b"c")?;
        fs::write(temp_dir.path().join("notes.txt"), b"not a cache entry")?;

        // Everything was just written, so a generous max age deletes nothing.
        assert_eq!(cache.sweep(Duration::from_secs(3600))?, 0);

        // With a zero max age every entry is stale.
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.sweep(Duration::ZERO)?, 3);
        assert_eq!(cache.get("a.jpg"), None);
        assert!(temp_dir.path().join("notes.txt").exists());

        // A second pass finds nothing left to delete.
        assert_eq!(cache.sweep(Duration::ZERO)?, 0);
        Ok(())
    }
}
