//! Thumbnail service coordinating the renderer and both cache tiers
//!
//! The public entry point of the subsystem. A lookup consults the in-memory
//! FIFO cache, then the disk cache (with an mtime freshness check), and only
//! then renders fresh, populating both tiers on the way out. Per-image
//! failures never escape as errors: a missing preview is a normal,
//! displayable state.

use crate::disk::DiskCache;
use crate::fifo::FifoCache;
use crate::generate;
use crate::scan::SourceImage;
use crate::{derive_cache_key, memory_cache_key, mtime_millis, Thumbnail, ThumbnailConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How many images beyond the first the listing integration warms.
const LISTING_WARM_BATCH: usize = 9;

/// Cloneable handle to the thumbnail subsystem. Clones share the caches, so
/// one instance is created at startup and handed to every caller.
#[derive(Clone)]
pub struct ThumbnailService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ThumbnailConfig,
    generation_tag: String,
    disk: DiskCache,
    memory: FifoCache<String, Thumbnail>,
}

impl ThumbnailService {
    /// Create a service rooted at `cache_dir`, creating the directory if
    /// needed. This is the one place a failure is hard: with no cache
    /// directory, no caching is possible at all.
    pub fn new(cache_dir: impl Into<PathBuf>, config: ThumbnailConfig) -> Result<Self> {
        let disk = DiskCache::open(cache_dir)?;
        let memory = FifoCache::new(config.memory_capacity);
        let generation_tag = config.generation_tag();

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                generation_tag,
                disk,
                memory,
            }),
        })
    }

    /// Service rooted at the platform cache directory.
    pub fn with_default_dir(config: ThumbnailConfig) -> Result<Self> {
        let base = dirs::cache_dir()
            .or_else(dirs::home_dir)
            .context("Unable to find a cache directory")?;
        Self::new(base.join("atelier").join("thumbnails"), config)
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.inner.config
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.disk.dir()
    }

    /// Fetch the preview for a source image: memory cache, then disk cache,
    /// then a fresh render. Returns `None` for anything that cannot be
    /// previewed — missing file, unreadable file, undecodable content.
    pub async fn get_thumbnail(&self, source: &Path) -> Option<Thumbnail> {
        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) => metadata,
            Err(err) => {
                log::debug!("stat failed for {}: {}", source.display(), err);
                return None;
            }
        };
        let mtime = match mtime_millis(&metadata) {
            Ok(mtime) => mtime,
            Err(err) => {
                log::debug!("unusable mtime for {}: {}", source.display(), err);
                return None;
            }
        };

        let tag = &self.inner.generation_tag;
        let memory_key = memory_cache_key(source, mtime, tag);
        if let Some(hit) = self.inner.memory.get(&memory_key) {
            return Some(hit);
        }

        let disk_key = derive_cache_key(source, mtime, tag);
        if self.inner.disk.is_valid(&disk_key, mtime) {
            match tokio::fs::read(self.inner.disk.path_for(&disk_key)).await {
                Ok(bytes) => {
                    let thumb = Thumbnail::new(bytes);
                    self.inner.memory.insert(memory_key, thumb.clone());
                    return Some(thumb);
                }
                Err(err) => {
                    // Entry vanished under us (sweep, external cleanup):
                    // treat as a miss and render fresh.
                    log::debug!("disk read failed for {}: {}", source.display(), err);
                }
            }
        }

        let thumb = self.render_and_store(source, &disk_key).await?;
        self.inner.memory.insert(memory_key, thumb.clone());
        Some(thumb)
    }

    /// Render fresh and attempt to persist the disk entry. The disk write is
    /// soft: if it fails, the representation is still returned and the miss
    /// simply could not be populated.
    async fn render_and_store(&self, source: &Path, disk_key: &str) -> Option<Thumbnail> {
        let width = self.inner.config.width;
        let height = self.inner.config.height;
        let quality = self.inner.config.quality;
        let disk = self.inner.disk.clone();
        let source_buf = source.to_path_buf();
        let key = disk_key.to_string();

        // Decode/resize/encode are CPU-bound; keep them off the async workers.
        let rendered = tokio::task::spawn_blocking(move || {
            let bytes = generate::render_thumbnail(&source_buf, width, height, quality)?;
            if let Err(err) = disk.put(&key, &bytes) {
                log::warn!(
                    "Failed to write cache entry for {}: {:#}",
                    source_buf.display(),
                    err
                );
            }
            Ok::<_, anyhow::Error>(bytes)
        })
        .await;

        match rendered {
            Ok(Ok(bytes)) => Some(Thumbnail::new(bytes)),
            Ok(Err(err)) => {
                log::warn!("Failed to render {}: {:#}", source.display(), err);
                None
            }
            Err(err) => {
                log::warn!("Render task for {} was lost: {}", source.display(), err);
                None
            }
        }
    }

    /// Latency-bounded variant: races [`Self::get_thumbnail`] against a
    /// timer. On timeout the caller gets `None` immediately, but the
    /// underlying work keeps running detached and still populates both caches
    /// when it completes. Stop-waiting, not cancellation.
    pub async fn get_thumbnail_bounded(&self, source: &Path, limit: Duration) -> Option<Thumbnail> {
        let service = self.clone();
        let source_buf = source.to_path_buf();
        let task = tokio::spawn(async move { service.get_thumbnail(&source_buf).await });

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log::warn!("thumbnail task for {} panicked: {}", source.display(), err);
                None
            }
            Err(_elapsed) => None,
        }
    }

    /// Fire-and-forget cache warming for images likely to be viewed soon.
    /// Never blocks the caller; per-path failures are swallowed so one bad
    /// file cannot stop the rest. No cancellation: the task runs to the end.
    pub fn warm(&self, sources: Vec<PathBuf>) {
        if sources.is_empty() {
            return;
        }

        let service = self.clone();
        tokio::spawn(async move {
            for path in sources {
                // get_thumbnail already absorbs every per-item failure.
                let _ = service.get_thumbnail(&path).await;
            }
        });
    }

    /// Directory-listing integration: fetch the first image bounded for
    /// immediate UI feedback, then warm the next few in the background.
    pub async fn prime_listing(
        &self,
        images: &[SourceImage],
        first_timeout: Duration,
    ) -> Option<Thumbnail> {
        let first = images.first()?;
        let thumb = self.get_thumbnail_bounded(&first.path, first_timeout).await;

        let rest: Vec<PathBuf> = images
            .iter()
            .skip(1)
            .take(LISTING_WARM_BATCH)
            .map(|img| img.path.clone())
            .collect();
        self.warm(rest);

        thumb
    }

    /// Empty the memory tier, returning how many entries were dropped. Disk
    /// entries are untouched and keep serving future requests.
    pub fn clear_memory(&self) -> usize {
        self.inner.memory.clear()
    }

    /// Age-sweep the disk tier using the configured max age. Returns the
    /// number of entries deleted.
    pub fn sweep_disk(&self) -> Result<usize> {
        self.inner.disk.sweep(self.inner.config.sweep_max_age)
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            memory_entries: self.inner.memory.len(),
            memory_capacity: self.inner.memory.capacity(),
            cache_dir: self.inner.disk.dir().to_path_buf(),
        }
    }
}

/// Point-in-time cache statistics for diagnostics.
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub cache_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    fn test_config() -> ThumbnailConfig {
        ThumbnailConfig {
            width: 32,
            height: 32,
            ..ThumbnailConfig::default()
        }
    }

    fn write_test_png(path: &Path, width: u32, height: u32, seed: u8) -> Result<()> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
        });
        img.save(path)?;
        Ok(())
    }

    fn cache_entry_count(service: &ThumbnailService) -> usize {
        fs::read_dir(service.cache_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    }

    async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn miss_renders_and_populates_both_tiers() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let source = source_dir.path().join("ref.png");
        write_test_png(&source, 48, 48, 7)?;

        let thumb = service.get_thumbnail(&source).await.expect("render");
        assert!(!thumb.is_empty());
        assert_eq!(service.config().width, 32);
        assert_eq!(service.stats().memory_entries, 1);
        assert_eq!(cache_entry_count(&service), 1);
        Ok(())
    }

    #[tokio::test]
    async fn repeated_gets_are_byte_identical() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let source = source_dir.path().join("ref.png");
        write_test_png(&source, 48, 48, 7)?;

        let first = service.get_thumbnail(&source).await.expect("first");
        let second = service.get_thumbnail(&source).await.expect("second");
        assert_eq!(first, second);

        // Rebuilding from the disk tier must serve the same bytes, not a
        // re-render with fresh compression artifacts.
        service.clear_memory();
        let from_disk = service.get_thumbnail(&source).await.expect("from disk");
        assert_eq!(first, from_disk);
        assert_eq!(cache_entry_count(&service), 1);
        Ok(())
    }

    #[tokio::test]
    async fn source_mutation_invalidates_cached_entry() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let source = source_dir.path().join("ref.png");
        write_test_png(&source, 48, 48, 1)?;
        let before = service.get_thumbnail(&source).await.expect("before");

        // Rewrite with different content; the sleep guarantees the mtime
        // moves even on coarse filesystem clocks.
        std::thread::sleep(Duration::from_millis(20));
        write_test_png(&source, 48, 48, 250)?;

        let after = service.get_thumbnail(&source).await.expect("after");
        assert_ne!(before, after);

        // New key, new disk entry; the stale one is left for the sweep.
        assert_eq!(cache_entry_count(&service), 2);
        assert_eq!(service.stats().memory_entries, 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_is_absent_not_an_error() -> Result<()> {
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let gone = cache_dir.path().join("never-existed.png");
        assert_eq!(service.get_thumbnail(&gone).await, None);
        assert_eq!(service.stats().memory_entries, 0);
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_source_is_absent_and_pollutes_nothing() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let source = source_dir.path().join("broken.png");
        fs::write(&source, b"definitely not pixels")?;

        assert_eq!(service.get_thumbnail(&source).await, None);
        assert_eq!(service.stats().memory_entries, 0);
        assert_eq!(cache_entry_count(&service), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bounded_lookup_stops_waiting_without_cancelling() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let source = source_dir.path().join("ref.png");
        write_test_png(&source, 256, 256, 9)?;

        // A zero budget always loses the race against a cold render.
        let bounded = service
            .get_thumbnail_bounded(&source, Duration::ZERO)
            .await;
        assert_eq!(bounded, None);

        // The detached task keeps going and still populates both caches.
        let probe = service.clone();
        wait_until("background render to land", move || {
            probe.stats().memory_entries == 1
        })
        .await;
        assert_eq!(cache_entry_count(&service), 1);

        // Now an unbounded call is a straight cache hit.
        assert!(service.get_thumbnail(&source).await.is_some());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn warming_survives_bad_files_and_fills_caches() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let mut paths = Vec::new();
        for i in 0..3 {
            let path = source_dir.path().join(format!("ok{}.png", i));
            write_test_png(&path, 40, 40, i as u8)?;
            paths.push(path);
        }
        let corrupt = source_dir.path().join("corrupt.png");
        fs::write(&corrupt, b"junk")?;
        // A bad file in the middle must not stop the rest.
        paths.insert(1, corrupt);
        paths.insert(2, source_dir.path().join("missing.png"));

        service.warm(paths);

        let probe = service.clone();
        wait_until("warming to finish", move || {
            probe.stats().memory_entries == 3
        })
        .await;
        assert_eq!(cache_entry_count(&service), 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn prime_listing_serves_first_and_warms_the_rest() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        for i in 0..4 {
            write_test_png(&source_dir.path().join(format!("{}.png", i)), 40, 40, i as u8)?;
        }
        let images = crate::scan_directory(source_dir.path());
        assert_eq!(images.len(), 4);

        let first = service
            .prime_listing(&images, Duration::from_secs(10))
            .await;
        assert!(first.is_some());

        let probe = service.clone();
        wait_until("listing warm-up", move || probe.stats().memory_entries == 4).await;
        Ok(())
    }

    #[tokio::test]
    async fn clear_memory_leaves_disk_tier_intact() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let service = ThumbnailService::new(cache_dir.path(), test_config())?;

        let a = source_dir.path().join("a.png");
        let b = source_dir.path().join("b.png");
        write_test_png(&a, 40, 40, 1)?;
        write_test_png(&b, 40, 40, 2)?;
        service.get_thumbnail(&a).await.expect("a");
        service.get_thumbnail(&b).await.expect("b");

        assert_eq!(service.clear_memory(), 2);
        assert_eq!(service.stats().memory_entries, 0);
        assert_eq!(cache_entry_count(&service), 2);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_disk_uses_configured_max_age() -> Result<()> {
        let source_dir = tempdir()?;
        let cache_dir = tempdir()?;
        let config = ThumbnailConfig {
            sweep_max_age: Duration::ZERO,
            ..test_config()
        };
        let service = ThumbnailService::new(cache_dir.path(), config)?;

        let source = source_dir.path().join("ref.png");
        write_test_png(&source, 40, 40, 3)?;
        service.get_thumbnail(&source).await.expect("render");

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(service.sweep_disk()?, 1);
        assert_eq!(cache_entry_count(&service), 0);

        // Swept entries are regenerated on the next request.
        service.clear_memory();
        assert!(service.get_thumbnail(&source).await.is_some());
        Ok(())
    }
}
