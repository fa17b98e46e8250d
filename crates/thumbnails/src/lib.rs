//! Thumbnail generation and caching library for Atelier
//!
//! This crate provides the preview pipeline behind Atelier's collection
//! browser: scanning directories of reference images, rendering fixed-size
//! JPEG thumbnails, and caching them in memory (bounded, FIFO) and on disk
//! (persistent, age-swept). The surrounding application resolves collection
//! previews through [`ThumbnailService`] lazily, as images come into view.
//!
//! # Features
//!
//! - **Recursive scanning**: extension-filtered directory walks that tolerate
//!   unreadable subtrees
//! - **Dual caching**: bounded in-memory FIFO cache + persistent disk cache
//!   keyed by content-version hashes
//! - **Cover-fit rendering**: scale-and-crop to exact target dimensions,
//!   re-encoded as JPEG at a fixed quality
//! - **Latency-bounded lookups**: callers can stop waiting while generation
//!   continues in the background
//! - **Background warming**: fire-and-forget pre-generation for images likely
//!   to be viewed soon

pub mod disk;
pub mod fifo;
pub mod generate;
pub mod scan;
pub mod service;

pub use disk::DiskCache;
pub use fifo::FifoCache;
pub use scan::{scan_directory, SourceImage};
pub use service::{ServiceStats, ThumbnailService};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Bumped whenever the rendered output changes in a way the dimension and
/// quality parameters alone do not capture (encoder swap, crop policy change).
/// Old cache entries are orphaned, never reinterpreted.
const FORMAT_VERSION: u32 = 3;

/// File extension shared by every disk cache entry. Part of the cache key so
/// the key doubles as a safe filename.
pub const CACHE_FILE_EXT: &str = "jpg";

/// Renderer and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub memory_capacity: usize,
    pub sweep_max_age: Duration,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            quality: 80,
            memory_capacity: 500,
            sweep_max_age: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
        }
    }
}

impl ThumbnailConfig {
    /// Version marker for the current rendering parameters. Any change to the
    /// target dimensions, quality, or output format changes the tag, which
    /// changes every derived cache key.
    pub fn generation_tag(&self) -> String {
        format!(
            "{}x{}q{}-v{}",
            self.width, self.height, self.quality, FORMAT_VERSION
        )
    }
}

/// Derive the disk cache key for a source file at a given content version.
///
/// Deterministic: the same (path, mtime, tag) triple always produces the same
/// key, so cache hits survive process restarts. The hash is SHA-256 truncated
/// to 128 bits, hex-encoded, with the fixed output extension appended.
pub fn derive_cache_key(source_path: &Path, mtime_millis: u64, generation_tag: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source_path.to_string_lossy().as_bytes());
    hasher.update(mtime_millis.to_le_bytes());
    hasher.update(generation_tag.as_bytes());

    let digest = hasher.finalize();
    format!("{}.{}", hex::encode(&digest[..16]), CACHE_FILE_EXT)
}

/// Compound key for the in-memory cache. Keeps the raw path/mtime/tag fields
/// visible so the memory tier invalidates on exactly the same events as the
/// disk tier.
pub fn memory_cache_key(source_path: &Path, mtime_millis: u64, generation_tag: &str) -> String {
    format!(
        "{}:{}:{}",
        source_path.display(),
        mtime_millis,
        generation_tag
    )
}

/// Filesystem mtime as milliseconds since the epoch.
pub(crate) fn mtime_millis(metadata: &std::fs::Metadata) -> anyhow::Result<u64> {
    let modified = metadata.modified()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH)?;
    Ok(since_epoch.as_millis() as u64)
}

/// Rendered preview in its in-process transferable form: shared JPEG bytes.
///
/// Clones are cheap and byte-identical, which is what makes repeated cache
/// hits indistinguishable from each other. The display layer can take the
/// bytes directly or embed them with [`Thumbnail::to_data_uri`].
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    bytes: Arc<[u8]>,
}

impl Thumbnail {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Embedded-data form for display surfaces that take URIs.
    pub fn to_data_uri(&self) -> String {
        use base64::prelude::*;
        format!(
            "data:image/jpeg;base64,{}",
            BASE64_STANDARD.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thumbnail")
            .field("len", &self.bytes.len())
            .finish()
    }
}
