//! Thumbnail rendering pipeline
//!
//! Decodes a source image, cover-fits it to the target dimensions, and
//! re-encodes it as JPEG at the configured quality. The file-writing variant
//! stages output through a temp file in the destination directory so a
//! partially-written thumbnail is never observable as a complete one.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageReader};
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Render a thumbnail for a source image, returning the encoded JPEG bytes.
///
/// Any open/decode/resize/encode failure is an error the caller treats as
/// "no thumbnail available".
pub fn render_thumbnail(source: &Path, width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let img = ImageReader::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to probe format of {}", source.display()))?
        .decode()
        .with_context(|| format!("Failed to decode {}", source.display()))?;

    let fitted = cover_fit(img, width, height);
    encode_jpeg(&fitted, quality)
}

/// File-writing variant of [`render_thumbnail`].
///
/// On failure no file is created at `dest`.
pub fn render_to_file(
    source: &Path,
    dest: &Path,
    width: u32,
    height: u32,
    quality: u8,
) -> Result<()> {
    let bytes = render_thumbnail(source, width, height, quality)?;
    write_atomic(dest, &bytes)
}

/// Write bytes to `dest` via a sibling temp file and an atomic rename.
/// Concurrent writers for the same destination race benignly: last rename
/// wins, and both wrote identical content.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = dest
        .parent()
        .context("destination path has no parent directory")?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .context("Failed to write thumbnail bytes")?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("Failed to persist {}", dest.display()))?;

    Ok(())
}

/// Cover-fit: scale and center-crop so the output exactly fills the target,
/// enlarging sources smaller than the target. Never letterboxes.
fn cover_fit(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_to_fill(width, height, FilterType::Lanczos3)
}

/// Encode as JPEG at the given 0-100 quality. JPEG has no alpha channel, so
/// the image is flattened to RGB first.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());

    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .context("Failed to encode JPEG")?;

    Ok(buffer.into_inner())
}
