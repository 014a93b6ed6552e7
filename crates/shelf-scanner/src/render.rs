//! Cover thumbnail rendering.
//!
//! [`ThumbnailRenderer`] turns a cover source (an image file, or a PDF whose
//! first page is a scanned image) into a JPEG of a target width, caching the
//! result in a [`ThumbnailStore`] under a [`ThumbKey`].
//!
//! # Pipeline
//!
//! 1. Fingerprint the source (BLAKE3 over bytes + mtime) and build the key
//! 2. Return a cache hit, or join an in-flight render of the same key
//! 3. Decode with an allocation limit; oversized sources take the fast
//!    sampling resize path
//! 4. Flatten transparency onto white, scale to the target width (never up)
//! 5. Encode as JPEG, store, return

use std::fs::File;
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use camino::Utf8Path;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use shelf_core::{Fingerprint, ThumbKey, ThumbnailConfig};
use tracing::{debug, warn};

use crate::cache::{SingleFlight, ThumbnailStore};
use crate::error::RenderError;
use crate::pdf;

/// Placeholder height as a multiple of its width.
const PLACEHOLDER_ASPECT: f64 = 1.4;

/// Placeholder fill.
const PLACEHOLDER_GRAY: u8 = 0xE0;

/// A rendered (or cached) cover or page thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCover {
    /// Cache key of the thumbnail.
    pub key: ThumbKey,
    /// JPEG bytes.
    pub bytes: Arc<[u8]>,
}

/// Renders and caches cover thumbnails.
///
/// Concurrent requests for the same key render once; the other callers wait
/// for and share the result.
pub struct ThumbnailRenderer {
    quality: u8,
    oversized_pixels: u64,
    max_decode_bytes: u64,
    store: Arc<dyn ThumbnailStore>,
    flights: SingleFlight<ThumbKey, Result<RenderedCover, RenderError>>,
    renders: AtomicU64,
}

impl std::fmt::Debug for ThumbnailRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailRenderer")
            .field("quality", &self.quality)
            .field("store", &self.store)
            .field("renders", &self.renders.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ThumbnailRenderer {
    /// Creates a renderer writing to `store`.
    #[must_use]
    pub fn new(config: &ThumbnailConfig, store: Arc<dyn ThumbnailStore>) -> Self {
        Self {
            quality: config.jpeg_quality.clamp(1, 100),
            oversized_pixels: config.oversized_pixels,
            max_decode_bytes: config.max_decode_bytes,
            store,
            flights: SingleFlight::new(),
            renders: AtomicU64::new(0),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ThumbnailStore> {
        &self.store
    }

    /// Number of cache misses that ran the decode/encode pipeline.
    #[must_use]
    pub fn renders_performed(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    /// Computes the cache key for `source` at `width`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DecodeFailure`] if the source cannot be read.
    pub fn key(&self, source: &Utf8Path, width: u32) -> Result<ThumbKey, RenderError> {
        Ok(ThumbKey::new(content_fingerprint(source)?, width.max(1)))
    }

    /// Returns the cover for `source` at `width`, rendering it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the source cannot be read, is not a
    /// supported format, or fails to decode. Callers should fall back to
    /// [`placeholder`](Self::placeholder).
    pub fn render(&self, source: &Utf8Path, width: u32) -> Result<RenderedCover, RenderError> {
        let key = self.key(source, width)?;
        if let Some(hit) = self.store.get(&key) {
            return Ok(RenderedCover {
                key,
                bytes: hit.bytes,
            });
        }

        self.flights.run(key, || {
            // A previous flight may have stored it between our miss and now.
            if let Some(hit) = self.store.get(&key) {
                return Ok(RenderedCover {
                    key,
                    bytes: hit.bytes,
                });
            }

            let bytes: Arc<[u8]> = Arc::from(self.render_uncached(source, key.width)?);
            self.renders.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.store.put(key, Arc::clone(&bytes)) {
                warn!(key = %key, error = %e, "Failed to store thumbnail");
            }
            debug!(path = %source, key = %key, bytes = bytes.len(), "Rendered cover");
            Ok(RenderedCover { key, bytes })
        })
    }

    /// A solid light-gray JPEG, `width` wide and 1.4 × `width` tall.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DecodeFailure`] if encoding fails.
    pub fn placeholder(&self, width: u32) -> Result<Arc<[u8]>, RenderError> {
        let width = width.max(1);
        let height = scaled(width, PLACEHOLDER_ASPECT);
        let canvas = RgbImage::from_pixel(width, height, Rgb([PLACEHOLDER_GRAY; 3]));
        Ok(Arc::from(encode_jpeg(&canvas, self.quality)?))
    }

    fn render_uncached(&self, source: &Utf8Path, width: u32) -> Result<Vec<u8>, RenderError> {
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.max_decode_bytes);

        let is_pdf = source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        let (decoded, oversized) = if is_pdf {
            let decoded = pdf::first_page_image(source, limits)?;
            let pixels = u64::from(decoded.width()) * u64::from(decoded.height());
            (decoded, pixels > self.oversized_pixels)
        } else {
            let reader = ImageReader::open(source)
                .map_err(RenderError::decode)?
                .with_guessed_format()
                .map_err(RenderError::decode)?;
            if reader.format().is_none() {
                return Err(RenderError::unsupported(format!("unrecognized image: {source}")));
            }
            let (w, h) = reader.into_dimensions()?;
            let oversized = u64::from(w) * u64::from(h) > self.oversized_pixels;

            let mut reader = ImageReader::open(source)
                .map_err(RenderError::decode)?
                .with_guessed_format()
                .map_err(RenderError::decode)?;
            reader.limits(limits);
            (reader.decode()?, oversized)
        };

        let flat = flatten_onto_white(decoded);
        let (src_w, src_h) = flat.dimensions();
        let target_w = width.min(src_w);
        let target_h = scaled(src_h, f64::from(target_w) / f64::from(src_w));

        let resized = if target_w == src_w {
            flat
        } else if oversized {
            debug!(path = %source, src_w, src_h, "Oversized source, sampling resize");
            imageops::thumbnail(&flat, target_w, target_h)
        } else {
            imageops::resize(&flat, target_w, target_h, FilterType::Lanczos3)
        };

        encode_jpeg(&resized, self.quality)
    }
}

/// BLAKE3 over the file contents followed by its modification time.
fn content_fingerprint(source: &Utf8Path) -> Result<Fingerprint, RenderError> {
    let mut file = File::open(source).map_err(RenderError::decode)?;
    let mtime_ns = file
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());

    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(RenderError::decode)?;
    hasher.update(&mtime_ns.to_le_bytes());
    Ok(Fingerprint::from_bytes(*hasher.finalize().as_bytes()))
}

/// Composites any alpha channel over an opaque white background.
fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }
    let rgba = image.into_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let alpha = u16::from(src[3]);
        for c in 0..3 {
            let blended = (u16::from(src[c]) * alpha + 255 * (255 - alpha) + 127) / 255;
            dst[c] = blended as u8;
        }
    }
    out
}

#[allow(clippy::cast_sign_loss)] // inputs are non-negative
fn scaled(value: u32, factor: f64) -> u32 {
    ((f64::from(value) * factor).round() as u32).max(1)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .map_err(RenderError::decode)?;
    Ok(buf.into_inner())
}

/// Returns `true` if `bytes` carry a JPEG signature.
#[must_use]
pub fn is_jpeg(bytes: &[u8]) -> bool {
    image::guess_format(bytes).is_ok_and(|f| f == ImageFormat::Jpeg)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::*;
    use crate::cache::MemoryThumbnailStore;

    fn renderer() -> ThumbnailRenderer {
        ThumbnailRenderer::new(&ThumbnailConfig::default(), Arc::new(MemoryThumbnailStore::new()))
    }

    fn temp_image(dir: &tempfile::TempDir, name: &str, w: u32, h: u32) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
        RgbImage::from_pixel(w, h, Rgb([10, 20, 30])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_render_scales_to_width() {
        let dir = tempfile::tempdir().unwrap();
        let src = temp_image(&dir, "page.png", 400, 600);
        let r = renderer();

        let cover = r.render(&src, 200).unwrap();
        assert!(is_jpeg(&cover.bytes));
        let decoded = image::load_from_memory(&cover.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (200, 300));
        assert_eq!(cover.key.width, 200);
    }

    #[test]
    fn test_render_never_upscales() {
        let dir = tempfile::tempdir().unwrap();
        let src = temp_image(&dir, "small.png", 50, 80);
        let cover = renderer().render(&src, 1200).unwrap();
        let decoded = image::load_from_memory(&cover.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (50, 80));
    }

    #[test]
    fn test_second_render_is_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let src = temp_image(&dir, "page.png", 100, 100);
        let r = renderer();

        let first = r.render(&src, 64).unwrap();
        let second = r.render(&src, 64).unwrap();
        assert_eq!(first, second);
        assert_eq!(r.renders_performed(), 1);

        r.render(&src, 32).unwrap();
        assert_eq!(r.renders_performed(), 2);
    }

    #[test]
    fn test_transparency_flattened_to_white() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("clear.png")).unwrap();
        RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 0])).save(&path).unwrap();

        let cover = renderer().render(&path, 20).unwrap();
        let px = image::load_from_memory(&cover.bytes).unwrap().to_rgb8();
        assert!(px.pixels().all(|p| p.0.iter().all(|&c| c > 240)));
    }

    #[test]
    fn test_unsupported_and_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let text = Utf8PathBuf::from_path_buf(dir.path().join("notes.dat")).unwrap();
        std::fs::write(&text, b"plain text, not an image").unwrap();

        let r = renderer();
        assert!(matches!(
            r.render(&text, 100),
            Err(RenderError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            r.render(Utf8Path::new("/definitely/missing.png"), 100),
            Err(RenderError::DecodeFailure(_))
        ));
        assert_eq!(r.renders_performed(), 0);
    }

    #[test]
    fn test_placeholder_dimensions() {
        let bytes = renderer().placeholder(300).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (300, 420));
    }

    #[test]
    fn test_flatten_half_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let flat = flatten_onto_white(img);
        assert_eq!(flat.get_pixel(0, 0).0, [127, 127, 127]);
    }
}
