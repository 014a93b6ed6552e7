//! Configuration structures for shelf.
//!
//! This module provides configuration types for all components:
//!
//! - [`LibraryConfig`] - Library root, file recognition, title normalization
//! - [`ThumbnailConfig`] - Cover rendering and caching
//! - [`PoolConfig`] - Worker pool sizing and idle retirement
//! - [`StrategyConfig`] - Thresholds for the page optimization strategy
//! - [`Config`] - Root configuration combining all settings
//!
//! Every section implements [`Default`] and deserializes with
//! `#[serde(default)]`, so a settings file only has to name what it changes.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Title normalization switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Strip ordering prefixes such as `01 - `, `003_` or `2. `.
    pub strip_numeric_prefix: bool,
    /// Replace underscores with spaces.
    pub underscores_to_spaces: bool,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            strip_numeric_prefix: true,
            underscores_to_spaces: true,
        }
    }
}

/// Configuration for the library layout and file recognition.
///
/// # Examples
///
/// ```
/// use shelf_core::LibraryConfig;
///
/// let config = LibraryConfig::default();
/// assert!(config.image_extensions.iter().any(|e| e == ".jpg"));
/// assert!(!config.follow_links);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory that holds the library.
    pub root_path: Utf8PathBuf,

    /// Extensions recognized as page images, with or without the dot.
    pub image_extensions: Vec<String>,

    /// Extensions that are always ignored.
    pub ignored_file_types: Vec<String>,

    /// Glob patterns (matched against entry names) to ignore.
    pub ignore_patterns: Vec<String>,

    /// Whether the walker follows symbolic links.
    pub follow_links: bool,

    /// Title normalization.
    pub titles: TitleConfig,

    /// Scan once when the library starts.
    pub auto_scan_on_startup: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root_path: Utf8PathBuf::new(),
            image_extensions: [
                ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tif", ".tiff", ".webp", ".avif",
                ".heic", ".svg",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            ignored_file_types: Vec::new(),
            ignore_patterns: Vec::new(),
            follow_links: false,
            titles: TitleConfig::default(),
            auto_scan_on_startup: false,
        }
    }
}

/// Configuration for cover thumbnails.
///
/// # Examples
///
/// ```
/// use shelf_core::ThumbnailConfig;
///
/// let config = ThumbnailConfig::default();
/// assert_eq!(config.cover_width, 1200);
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Default cover width in pixels.
    pub cover_width: u32,

    /// Width pages of books marked for optimization are served at.
    pub compressed_width: u32,

    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,

    /// Sources with more pixels than this use the fast resize path.
    pub oversized_pixels: u64,

    /// Upper bound on memory a single decode may allocate.
    pub max_decode_bytes: u64,

    /// On-disk cache directory. `None` keeps thumbnails in memory only.
    pub cache_dir: Option<Utf8PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cover_width: 1200,
            compressed_width: 1920,
            jpeg_quality: 85,
            oversized_pixels: 40_000_000,
            max_decode_bytes: 512 * 1024 * 1024,
            cache_dir: None,
        }
    }
}

/// Configuration for the scan worker pool.
///
/// # Examples
///
/// ```
/// use shelf_core::PoolConfig;
///
/// let config = PoolConfig::default();
/// assert_eq!(config.effective_workers(), 2);
///
/// let disabled = PoolConfig { enabled: false, ..PoolConfig::default() };
/// assert_eq!(disabled.effective_workers(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Use a multi-threaded pool. When `false` work runs on one thread.
    pub enabled: bool,

    /// Number of worker threads when enabled.
    pub max_workers: usize,

    /// Seconds an unused pool lives before it is retired.
    pub idle_timeout_secs: u64,
}

impl PoolConfig {
    /// Number of worker threads the pool will actually run.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.enabled {
            self.max_workers.max(1)
        } else {
            1
        }
    }

    /// Idle timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 2,
            idle_timeout_secs: 300,
        }
    }
}

/// Thresholds for choosing [`OptimizationStrategy::Optimize`](crate::OptimizationStrategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Width threshold in pixels.
    pub max_width: u32,
    /// Height threshold in pixels.
    pub max_height: u32,
    /// Area threshold in pixels.
    pub max_pixel_area: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_width: 2500,
            max_height: 2500,
            max_pixel_area: 5_000_000,
        }
    }
}

/// Root configuration for shelf.
///
/// # Examples
///
/// ```
/// use shelf_core::Config;
///
/// let config = Config::from_json_str(r#"{"pool": {"max_workers": 4}}"#).unwrap();
/// assert_eq!(config.pool.max_workers, 4);
/// assert_eq!(config.thumbnails.cover_width, 1200);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library layout and recognition.
    pub library: LibraryConfig,

    /// Cover thumbnails.
    pub thumbnails: ThumbnailConfig,

    /// Worker pool.
    pub pool: PoolConfig,

    /// Optimization strategy thresholds.
    pub strategy: StrategyConfig,
}

impl Config {
    /// Loads and validates a JSON settings file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks option ranges. Does not touch the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thumbs = &self.thumbnails;
        if thumbs.cover_width == 0 {
            return Err(ConfigError::invalid_option(
                "thumbnails.cover_width",
                "must be at least 1",
            ));
        }
        if thumbs.compressed_width == 0 {
            return Err(ConfigError::invalid_option(
                "thumbnails.compressed_width",
                "must be at least 1",
            ));
        }
        if !(1..=100).contains(&thumbs.jpeg_quality) {
            return Err(ConfigError::invalid_option(
                "thumbnails.jpeg_quality",
                "must be between 1 and 100",
            ));
        }
        if thumbs.max_decode_bytes == 0 {
            return Err(ConfigError::invalid_option(
                "thumbnails.max_decode_bytes",
                "must be positive",
            ));
        }
        if self.pool.enabled && self.pool.max_workers == 0 {
            return Err(ConfigError::invalid_option(
                "pool.max_workers",
                "must be positive when the pool is enabled",
            ));
        }
        if self.library.image_extensions.is_empty() {
            return Err(ConfigError::invalid_option(
                "library.image_extensions",
                "at least one image extension is required",
            ));
        }
        if self.library.image_extensions.iter().any(|e| is_pdf_ext(e)) {
            return Err(ConfigError::invalid_option(
                "library.image_extensions",
                "pdf is handled separately and cannot be an image extension",
            ));
        }
        Ok(())
    }

    /// Checks that the configured root exists and is a directory.
    pub fn validate_root(&self) -> Result<(), ConfigError> {
        let root = &self.library.root_path;
        if root.as_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: root.clone(),
                reason: "library root is not set".to_owned(),
            });
        }
        if !root.exists() {
            return Err(ConfigError::MissingDirectory(root.clone()));
        }
        if !root.is_dir() {
            return Err(ConfigError::InvalidPath {
                path: root.clone(),
                reason: "not a directory".to_owned(),
            });
        }
        Ok(())
    }
}

fn is_pdf_ext(ext: &str) -> bool {
    ext.trim_start_matches('.').eq_ignore_ascii_case("pdf")
}
