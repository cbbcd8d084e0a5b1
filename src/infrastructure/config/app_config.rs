//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::infrastructure::image::disk_store::{self, StoreSettings};
use crate::infrastructure::image::loader::{self, ImageLoaderConfig};
use crate::infrastructure::image::memory_cache::{self, CacheLimits};

const APP_NAME: &str = "daygram";
const APP_QUALIFIER: &str = "app";
const APP_ORGANIZATION: &str = "daygram";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path. Nothing is logged to a file when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// On-disk layout and encoding.
    #[serde(default)]
    pub storage: StorageConfig,

    /// In-memory cache limits.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Load concurrency.
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Full-size image directory, relative to the root.
    #[serde(default = "default_images_dir")]
    pub images_dir: String,

    /// Thumbnail directory, relative to the root.
    #[serde(default = "default_thumbnails_dir")]
    pub thumbnails_dir: String,

    /// Longest edge of a stored full-size image.
    #[serde(default = "default_full_max_dimension")]
    pub full_max_dimension: u32,

    /// Longest edge of a stored thumbnail.
    #[serde(default = "default_thumbnail_max_dimension")]
    pub thumbnail_max_dimension: u32,

    /// JPEG quality for full-size images (1-100).
    #[serde(default = "default_full_quality")]
    pub full_quality: u8,

    /// JPEG quality for thumbnails (1-100).
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            images_dir: default_images_dir(),
            thumbnails_dir: default_thumbnails_dir(),
            full_max_dimension: default_full_max_dimension(),
            thumbnail_max_dimension: default_thumbnail_max_dimension(),
            full_quality: default_full_quality(),
            thumbnail_quality: default_thumbnail_quality(),
        }
    }
}

impl StorageConfig {
    /// Returns the configured root, or the platform data directory.
    #[must_use]
    pub fn effective_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(disk_store::default_storage_root)
    }

    /// Converts to store settings, clamping out-of-range values.
    #[must_use]
    pub fn to_settings(&self) -> StoreSettings {
        StoreSettings {
            images_dir: self.images_dir.clone(),
            thumbnails_dir: self.thumbnails_dir.clone(),
            full_max_dimension: self.full_max_dimension.max(1),
            thumbnail_max_dimension: self.thumbnail_max_dimension.max(1),
            full_quality: self.full_quality.clamp(1, 100),
            thumbnail_quality: self.thumbnail_quality.clamp(1, 100),
        }
    }
}

/// Memory cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of full-size images held in memory.
    #[serde(default = "default_max_images")]
    pub max_images: usize,

    /// Maximum total decoded size of full-size images, in bytes.
    #[serde(default = "default_max_image_cost")]
    pub max_image_cost: u64,

    /// Width that full-size images are reduced to before caching.
    #[serde(default = "default_max_display_width")]
    pub max_display_width: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_images: default_max_images(),
            max_image_cost: default_max_image_cost(),
            max_display_width: default_max_display_width(),
        }
    }
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_images: config.max_images.max(1),
            max_image_cost: config.max_image_cost,
            max_display_width: config.max_display_width.max(1),
        }
    }
}

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Concurrent reads for images a view is waiting on.
    #[serde(default = "default_interactive_permits")]
    pub interactive_permits: usize,

    /// Concurrent reads for preloads.
    #[serde(default = "default_background_permits")]
    pub background_permits: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            interactive_permits: default_interactive_permits(),
            background_permits: default_background_permits(),
        }
    }
}

impl From<&LoaderConfig> for ImageLoaderConfig {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            interactive_permits: config.interactive_permits,
            background_permits: config.background_permits,
        }
    }
}

fn default_images_dir() -> String {
    disk_store::DEFAULT_IMAGES_DIR.to_string()
}

fn default_thumbnails_dir() -> String {
    disk_store::DEFAULT_THUMBNAILS_DIR.to_string()
}

const fn default_full_max_dimension() -> u32 {
    disk_store::DEFAULT_FULL_MAX_DIMENSION
}

const fn default_thumbnail_max_dimension() -> u32 {
    disk_store::DEFAULT_THUMBNAIL_MAX_DIMENSION
}

const fn default_full_quality() -> u8 {
    disk_store::DEFAULT_FULL_QUALITY
}

const fn default_thumbnail_quality() -> u8 {
    disk_store::DEFAULT_THUMBNAIL_QUALITY
}

const fn default_max_images() -> usize {
    memory_cache::DEFAULT_MAX_IMAGES
}

const fn default_max_image_cost() -> u64 {
    memory_cache::DEFAULT_MAX_IMAGE_COST
}

const fn default_max_display_width() -> u32 {
    memory_cache::DEFAULT_MAX_DISPLAY_WIDTH
}

const fn default_interactive_permits() -> usize {
    loader::DEFAULT_INTERACTIVE_PERMITS
}

const fn default_background_permits() -> usize {
    loader::DEFAULT_BACKGROUND_PERMITS
}

impl AppConfig {
    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_path, None);
        assert_eq!(config.storage.images_dir, "Images");
        assert_eq!(config.storage.thumbnails_dir, "Thumbnails");
        assert_eq!(config.storage.full_max_dimension, 3000);
        assert_eq!(config.storage.thumbnail_max_dimension, 400);
        assert_eq!(config.cache.max_images, 15);
        assert_eq!(config.cache.max_image_cost, 150 * 1024 * 1024);
        assert_eq!(config.cache.max_display_width, 1320);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [storage]
            root = "/var/lib/daygram"
            thumbnail_max_dimension = 256

            [cache]
            max_images = 30
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(
            config.storage.effective_root(),
            PathBuf::from("/var/lib/daygram")
        );
        assert_eq!(config.storage.thumbnail_max_dimension, 256);
        assert_eq!(config.storage.full_max_dimension, 3000);
        assert_eq!(config.cache.max_images, 30);
        assert_eq!(config.loader, LoaderConfig::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_serialized_default_parses_back() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }

    #[test]
    fn test_settings_clamp_out_of_range_values() {
        let storage = StorageConfig {
            full_quality: 0,
            thumbnail_quality: 250,
            full_max_dimension: 0,
            ..StorageConfig::default()
        };

        let settings = storage.to_settings();
        assert_eq!(settings.full_quality, 1);
        assert_eq!(settings.thumbnail_quality, 100);
        assert_eq!(settings.full_max_dimension, 1);
    }

    #[test]
    fn test_cache_limits_from_config() {
        let limits = CacheLimits::from(&CacheConfig {
            max_images: 0,
            max_image_cost: 1024,
            max_display_width: 800,
        });

        assert_eq!(limits.max_images, 1);
        assert_eq!(limits.max_image_cost, 1024);
        assert_eq!(limits.max_display_width, 800);
    }

    #[test]
    fn test_log_level_names_match_env_filter_directives() {
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        let parsed: AppConfig = toml::from_str("log_level = \"warn\"").unwrap();
        assert_eq!(parsed.log_level, LogLevel::Warn);
    }
}
