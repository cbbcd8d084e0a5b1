//! Infrastructure layer with storage, configuration and logging adapters.

/// Application configuration.
pub mod config;
/// Image storage, caching and loading.
pub mod image;
/// Tracing subscriber setup.
pub mod logging;

pub use config::{AppConfig, ConfigError, ConfigLoader, LogLevel};
pub use image::{
    CacheLimits, CacheStats, DiskImageStore, ImageLoader, ImageLoaderConfig, LoadHandle,
    MemoryImageCache, StoreSettings,
};
pub use logging::init_logging;
