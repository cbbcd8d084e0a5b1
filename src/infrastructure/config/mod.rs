//! Application configuration.

pub mod app_config;
pub mod storage;

pub use app_config::{AppConfig, CacheConfig, LoaderConfig, LogLevel, StorageConfig};
pub use storage::{ConfigError, ConfigLoader};
