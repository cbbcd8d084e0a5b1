//! Image persistence and caching.
//!
//! This module provides:
//! - JPEG encoding, decoding and resizing
//! - Durable storage of full-size and thumbnail renditions
//! - A bounded in-memory cache of decoded images
//! - An async loader that coalesces and prioritizes disk reads

pub mod codec;
pub mod disk_store;
pub mod loader;
pub mod memory_cache;

pub use disk_store::{DiskImageStore, StoreSettings, default_storage_root};
pub use loader::{ImageLoader, ImageLoaderConfig, LoadHandle};
pub use memory_cache::{CacheLimits, CacheStats, FillTicket, MemoryImageCache, normalize_for_display};
