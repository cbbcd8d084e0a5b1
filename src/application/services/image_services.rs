//! Wiring of the image subsystem.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::domain::entities::{
    Bitmap, EntryImages, ImagePair, ImageVariant, LoadOutcome, Priority, StoredImageKey,
};
use crate::domain::errors::StoreResult;
use crate::domain::ports::ImageStorePort;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::image::{
    CacheLimits, DiskImageStore, ImageLoader, ImageLoaderConfig, LoadHandle, MemoryImageCache,
};

/// Entries on each side of the open one whose full images are warmed.
pub const PRELOAD_RADIUS: usize = 2;
/// Entries on each side warmed when a day view first opens.
pub const INITIAL_PRELOAD_RADIUS: usize = 5;

/// The image subsystem for one diary: one cache, one store and one loader,
/// sharing the cache between them.
///
/// Views receive this (or an `Arc` of it) explicitly instead of reaching
/// for process-wide instances.
#[derive(Debug)]
pub struct ImageServices {
    cache: Arc<MemoryImageCache>,
    store: Arc<DiskImageStore>,
    loader: ImageLoader,
}

impl ImageServices {
    /// Builds the subsystem from configuration. No I/O happens until the
    /// first save or load.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let root = config.storage.effective_root();
        let cache = Arc::new(MemoryImageCache::new(CacheLimits::from(&config.cache)));
        let store = Arc::new(DiskImageStore::new(
            &root,
            config.storage.to_settings(),
            cache.clone(),
        ));
        let loader = ImageLoader::new(
            ImageLoaderConfig::from(&config.loader),
            cache.clone(),
            store.clone(),
        );

        info!(root = %root.display(), "Image services ready");
        Self {
            cache,
            store,
            loader,
        }
    }

    /// Shared memory cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<MemoryImageCache> {
        &self.cache
    }

    /// Durable store.
    #[must_use]
    pub const fn store(&self) -> &Arc<DiskImageStore> {
        &self.store
    }

    /// Load coordinator.
    #[must_use]
    pub const fn loader(&self) -> &ImageLoader {
        &self.loader
    }

    /// Persists a new photo.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if encoding or writing fails; nothing is left
    /// on disk in that case.
    pub async fn save(&self, bitmap: Bitmap) -> StoreResult<ImagePair> {
        self.store.save(bitmap).await
    }

    /// Swaps the photo of an entry, keeping the old pair if saving fails.
    ///
    /// # Errors
    ///
    /// Returns the save error; the old pair is untouched.
    pub async fn replace(&self, old: &ImagePair, bitmap: Bitmap) -> StoreResult<ImagePair> {
        self.store.replace(old, bitmap).await
    }

    /// Removes a photo from disk and memory.
    pub async fn delete(&self, pair: &ImagePair) {
        self.store.delete(pair).await;
    }

    /// Requests an image through the loader.
    pub fn request(
        &self,
        key: &StoredImageKey,
        variant: ImageVariant,
        priority: Priority,
    ) -> LoadHandle {
        self.loader.request(key, variant, priority)
    }

    /// Loads the full-size image for display.
    pub async fn load_image(&self, key: &StoredImageKey) -> LoadOutcome {
        self.loader
            .load(key, ImageVariant::Full, Priority::Interactive)
            .await
    }

    /// Loads a thumbnail for display.
    pub async fn load_thumbnail(&self, key: &StoredImageKey) -> LoadOutcome {
        self.loader
            .load(key, ImageVariant::Thumbnail, Priority::Interactive)
            .await
    }

    /// Warms the cache around an entry that was just opened.
    pub fn entry_opened(&self, entries: &[EntryImages], index: usize) {
        self.loader
            .preload_around(entries, index, INITIAL_PRELOAD_RADIUS);
    }

    /// Warms the cache after paging to another entry.
    pub fn entry_shown(&self, entries: &[EntryImages], index: usize) {
        self.loader.preload_around(entries, index, PRELOAD_RADIUS);
    }

    /// Warms thumbnails for a calendar month and its neighbours.
    pub fn month_shown(&self, entries: &[EntryImages], year: i32, month: u32) {
        self.loader.preload_months(entries, year, month);
    }

    /// Deletes files that no entry refers to.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if a directory cannot be listed.
    pub async fn collect_garbage(&self, entries: &[EntryImages]) -> StoreResult<usize> {
        let live: HashSet<StoredImageKey> = entries
            .iter()
            .flat_map(|entry| [entry.pair.full.clone(), entry.pair.thumbnail.clone()])
            .collect();
        self.store.remove_orphans(&live).await
    }

    /// Drops every decoded image held in memory and detaches waiters.
    pub fn release_memory(&self) {
        self.loader.cancel_all();
        self.cache.clear();
    }
}
