//! Durable on-disk storage for diary photos.
//!
//! Every photo is written as two JPEG files, a capped full-size rendition
//! under `Images/` and a thumbnail under `Thumbnails/`, named by freshly
//! generated keys. Files are never overwritten: replacing a photo stores a
//! new pair and deletes the old one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, error, trace, warn};

use super::codec;
use super::memory_cache::MemoryImageCache;
use crate::domain::entities::{Bitmap, ImagePair, ImageVariant, StoredImageKey};
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::ports::ImageStorePort;

/// Directory holding full-size renditions.
pub const DEFAULT_IMAGES_DIR: &str = "Images";
/// Directory holding thumbnails.
pub const DEFAULT_THUMBNAILS_DIR: &str = "Thumbnails";
/// Longest edge of the stored full-size rendition.
pub const DEFAULT_FULL_MAX_DIMENSION: u32 = 3000;
/// Longest edge of the stored thumbnail.
pub const DEFAULT_THUMBNAIL_MAX_DIMENSION: u32 = 400;
/// JPEG quality of the full-size rendition.
pub const DEFAULT_FULL_QUALITY: u8 = 90;
/// JPEG quality of the thumbnail.
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;

/// How photos are sized, encoded and laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Subdirectory of the storage root for full-size renditions.
    pub images_dir: String,
    /// Subdirectory of the storage root for thumbnails.
    pub thumbnails_dir: String,
    /// Longest edge of the full-size rendition.
    pub full_max_dimension: u32,
    /// Longest edge of the thumbnail.
    pub thumbnail_max_dimension: u32,
    /// JPEG quality (1-100) of the full-size rendition.
    pub full_quality: u8,
    /// JPEG quality (1-100) of the thumbnail.
    pub thumbnail_quality: u8,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            images_dir: DEFAULT_IMAGES_DIR.to_string(),
            thumbnails_dir: DEFAULT_THUMBNAILS_DIR.to_string(),
            full_max_dimension: DEFAULT_FULL_MAX_DIMENSION,
            thumbnail_max_dimension: DEFAULT_THUMBNAIL_MAX_DIMENSION,
            full_quality: DEFAULT_FULL_QUALITY,
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
        }
    }
}

/// Disk-backed photo store.
///
/// Holds no mutable state besides the one-shot directory setup. Concurrent
/// operations on different keys never conflict; the loader serializes reads
/// of the same key.
pub struct DiskImageStore {
    images_dir: PathBuf,
    thumbnails_dir: PathBuf,
    settings: StoreSettings,
    cache: Arc<MemoryImageCache>,
    dirs_ready: OnceCell<()>,
}

impl DiskImageStore {
    /// Creates a store rooted at `root`. Directories are created on first use.
    ///
    /// `cache` is invalidated whenever a stored photo is deleted or replaced.
    #[must_use]
    pub fn new(root: &Path, settings: StoreSettings, cache: Arc<MemoryImageCache>) -> Self {
        Self {
            images_dir: root.join(&settings.images_dir),
            thumbnails_dir: root.join(&settings.thumbnails_dir),
            settings,
            cache,
            dirs_ready: OnceCell::new(),
        }
    }

    /// Directory holding full-size renditions.
    #[must_use]
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Directory holding thumbnails.
    #[must_use]
    pub fn thumbnails_dir(&self) -> &Path {
        &self.thumbnails_dir
    }

    /// Returns the sizing and encoding settings.
    #[must_use]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Returns the path for a key, or `None` if the key cannot be a file name.
    fn file_path(&self, key: &StoredImageKey, variant: ImageVariant) -> Option<PathBuf> {
        if !key.is_valid_file_name() {
            return None;
        }
        let dir = match variant {
            ImageVariant::Full => &self.images_dir,
            ImageVariant::Thumbnail => &self.thumbnails_dir,
        };
        Some(dir.join(key.as_str()))
    }

    async fn ensure_dirs(&self) -> StoreResult<()> {
        self.dirs_ready
            .get_or_try_init(|| async {
                for dir in [&self.images_dir, &self.thumbnails_dir] {
                    fs::create_dir_all(dir).await.map_err(|e| {
                        StoreError::io(format!("Failed to create {}: {e}", dir.display()))
                    })?;
                }
                debug!(images = %self.images_dir.display(), "Image directories ready");
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    /// Loads a full-size rendition, reporting any failure as absence.
    pub async fn load_image(&self, key: &StoredImageKey) -> Option<Bitmap> {
        self.load_or_none(key, ImageVariant::Full).await
    }

    /// Loads a thumbnail, reporting any failure as absence.
    pub async fn load_thumbnail(&self, key: &StoredImageKey) -> Option<Bitmap> {
        self.load_or_none(key, ImageVariant::Thumbnail).await
    }

    async fn load_or_none(&self, key: &StoredImageKey, variant: ImageVariant) -> Option<Bitmap> {
        match self.load(key, variant).await {
            Ok(bitmap) => bitmap,
            Err(e) => {
                warn!(key = %key, variant = %variant, error = %e, "Failed to load stored image");
                None
            }
        }
    }

    /// Stores `bitmap` as a new pair, then deletes `old`.
    ///
    /// The old pair is only touched once the new one is safely on disk, so a
    /// failed replacement leaves the entry's previous photo intact.
    ///
    /// # Errors
    /// Returns the save error; `old` is left untouched in that case.
    pub async fn replace(&self, old: &ImagePair, bitmap: Bitmap) -> StoreResult<ImagePair> {
        let pair = self.save(bitmap).await?;
        self.delete(old).await;
        debug!(old = %old.full, new = %pair.full, "Replaced stored photo");
        Ok(pair)
    }

    /// Checks whether a stored file exists.
    pub async fn contains(&self, key: &StoredImageKey, variant: ImageVariant) -> bool {
        match self.file_path(key, variant) {
            Some(path) => fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Deletes every stored file whose name is not in `live`.
    ///
    /// Collects the orphans best-effort deletes leave behind. Must not run
    /// while a save is in progress, since its keys are not yet live.
    ///
    /// # Errors
    /// Returns error if a directory exists but cannot be listed.
    pub async fn remove_orphans(&self, live: &HashSet<StoredImageKey>) -> StoreResult<usize> {
        let mut removed = 0usize;

        for dir in [&self.images_dir, &self.thumbnails_dir] {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::io(format!(
                        "Failed to read {}: {e}",
                        dir.display()
                    )));
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(format!("Failed to read entry: {e}")))?
            {
                let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
                let key = StoredImageKey::new(entry.file_name().to_string_lossy());
                if !is_file || live.contains(&key) {
                    continue;
                }

                let path = entry.path();
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove orphaned image");
                } else {
                    debug!(path = %path.display(), "Removed orphaned image");
                    self.cache.invalidate(&key);
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

impl std::fmt::Debug for DiskImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageStore")
            .field("images_dir", &self.images_dir)
            .field("thumbnails_dir", &self.thumbnails_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageStorePort for DiskImageStore {
    async fn save(&self, bitmap: Bitmap) -> StoreResult<ImagePair> {
        self.ensure_dirs().await?;

        let settings = self.settings.clone();
        let (full_bytes, thumbnail_bytes) = tokio::task::spawn_blocking(move || {
            let upright = codec::normalize_orientation(bitmap);
            let full = codec::resize(&upright, settings.full_max_dimension);
            let thumbnail = codec::resize(&upright, settings.thumbnail_max_dimension);
            Ok::<_, StoreError>((
                codec::encode(&full, settings.full_quality)?,
                codec::encode(&thumbnail, settings.thumbnail_quality)?,
            ))
        })
        .await
        .map_err(|e| StoreError::task(format!("Encode task panicked: {e}")))??;

        let pair = ImagePair::generate();
        let (Some(full_path), Some(thumbnail_path)) = (
            self.file_path(&pair.full, ImageVariant::Full),
            self.file_path(&pair.thumbnail, ImageVariant::Thumbnail),
        ) else {
            return Err(StoreError::io("Generated keys are not valid file names"));
        };

        if let Err(e) = write_file(&full_path, &full_bytes).await {
            remove_quietly(&full_path).await;
            return Err(StoreError::partial_write(ImageVariant::Full, e.to_string()));
        }

        if let Err(e) = write_file(&thumbnail_path, &thumbnail_bytes).await {
            warn!(key = %pair.full, error = %e, "Thumbnail write failed, rolling back pair");
            remove_quietly(&thumbnail_path).await;
            remove_quietly(&full_path).await;
            return Err(StoreError::partial_write(
                ImageVariant::Thumbnail,
                e.to_string(),
            ));
        }

        debug!(
            full = %pair.full,
            thumbnail = %pair.thumbnail,
            full_size = full_bytes.len(),
            thumbnail_size = thumbnail_bytes.len(),
            "Stored photo"
        );
        Ok(pair)
    }

    async fn load(
        &self,
        key: &StoredImageKey,
        variant: ImageVariant,
    ) -> StoreResult<Option<Bitmap>> {
        let Some(path) = self.file_path(key, variant) else {
            warn!(key = %key, "Refusing to load key that is not a plain file name");
            return Ok(None);
        };

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, variant = %variant, "Stored image not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(StoreError::io(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        match tokio::task::spawn_blocking(move || codec::decode(&bytes)).await {
            Ok(Ok(bitmap)) => {
                trace!(key = %key, variant = %variant, "Decoded stored image");
                Ok(Some(bitmap))
            }
            Ok(Err(e)) => {
                warn!(key = %key, variant = %variant, error = %e, "Stored image is unreadable");
                Ok(None)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                Err(StoreError::task(format!("Decode task panicked: {e}")))
            }
        }
    }

    async fn delete(&self, pair: &ImagePair) {
        for variant in [ImageVariant::Full, ImageVariant::Thumbnail] {
            let key = pair.key(variant);
            let Some(path) = self.file_path(key, variant) else {
                warn!(key = %key, "Refusing to delete key that is not a plain file name");
                self.cache.invalidate(key);
                continue;
            };

            match fs::remove_file(&path).await {
                Ok(()) => debug!(key = %key, variant = %variant, "Deleted stored image"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    trace!(key = %key, variant = %variant, "Stored image already gone");
                }
                Err(e) => {
                    warn!(key = %key, variant = %variant, error = %e, "Failed to delete stored image");
                }
            }

            // After the removal: reads that started earlier lose their fill,
            // reads that start later find no file.
            self.cache.invalidate(key);
        }
    }
}

/// Writes a new file and waits until its contents reach the disk.
async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create_new(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to roll back image file");
    }
}

/// Returns the default storage root (the platform data directory).
#[must_use]
pub fn default_storage_root() -> PathBuf {
    directories::ProjectDirs::from("app", "daygram", "daygram").map_or_else(
        || std::env::temp_dir().join("daygram"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use tempfile::TempDir;

    fn create_test_store() -> (DiskImageStore, Arc<MemoryImageCache>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(MemoryImageCache::default());
        let store = DiskImageStore::new(temp_dir.path(), StoreSettings::default(), cache.clone());
        (store, cache, temp_dir)
    }

    fn photo(width: u32, height: u32) -> Bitmap {
        Bitmap::new(DynamicImage::new_rgb8(width, height))
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_directories_are_created_lazily() {
        let (store, _cache, _temp) = create_test_store();
        assert!(!store.images_dir().exists());

        store.save(photo(20, 10)).await.unwrap();
        assert!(store.images_dir().is_dir());
        assert!(store.thumbnails_dir().is_dir());
    }

    #[tokio::test]
    async fn test_save_large_photo_caps_both_renditions() {
        let (store, _cache, _temp) = create_test_store();
        let pair = store.save(photo(4000, 3000)).await.unwrap();

        assert!(store.contains(&pair.full, ImageVariant::Full).await);
        assert!(store.contains(&pair.thumbnail, ImageVariant::Thumbnail).await);

        let full = store.load_image(&pair.full).await.unwrap();
        let thumbnail = store.load_thumbnail(&pair.thumbnail).await.unwrap();
        assert_eq!(full.dimensions(), (3000, 2250));
        assert_eq!(thumbnail.dimensions(), (400, 300));

        let ratio = f64::from(full.width()) / f64::from(full.height());
        assert!((ratio - 4.0 / 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_small_photo_is_not_upscaled() {
        let (store, _cache, _temp) = create_test_store();
        let pair = store.save(photo(120, 80)).await.unwrap();

        let full = store.load_image(&pair.full).await.unwrap();
        let thumbnail = store.load_thumbnail(&pair.thumbnail).await.unwrap();
        assert_eq!(full.dimensions(), (120, 80));
        assert_eq!(thumbnail.dimensions(), (120, 80));
    }

    #[tokio::test]
    async fn test_delete_removes_both_files() {
        let (store, _cache, _temp) = create_test_store();
        let pair = store.save(photo(50, 50)).await.unwrap();

        store.delete(&pair).await;

        assert!(store.load_image(&pair.full).await.is_none());
        assert!(store.load_thumbnail(&pair.thumbnail).await.is_none());
        assert_eq!(file_count(store.images_dir()), 0);
        assert_eq!(file_count(store.thumbnails_dir()), 0);
    }

    #[tokio::test]
    async fn test_delete_continues_past_missing_half() {
        let (store, _cache, _temp) = create_test_store();
        let pair = store.save(photo(50, 50)).await.unwrap();
        std::fs::remove_file(store.images_dir().join(pair.full.as_str())).unwrap();

        store.delete(&pair).await;
        assert!(!store.contains(&pair.thumbnail, ImageVariant::Thumbnail).await);
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let (store, cache, _temp) = create_test_store();
        let pair = store.save(photo(50, 50)).await.unwrap();
        cache.put_image(pair.full.clone(), photo(50, 50));
        cache.put_thumbnail(pair.thumbnail.clone(), photo(10, 10));

        store.delete(&pair).await;

        assert!(!cache.contains_image(&pair.full));
        assert!(!cache.contains_thumbnail(&pair.thumbnail));
    }

    #[tokio::test]
    async fn test_load_missing_is_not_an_error() {
        let (store, _cache, _temp) = create_test_store();
        let key = StoredImageKey::new("nonexistent.jpg");

        let result = store.load(&key, ImageVariant::Full).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_load_corrupted_file_reports_not_found() {
        let (store, _cache, _temp) = create_test_store();
        let pair = store.save(photo(50, 50)).await.unwrap();
        std::fs::write(store.images_dir().join(pair.full.as_str()), b"garbage").unwrap();

        let result = store.load(&pair.full, ImageVariant::Full).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_load_rejects_path_traversal() {
        let (store, _cache, temp) = create_test_store();
        std::fs::write(temp.path().join("outside.jpg"), b"x").unwrap();

        let key = StoredImageKey::new("../outside.jpg");
        assert!(matches!(store.load(&key, ImageVariant::Full).await, Ok(None)));
        assert!(!store.contains(&key, ImageVariant::Full).await);
    }

    #[tokio::test]
    async fn test_encode_failure_leaves_no_files() {
        let (store, _cache, _temp) = create_test_store();

        let result = store.save(photo(0, 0)).await;
        assert!(matches!(result, Err(StoreError::Encode { .. })));
        assert_eq!(file_count(store.images_dir()), 0);
        assert_eq!(file_count(store.thumbnails_dir()), 0);
    }

    #[tokio::test]
    async fn test_thumbnail_write_failure_rolls_back_full() {
        let (store, _cache, _temp) = create_test_store();
        let first = store.save(photo(40, 40)).await.unwrap();

        // Swap the thumbnail directory for a plain file so the second write fails.
        std::fs::remove_dir_all(store.thumbnails_dir()).unwrap();
        std::fs::write(store.thumbnails_dir(), b"not a directory").unwrap();

        let result = store.save(photo(40, 40)).await;
        assert!(matches!(result, Err(StoreError::PartialWrite { .. })));

        let remaining: Vec<_> = std::fs::read_dir(store.images_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining, vec![first.full.as_str().to_string()]);
    }

    #[tokio::test]
    async fn test_replace_swaps_pairs() {
        let (store, _cache, _temp) = create_test_store();
        let old = store.save(photo(60, 30)).await.unwrap();

        let new = store.replace(&old, photo(30, 60)).await.unwrap();

        assert_ne!(old, new);
        assert!(store.load_image(&old.full).await.is_none());
        assert_eq!(
            store.load_image(&new.full).await.map(|b| b.dimensions()),
            Some((30, 60))
        );
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_photo() {
        let (store, _cache, _temp) = create_test_store();
        let old = store.save(photo(60, 30)).await.unwrap();

        assert!(store.replace(&old, photo(0, 0)).await.is_err());
        assert!(store.load_image(&old.full).await.is_some());
        assert!(store.load_thumbnail(&old.thumbnail).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_orphans() {
        let (store, _cache, _temp) = create_test_store();
        let kept = store.save(photo(20, 20)).await.unwrap();
        let orphaned = store.save(photo(20, 20)).await.unwrap();

        let live: HashSet<_> = [kept.full.clone(), kept.thumbnail.clone()].into();
        let removed = store.remove_orphans(&live).await.unwrap();

        assert_eq!(removed, 2);
        assert!(store.contains(&kept.full, ImageVariant::Full).await);
        assert!(!store.contains(&orphaned.full, ImageVariant::Full).await);
        assert!(!store.contains(&orphaned.thumbnail, ImageVariant::Thumbnail).await);
    }

    #[tokio::test]
    async fn test_remove_orphans_before_first_save() {
        let (store, _cache, _temp) = create_test_store();
        assert_eq!(store.remove_orphans(&HashSet::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_saves_get_distinct_pairs() {
        let (store, _cache, _temp) = create_test_store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.save(photo(30, 20)).await }));
        }

        let mut keys = HashSet::new();
        for handle in handles {
            let pair = handle.await.unwrap().unwrap();
            keys.insert(pair.full);
        }
        assert_eq!(keys.len(), 8);
        assert_eq!(file_count(store.images_dir()), 8);
        assert_eq!(file_count(store.thumbnails_dir()), 8);
    }
}
