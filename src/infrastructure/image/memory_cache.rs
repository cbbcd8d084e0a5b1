//! Two-tier in-memory bitmap cache.
//!
//! Thumbnails live in a plain map that only shrinks on invalidation: there
//! is at most one per diary day. Full images live in an LRU bounded both by
//! entry count and by total decoded cost.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::codec;
use crate::domain::entities::{Bitmap, ImageVariant, StoredImageKey};

/// Default maximum number of full images held in memory.
pub const DEFAULT_MAX_IMAGES: usize = 15;

/// Default ceiling on the summed cost of full images (150 MiB).
pub const DEFAULT_MAX_IMAGE_COST: u64 = 150 * 1024 * 1024;

/// Default width full images are reduced to before caching.
pub const DEFAULT_MAX_DISPLAY_WIDTH: u32 = 1320;

/// Capacity policy for the full-image tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of cached full images.
    pub max_images: usize,
    /// Maximum summed cost of cached full images, in bytes.
    pub max_image_cost: u64,
    /// Full images wider than this are downscaled before caching.
    pub max_display_width: u32,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            max_image_cost: DEFAULT_MAX_IMAGE_COST,
            max_display_width: DEFAULT_MAX_DISPLAY_WIDTH,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    bitmap: Arc<Bitmap>,
    cost: u64,
}

/// Claim on a pending fill of one cache slot, issued before the disk read.
///
/// Invalidating the key revokes every outstanding ticket for it, so a read
/// that raced a delete cannot put the deleted bitmap back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Everything behind the one lock. Reads, writes and eviction all happen
/// under it so cost and recency are always seen together.
struct CacheState {
    thumbnails: HashMap<StoredImageKey, Arc<Bitmap>>,
    images: LruCache<StoredImageKey, CacheEntry>,
    image_cost: u64,
    fills: HashMap<(StoredImageKey, ImageVariant), FillTicket>,
    next_ticket: u64,
}

/// Scales a full image down to `max_width` if it is wider.
///
/// This is the resize [`MemoryImageCache::put_image`] applies. Callers on an
/// async runtime run it in `spawn_blocking` first so the insert stays cheap.
#[must_use]
pub fn normalize_for_display(bitmap: Bitmap, max_width: u32) -> Bitmap {
    if bitmap.width() > max_width {
        codec::fit_width(&bitmap, max_width)
    } else {
        bitmap
    }
}

/// Thread-safe two-tier cache for decoded bitmaps.
pub struct MemoryImageCache {
    state: Mutex<CacheState>,
    limits: CacheLimits,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the given limits.
    #[must_use]
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            state: Mutex::new(CacheState {
                thumbnails: HashMap::new(),
                images: LruCache::unbounded(),
                image_cost: 0,
                fills: HashMap::new(),
                next_ticket: 0,
            }),
            limits,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default limits.
    #[must_use]
    pub fn with_default_limits() -> Self {
        Self::new(CacheLimits::default())
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Looks up a thumbnail.
    pub fn get_thumbnail(&self, key: &StoredImageKey) -> Option<Arc<Bitmap>> {
        let found = self.state.lock().thumbnails.get(key).cloned();
        self.record_lookup(key, "thumbnail", found.is_some());
        found
    }

    /// Looks up a full image and marks it most recently used.
    pub fn get_image(&self, key: &StoredImageKey) -> Option<Arc<Bitmap>> {
        let found = self
            .state
            .lock()
            .images
            .get(key)
            .map(|entry| entry.bitmap.clone());
        self.record_lookup(key, "image", found.is_some());
        found
    }

    /// Looks up a full image without touching its recency or the stats.
    pub fn peek_image(&self, key: &StoredImageKey) -> Option<Arc<Bitmap>> {
        self.state
            .lock()
            .images
            .peek(key)
            .map(|entry| entry.bitmap.clone())
    }

    /// Looks up a thumbnail without touching the stats.
    pub fn peek_thumbnail(&self, key: &StoredImageKey) -> Option<Arc<Bitmap>> {
        self.state.lock().thumbnails.get(key).cloned()
    }

    /// Stores a thumbnail, replacing any previous one for the key.
    pub fn put_thumbnail(&self, key: StoredImageKey, bitmap: Bitmap) -> Arc<Bitmap> {
        let bitmap = Arc::new(bitmap);
        debug!(key = %key, "Storing thumbnail in memory cache");
        self.state.lock().thumbnails.insert(key, bitmap.clone());
        bitmap
    }

    /// Stores a full image and evicts least recently used images until both
    /// ceilings hold again.
    ///
    /// Images wider than the display width are downscaled first; the
    /// returned bitmap is exactly what was cached. The image just inserted
    /// is never evicted by its own insertion, so one image costlier than the
    /// whole budget stays until the next insert pushes it out.
    pub fn put_image(&self, key: StoredImageKey, bitmap: Bitmap) -> Arc<Bitmap> {
        let bitmap = Arc::new(normalize_for_display(
            bitmap,
            self.limits.max_display_width,
        ));
        let mut state = self.state.lock();
        self.insert_image(&mut state, key, bitmap.clone());
        bitmap
    }

    fn insert_image(&self, state: &mut CacheState, key: StoredImageKey, bitmap: Arc<Bitmap>) {
        let cost = bitmap.cost();
        if let Some(previous) = state.images.put(
            key.clone(),
            CacheEntry {
                bitmap: bitmap.clone(),
                cost,
            },
        ) {
            state.image_cost -= previous.cost;
        }
        state.image_cost += cost;
        debug!(key = %key, cost, total = state.image_cost, "Storing image in memory cache");

        while state.images.len() > 1
            && (state.image_cost > self.limits.max_image_cost
                || state.images.len() > self.limits.max_images)
        {
            let Some((evicted, entry)) = state.images.pop_lru() else {
                break;
            };
            state.image_cost -= entry.cost;
            debug!(key = %evicted, cost = entry.cost, "Evicted image from memory cache");
        }
    }

    /// Reserves the slot for `key` ahead of a disk read.
    ///
    /// A later ticket for the same slot supersedes an earlier one.
    pub fn begin_fill(&self, key: &StoredImageKey, variant: ImageVariant) -> FillTicket {
        let mut state = self.state.lock();
        let ticket = FillTicket(state.next_ticket);
        state.next_ticket += 1;
        state.fills.insert((key.clone(), variant), ticket);
        ticket
    }

    /// Stores the result of a read if `ticket` is still valid.
    ///
    /// Returns `None` without caching anything if the key was invalidated
    /// or the cache cleared since [`Self::begin_fill`]. Full images go through
    /// the same display normalisation as [`Self::put_image`].
    pub fn commit_fill(
        &self,
        key: StoredImageKey,
        variant: ImageVariant,
        ticket: FillTicket,
        bitmap: Bitmap,
    ) -> Option<Arc<Bitmap>> {
        let bitmap = match variant {
            ImageVariant::Full => normalize_for_display(bitmap, self.limits.max_display_width),
            ImageVariant::Thumbnail => bitmap,
        };
        let bitmap = Arc::new(bitmap);

        let mut state = self.state.lock();
        let slot = (key, variant);
        if state.fills.get(&slot) != Some(&ticket) {
            debug!(key = %slot.0, variant = %variant, "Dropped stale read result");
            return None;
        }
        state.fills.remove(&slot);
        let (key, _) = slot;

        match variant {
            ImageVariant::Full => {
                debug!(key = %key, "Filling image from read");
                self.insert_image(&mut state, key, bitmap.clone());
            }
            ImageVariant::Thumbnail => {
                debug!(key = %key, "Filling thumbnail from read");
                state.thumbnails.insert(key, bitmap.clone());
            }
        }
        Some(bitmap)
    }

    /// Releases `ticket` without storing anything.
    pub fn abandon_fill(&self, key: &StoredImageKey, variant: ImageVariant, ticket: FillTicket) {
        let mut state = self.state.lock();
        let slot = (key.clone(), variant);
        if state.fills.get(&slot) == Some(&ticket) {
            state.fills.remove(&slot);
        }
    }

    /// Drops both tiers' entries for a key. Absent keys are ignored.
    pub fn invalidate(&self, key: &StoredImageKey) {
        let mut state = self.state.lock();
        for variant in [ImageVariant::Full, ImageVariant::Thumbnail] {
            state.fills.remove(&(key.clone(), variant));
        }
        let thumbnail = state.thumbnails.remove(key).is_some();
        let image = state.images.pop(key);
        if let Some(entry) = &image {
            state.image_cost -= entry.cost;
        }
        if thumbnail || image.is_some() {
            debug!(key = %key, "Invalidated cached bitmap");
        }
    }

    /// Drops everything. Intended for memory pressure only.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.thumbnails.clear();
        state.images.clear();
        state.image_cost = 0;
        state.fills.clear();
        debug!("Cleared memory image cache");
    }

    /// Returns true if a full image is cached for the key.
    pub fn contains_image(&self, key: &StoredImageKey) -> bool {
        self.state.lock().images.contains(key)
    }

    /// Returns true if a thumbnail is cached for the key.
    pub fn contains_thumbnail(&self, key: &StoredImageKey) -> bool {
        self.state.lock().thumbnails.contains_key(key)
    }

    /// Summed cost of the cached full images.
    pub fn image_cost(&self) -> u64 {
        self.state.lock().image_cost
    }

    /// Cached full-image keys, least recently used first.
    pub fn image_keys_lru_order(&self) -> Vec<StoredImageKey> {
        let state = self.state.lock();
        let mut keys: Vec<_> = state.images.iter().map(|(key, _)| key.clone()).collect();
        keys.reverse();
        keys
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let state = self.state.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            images: state.images.len(),
            thumbnails: state.thumbnails.len(),
            image_cost: state.image_cost,
        }
    }

    fn record_lookup(&self, key: &StoredImageKey, tier: &'static str, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, tier, "Memory cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, tier, "Memory cache miss");
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::with_default_limits()
    }
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryImageCache")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached full images.
    pub images: usize,
    /// Current number of cached thumbnails.
    pub thumbnails: usize,
    /// Summed cost of cached full images in bytes.
    pub image_cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {} thumbnails, {:.1}% hit rate ({} hits, {} misses)",
            self.images,
            self.image_cost,
            self.thumbnails,
            self.hit_rate,
            self.hits,
            self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    // 10x10 RGBA = 400 bytes.
    const SMALL_COST: u64 = 400;

    fn small() -> Bitmap {
        Bitmap::new(DynamicImage::new_rgb8(10, 10))
    }

    fn key(name: &str) -> StoredImageKey {
        StoredImageKey::new(name)
    }

    fn limits(max_images: usize, max_image_cost: u64) -> CacheLimits {
        CacheLimits {
            max_images,
            max_image_cost,
            max_display_width: DEFAULT_MAX_DISPLAY_WIDTH,
        }
    }

    #[test]
    fn test_put_and_get_image() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_image(key("a"), small());

        let retrieved = cache.get_image(&key("a"));
        assert_eq!(retrieved.map(|b| b.width()), Some(10));
        assert_eq!(cache.image_cost(), SMALL_COST);
    }

    #[test]
    fn test_miss_never_errors() {
        let cache = MemoryImageCache::with_default_limits();
        assert!(cache.get_image(&key("missing")).is_none());
        assert!(cache.get_thumbnail(&key("missing")).is_none());
    }

    #[test]
    fn test_tiers_are_independent() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_thumbnail(key("a"), small());

        assert!(cache.get_thumbnail(&key("a")).is_some());
        assert!(cache.get_image(&key("a")).is_none());
    }

    #[test]
    fn test_count_ceiling_evicts_least_recently_used() {
        let cache = MemoryImageCache::new(limits(3, u64::MAX));
        cache.put_image(key("a"), small());
        cache.put_image(key("b"), small());
        cache.put_image(key("c"), small());

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get_image(&key("a")).is_some());
        cache.put_image(key("d"), small());

        assert!(cache.peek_image(&key("b")).is_none());
        assert_eq!(cache.image_keys_lru_order(), vec![key("c"), key("a"), key("d")]);
    }

    #[test]
    fn test_cost_ceiling_holds_after_every_insert() {
        let cache = MemoryImageCache::new(limits(100, SMALL_COST * 5));
        for i in 0..20 {
            cache.put_image(key(&format!("img{i}")), small());
            assert!(cache.image_cost() <= SMALL_COST * 5);
        }
        let expected: Vec<_> = (15..20).map(|i| key(&format!("img{i}"))).collect();
        assert_eq!(cache.image_keys_lru_order(), expected);
    }

    #[test]
    fn test_mixed_costs_evict_until_under_budget() {
        let cache = MemoryImageCache::new(limits(100, 2000));
        cache.put_image(key("a"), small());
        cache.put_image(key("b"), small());
        cache.put_image(key("c"), small());
        // 20x20 = 1600 bytes: "a" and "b" must go, "c" fits alongside.
        cache.put_image(key("big"), Bitmap::new(DynamicImage::new_rgb8(20, 20)));

        assert_eq!(cache.image_keys_lru_order(), vec![key("c"), key("big")]);
        assert_eq!(cache.image_cost(), SMALL_COST + 1600);
    }

    #[test]
    fn test_oversized_image_survives_until_next_insert() {
        let cache = MemoryImageCache::new(limits(10, SMALL_COST));
        cache.put_image(key("a"), small());
        let big = cache.put_image(key("huge"), Bitmap::new(DynamicImage::new_rgb8(50, 50)));

        assert_eq!(big.dimensions(), (50, 50));
        assert_eq!(cache.image_keys_lru_order(), vec![key("huge")]);

        cache.put_image(key("b"), small());
        assert_eq!(cache.image_keys_lru_order(), vec![key("b")]);
        assert_eq!(cache.image_cost(), SMALL_COST);
    }

    #[test]
    fn test_overwrite_replaces_cost() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_image(key("a"), small());
        cache.put_image(key("a"), Bitmap::new(DynamicImage::new_rgb8(20, 10)));

        assert_eq!(cache.stats().images, 1);
        assert_eq!(cache.image_cost(), 800);
    }

    #[test]
    fn test_put_image_downscales_to_display_width() {
        let cache = MemoryImageCache::new(CacheLimits {
            max_display_width: 100,
            ..CacheLimits::default()
        });
        let stored = cache.put_image(key("wide"), Bitmap::new(DynamicImage::new_rgb8(400, 200)));

        assert_eq!(stored.dimensions(), (100, 50));
        assert_eq!(cache.image_cost(), 100 * 50 * 4);
    }

    #[test]
    fn test_invalidate_both_tiers_and_is_idempotent() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_image(key("a"), small());
        cache.put_thumbnail(key("a"), small());

        cache.invalidate(&key("a"));
        assert!(!cache.contains_image(&key("a")));
        assert!(!cache.contains_thumbnail(&key("a")));
        assert_eq!(cache.image_cost(), 0);

        cache.invalidate(&key("a"));
        cache.invalidate(&key("never-there"));
        assert_eq!(cache.image_cost(), 0);
    }

    #[test]
    fn test_clear() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_image(key("a"), small());
        cache.put_thumbnail(key("b"), small());

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.images, 0);
        assert_eq!(stats.thumbnails, 0);
        assert_eq!(stats.image_cost, 0);
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryImageCache::with_default_limits();
        cache.put_image(key("a"), small());

        // Hit
        let _ = cache.get_image(&key("a"));
        // Miss
        let _ = cache.get_thumbnail(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.images, 1);
        assert!(stats.to_string().contains("50.0% hit rate"));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryImageCache::new(limits(2, u64::MAX));
        cache.put_image(key("a"), small());
        cache.put_image(key("b"), small());

        let _ = cache.peek_image(&key("a"));
        cache.put_image(key("c"), small());

        assert!(cache.peek_image(&key("a")).is_none());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_concurrent_puts_respect_ceilings() {
        let cache = Arc::new(MemoryImageCache::new(limits(15, SMALL_COST * 15)));

        std::thread::scope(|scope| {
            for t in 0..8 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for i in 0..50 {
                        let k = key(&format!("t{t}-{i}"));
                        cache.put_image(k.clone(), small());
                        let _ = cache.get_image(&k);
                        if i % 7 == 0 {
                            cache.invalidate(&k);
                        }
                    }
                });
            }
        });

        let stats = cache.stats();
        assert!(stats.images <= 15);
        assert!(stats.image_cost <= SMALL_COST * 15);
        assert_eq!(stats.image_cost, stats.images as u64 * SMALL_COST);
    }

    #[test]
    fn test_fill_commits_when_untouched() {
        let cache = MemoryImageCache::default();
        let ticket = cache.begin_fill(&key("a"), ImageVariant::Full);

        let stored = cache.commit_fill(key("a"), ImageVariant::Full, ticket, small());
        assert!(stored.is_some());
        assert!(cache.contains_image(&key("a")));
        assert!(!cache.contains_thumbnail(&key("a")));
    }

    #[test]
    fn test_invalidate_revokes_pending_fill() {
        let cache = MemoryImageCache::default();
        let full = cache.begin_fill(&key("a"), ImageVariant::Full);
        let thumb = cache.begin_fill(&key("a_thumb"), ImageVariant::Thumbnail);

        cache.invalidate(&key("a"));
        cache.invalidate(&key("a_thumb"));

        assert!(
            cache
                .commit_fill(key("a"), ImageVariant::Full, full, small())
                .is_none()
        );
        assert!(
            cache
                .commit_fill(key("a_thumb"), ImageVariant::Thumbnail, thumb, small())
                .is_none()
        );
        assert_eq!(cache.stats().images, 0);
        assert_eq!(cache.stats().thumbnails, 0);
    }

    #[test]
    fn test_clear_revokes_pending_fill() {
        let cache = MemoryImageCache::default();
        let ticket = cache.begin_fill(&key("a"), ImageVariant::Full);
        cache.clear();

        assert!(
            cache
                .commit_fill(key("a"), ImageVariant::Full, ticket, small())
                .is_none()
        );
        assert!(!cache.contains_image(&key("a")));
    }

    #[test]
    fn test_fill_after_invalidate_uses_new_ticket() {
        let cache = MemoryImageCache::default();
        let stale = cache.begin_fill(&key("a"), ImageVariant::Full);
        cache.invalidate(&key("a"));
        let fresh = cache.begin_fill(&key("a"), ImageVariant::Full);

        assert!(
            cache
                .commit_fill(key("a"), ImageVariant::Full, stale, small())
                .is_none()
        );
        assert!(
            cache
                .commit_fill(key("a"), ImageVariant::Full, fresh, small())
                .is_some()
        );
    }

    #[test]
    fn test_abandon_fill_releases_slot() {
        let cache = MemoryImageCache::default();
        let ticket = cache.begin_fill(&key("a"), ImageVariant::Thumbnail);
        cache.abandon_fill(&key("a"), ImageVariant::Thumbnail, ticket);

        assert!(
            cache
                .commit_fill(key("a"), ImageVariant::Thumbnail, ticket, small())
                .is_none()
        );
    }

    #[test]
    fn test_normalize_for_display() {
        let wide = Bitmap::new(DynamicImage::new_rgb8(2640, 100));
        assert_eq!(normalize_for_display(wide, 1320).dimensions(), (1320, 50));
        assert_eq!(normalize_for_display(small(), 1320).dimensions(), (10, 10));
    }
}
