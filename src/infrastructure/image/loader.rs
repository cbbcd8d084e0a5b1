//! Async image loading orchestrator.
//!
//! Sits between views and the disk store: serves cache hits immediately,
//! folds concurrent misses for one key into a single read, and lets views
//! walk away from loads they no longer need.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, oneshot};
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{
    Bitmap, EntryImages, ImageVariant, LoadOutcome, Priority, StoredImageKey,
};
use crate::domain::ports::ImageStorePort;
use crate::domain::services::PreloadPlanner;

use super::memory_cache::{self, FillTicket, MemoryImageCache};

/// Default number of interactive reads allowed at once.
pub const DEFAULT_INTERACTIVE_PERMITS: usize = 4;
/// Default number of background reads allowed at once.
pub const DEFAULT_BACKGROUND_PERMITS: usize = 2;

/// Configuration for the image loader.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Maximum concurrent reads for interactive requests.
    pub interactive_permits: usize,
    /// Maximum concurrent reads for background requests.
    pub background_permits: usize,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            interactive_permits: DEFAULT_INTERACTIVE_PERMITS,
            background_permits: DEFAULT_BACKGROUND_PERMITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoadKey {
    key: StoredImageKey,
    variant: ImageVariant,
}

type WaiterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Waiting for a read permit; still cancellable.
    Queued,
    /// The disk read has begun and will finish regardless of waiters.
    Reading,
}

/// One pending read and everyone waiting on it.
struct InFlightRequest {
    waiters: Vec<(WaiterId, oneshot::Sender<LoadOutcome>)>,
    /// Started or joined by a preload; runs even with no waiters.
    warm: bool,
    priority: Priority,
    state: RequestState,
    upgrade: Arc<Notify>,
}

impl InFlightRequest {
    fn is_abandoned(&self) -> bool {
        self.waiters.is_empty() && !self.warm
    }
}

/// In-flight requests, shared between the loader, its tasks and handles.
#[derive(Default)]
struct Registry {
    requests: Mutex<HashMap<LoadKey, InFlightRequest>>,
}

impl Registry {
    fn detach(&self, load_key: &LoadKey, waiter: WaiterId) {
        let mut requests = self.requests.lock();
        let Some(request) = requests.get_mut(load_key) else {
            return;
        };
        request.waiters.retain(|(id, _)| *id != waiter);

        if request.is_abandoned() {
            match request.state {
                RequestState::Queued => {
                    debug!(key = %load_key.key, variant = %load_key.variant, "Cancelled queued image load");
                }
                RequestState::Reading => {
                    trace!(key = %load_key.key, "Last waiter left, read will still fill the cache");
                }
            }
        }
    }

    /// Removes the request and hands `outcome` to every remaining waiter.
    fn complete(&self, load_key: &LoadKey, outcome: &LoadOutcome) {
        let waiters = self
            .requests
            .lock()
            .remove(load_key)
            .map(|request| request.waiters)
            .unwrap_or_default();

        for (_, tx) in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}

/// Everything a load task needs.
#[derive(Clone)]
struct LoadContext {
    cache: Arc<MemoryImageCache>,
    store: Arc<dyn ImageStorePort>,
    registry: Arc<Registry>,
    interactive: Arc<Semaphore>,
    background: Arc<Semaphore>,
}

/// Coordinates cache lookups and disk reads for decoded images.
pub struct ImageLoader {
    ctx: LoadContext,
    next_waiter: AtomicU64,
    config: ImageLoaderConfig,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageLoader {
    /// Creates a new loader over the given cache and store.
    #[must_use]
    pub fn new(
        config: ImageLoaderConfig,
        cache: Arc<MemoryImageCache>,
        store: Arc<dyn ImageStorePort>,
    ) -> Self {
        let ctx = LoadContext {
            cache,
            store,
            registry: Arc::new(Registry::default()),
            interactive: Arc::new(Semaphore::new(config.interactive_permits.max(1))),
            background: Arc::new(Semaphore::new(config.background_permits.max(1))),
        };
        Self {
            ctx,
            next_waiter: AtomicU64::new(0),
            config,
        }
    }

    /// Requests an image.
    ///
    /// A cache hit yields a handle that is already complete. Otherwise the
    /// caller joins the in-flight read for the key, or starts one, so each
    /// key has at most one read running at a time. Must be called from
    /// within a Tokio runtime.
    pub fn request(
        &self,
        key: &StoredImageKey,
        variant: ImageVariant,
        priority: Priority,
    ) -> LoadHandle {
        let load_key = LoadKey {
            key: key.clone(),
            variant,
        };

        if let Some(bitmap) = self.cached(&load_key) {
            return LoadHandle::ready(load_key, bitmap, self.ctx.registry.clone());
        }

        let (tx, rx) = oneshot::channel();
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        match self.attach(&load_key, priority, Some((waiter, tx))) {
            Some(bitmap) => LoadHandle::ready(load_key, bitmap, self.ctx.registry.clone()),
            None => LoadHandle {
                load_key,
                state: HandleState::Waiting { waiter, rx },
                registry: self.ctx.registry.clone(),
            },
        }
    }

    /// Requests an image and waits for the outcome.
    pub async fn load(
        &self,
        key: &StoredImageKey,
        variant: ImageVariant,
        priority: Priority,
    ) -> LoadOutcome {
        self.request(key, variant, priority).wait().await
    }

    /// Withdraws interest in a request.
    ///
    /// Cancelling the last waiter of a load that has not started reading
    /// skips the read. A read already under way still fills the cache.
    pub fn cancel(&self, handle: LoadHandle) {
        handle.cancel();
    }

    /// Warms the cache for `keys` without anyone waiting on the results.
    pub fn preload<'a, I>(&self, keys: I, variant: ImageVariant, priority: Priority)
    where
        I: IntoIterator<Item = &'a StoredImageKey>,
    {
        for key in keys {
            let load_key = LoadKey {
                key: key.clone(),
                variant,
            };
            if self.is_cached(&load_key) {
                continue;
            }
            let _ = self.attach(&load_key, priority, None);
        }
    }

    /// Warms full images of the entries around `index`, nearest first.
    pub fn preload_around(&self, entries: &[EntryImages], index: usize, radius: usize) {
        let keys: Vec<_> = PreloadPlanner::adjacent_indices(index, entries.len(), radius)
            .into_iter()
            .map(|i| &entries[i].pair.full)
            .collect();
        trace!(index, count = keys.len(), "Preloading images around entry");
        self.preload(keys, ImageVariant::Full, Priority::Background);
    }

    /// Warms thumbnails for a month and, at lower priority, its neighbours.
    pub fn preload_months(&self, entries: &[EntryImages], year: i32, month: u32) {
        let current = PreloadPlanner::entries_in_month(entries, year, month)
            .map(|entry| &entry.pair.thumbnail);
        self.preload(current, ImageVariant::Thumbnail, Priority::Interactive);

        for (year, month) in PreloadPlanner::adjacent_months(year, month) {
            let adjacent = PreloadPlanner::entries_in_month(entries, year, month)
                .map(|entry| &entry.pair.thumbnail);
            self.preload(adjacent, ImageVariant::Thumbnail, Priority::Background);
        }
    }

    /// Detaches every waiter. Queued reads are skipped; running reads still
    /// fill the cache.
    pub fn cancel_all(&self) {
        let mut requests = self.ctx.registry.requests.lock();
        let mut count = 0usize;
        for request in requests.values_mut() {
            count += request.waiters.len();
            request.waiters.clear();
            request.warm = false;
        }
        if count > 0 {
            debug!(count, "Cancelled all pending image loads");
        }
    }

    /// Returns true if a read for the key is queued or running.
    pub fn is_loading(&self, key: &StoredImageKey, variant: ImageVariant) -> bool {
        let load_key = LoadKey {
            key: key.clone(),
            variant,
        };
        self.ctx.registry.requests.lock().contains_key(&load_key)
    }

    /// Returns the number of queued or running reads.
    pub fn pending_count(&self) -> usize {
        self.ctx.registry.requests.lock().len()
    }

    fn cached(&self, load_key: &LoadKey) -> Option<Arc<Bitmap>> {
        match load_key.variant {
            ImageVariant::Full => self.ctx.cache.get_image(&load_key.key),
            ImageVariant::Thumbnail => self.ctx.cache.get_thumbnail(&load_key.key),
        }
    }

    fn is_cached(&self, load_key: &LoadKey) -> bool {
        match load_key.variant {
            ImageVariant::Full => self.ctx.cache.contains_image(&load_key.key),
            ImageVariant::Thumbnail => self.ctx.cache.contains_thumbnail(&load_key.key),
        }
    }

    /// Joins or starts the read for `load_key`. A `None` waiter marks the
    /// read as a preload. Returns the bitmap if it reached the cache since
    /// the caller last looked.
    fn attach(
        &self,
        load_key: &LoadKey,
        priority: Priority,
        waiter: Option<(WaiterId, oneshot::Sender<LoadOutcome>)>,
    ) -> Option<Arc<Bitmap>> {
        let mut requests = self.ctx.registry.requests.lock();

        // A finishing read fills the cache before leaving the registry, so
        // checking again under the lock closes the gap since the first look.
        let cached = match load_key.variant {
            ImageVariant::Full => self.ctx.cache.peek_image(&load_key.key),
            ImageVariant::Thumbnail => self.ctx.cache.peek_thumbnail(&load_key.key),
        };
        if cached.is_some() {
            return cached;
        }

        let warm = waiter.is_none();

        if let Some(request) = requests.get_mut(load_key) {
            trace!(key = %load_key.key, variant = %load_key.variant, "Joining in-flight load");
            request.waiters.extend(waiter);
            request.warm |= warm;
            if priority == Priority::Interactive
                && request.priority == Priority::Background
                && request.state == RequestState::Queued
            {
                request.priority = Priority::Interactive;
                request.upgrade.notify_one();
                debug!(key = %load_key.key, "Raised queued load to interactive");
            }
            return None;
        }

        let upgrade = Arc::new(Notify::new());
        requests.insert(
            load_key.clone(),
            InFlightRequest {
                waiters: waiter.into_iter().collect(),
                warm,
                priority,
                state: RequestState::Queued,
                upgrade: upgrade.clone(),
            },
        );
        drop(requests);

        trace!(key = %load_key.key, variant = %load_key.variant, %priority, "Queued image load");
        tokio::spawn(Self::run_load(
            self.ctx.clone(),
            load_key.clone(),
            priority,
            upgrade,
        ));
        None
    }

    async fn run_load(
        ctx: LoadContext,
        load_key: LoadKey,
        priority: Priority,
        upgrade: Arc<Notify>,
    ) {
        let permit = match priority {
            Priority::Interactive => ctx.interactive.clone().acquire_owned().await,
            Priority::Background => tokio::select! {
                permit = ctx.background.clone().acquire_owned() => permit,
                () = upgrade.notified() => ctx.interactive.clone().acquire_owned().await,
            },
        };
        let Ok(_permit) = permit else {
            ctx.registry.complete(
                &load_key,
                &LoadOutcome::Failed("image loader shut down".to_string()),
            );
            return;
        };

        // Invalidating the key during the read revokes this ticket.
        let ticket = {
            let mut requests = ctx.registry.requests.lock();
            match requests.get_mut(&load_key) {
                Some(request) if request.is_abandoned() => {
                    requests.remove(&load_key);
                    debug!(key = %load_key.key, "Skipped read for cancelled load");
                    return;
                }
                Some(request) => {
                    request.state = RequestState::Reading;
                    ctx.cache.begin_fill(&load_key.key, load_key.variant)
                }
                None => return,
            }
        };

        let outcome = match ctx.store.load(&load_key.key, load_key.variant).await {
            Ok(Some(bitmap)) => Self::fill_cache(&ctx, &load_key, ticket, bitmap).await,
            Ok(None) => {
                ctx.cache
                    .abandon_fill(&load_key.key, load_key.variant, ticket);
                LoadOutcome::NotFound
            }
            Err(e) => {
                ctx.cache
                    .abandon_fill(&load_key.key, load_key.variant, ticket);
                if e.is_recoverable() {
                    warn!(key = %load_key.key, error = %e, "Image load failed");
                } else {
                    error!(key = %load_key.key, error = %e, "Image load failed");
                }
                LoadOutcome::Failed(e.to_string())
            }
        };

        ctx.registry.complete(&load_key, &outcome);
    }

    /// Downscales a full image off the runtime, then stores it if the key
    /// was not invalidated while it was being read.
    async fn fill_cache(
        ctx: &LoadContext,
        load_key: &LoadKey,
        ticket: FillTicket,
        bitmap: Bitmap,
    ) -> LoadOutcome {
        let bitmap = match load_key.variant {
            ImageVariant::Full => {
                let max_width = ctx.cache.limits().max_display_width;
                match tokio::task::spawn_blocking(move || {
                    memory_cache::normalize_for_display(bitmap, max_width)
                })
                .await
                {
                    Ok(bitmap) => bitmap,
                    Err(e) => {
                        error!(key = %load_key.key, error = %e, "Resize task panicked");
                        ctx.cache
                            .abandon_fill(&load_key.key, load_key.variant, ticket);
                        return LoadOutcome::Failed(format!("resize task failed: {e}"));
                    }
                }
            }
            ImageVariant::Thumbnail => bitmap,
        };

        match ctx
            .cache
            .commit_fill(load_key.key.clone(), load_key.variant, ticket, bitmap)
        {
            Some(stored) => {
                debug!(key = %load_key.key, variant = %load_key.variant, "Image loaded");
                LoadOutcome::Delivered(stored)
            }
            None => {
                debug!(key = %load_key.key, "Image invalidated while loading");
                LoadOutcome::NotFound
            }
        }
    }
}

enum HandleState {
    Ready(Arc<Bitmap>),
    Waiting {
        waiter: WaiterId,
        rx: oneshot::Receiver<LoadOutcome>,
    },
    Finished,
}

/// A caller's claim on one requested image.
///
/// Dropping the handle before the result arrives cancels it, same as
/// [`LoadHandle::cancel`].
pub struct LoadHandle {
    load_key: LoadKey,
    state: HandleState,
    registry: Arc<Registry>,
}

impl LoadHandle {
    fn ready(load_key: LoadKey, bitmap: Arc<Bitmap>, registry: Arc<Registry>) -> Self {
        Self {
            load_key,
            state: HandleState::Ready(bitmap),
            registry,
        }
    }

    /// Key this handle was requested for.
    #[must_use]
    pub const fn key(&self) -> &StoredImageKey {
        &self.load_key.key
    }

    /// Variant this handle was requested for.
    #[must_use]
    pub const fn variant(&self) -> ImageVariant {
        self.load_key.variant
    }

    /// Returns true if the request was served from the cache.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }

    /// Waits for the outcome.
    pub async fn wait(mut self) -> LoadOutcome {
        let outcome = match &mut self.state {
            HandleState::Ready(bitmap) => LoadOutcome::Delivered(bitmap.clone()),
            HandleState::Waiting { rx, .. } => rx.await.unwrap_or(LoadOutcome::Cancelled),
            HandleState::Finished => LoadOutcome::Cancelled,
        };
        self.state = HandleState::Finished;
        outcome
    }

    /// Withdraws this caller's interest in the result.
    pub fn cancel(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let HandleState::Waiting { waiter, .. } =
            std::mem::replace(&mut self.state, HandleState::Finished)
        {
            self.registry.detach(&self.load_key, waiter);
        }
    }
}

impl Drop for LoadHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("key", &self.load_key.key)
            .field("variant", &self.load_key.variant)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
