//! Port definition for durable image storage.

use async_trait::async_trait;

use crate::domain::entities::{Bitmap, ImagePair, ImageVariant, StoredImageKey};
use crate::domain::errors::StoreResult;

/// Port for durable photo storage.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageStorePort: Send + Sync {
    /// Stores both renditions of a photo and returns their new keys.
    /// Either both files exist afterwards or neither does.
    async fn save(&self, bitmap: Bitmap) -> StoreResult<ImagePair>;

    /// Reads and decodes one stored rendition.
    /// Returns `Ok(None)` if the file is absent, the key cannot name a file,
    /// or the bytes do not decode.
    async fn load(&self, key: &StoredImageKey, variant: ImageVariant)
    -> StoreResult<Option<Bitmap>>;

    /// Removes both renditions. Failures are logged, never propagated.
    async fn delete(&self, pair: &ImagePair);
}
