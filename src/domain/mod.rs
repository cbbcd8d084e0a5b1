//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Domain services.
pub mod services;

pub use entities::{Bitmap, ImagePair, ImageVariant, LoadOutcome, Priority, StoredImageKey};
pub use errors::{CodecError, StoreError, StoreResult};
pub use ports::ImageStorePort;
