//! Domain entity definitions.

mod image;

pub use image::{
    BYTES_PER_PIXEL, Bitmap, EntryImages, ImagePair, ImageVariant, LoadOutcome, Priority,
    StoredImageKey,
};
