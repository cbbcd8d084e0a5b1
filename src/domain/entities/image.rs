//! Domain types for stored photos and decoded bitmaps.

use std::sync::Arc;

use chrono::NaiveDate;
use image::DynamicImage;
use image::metadata::Orientation;

/// Bytes per decoded pixel used for cost accounting (32-bit RGBA).
pub const BYTES_PER_PIXEL: u64 = 4;

/// Globally unique filename identifying one stored image variant.
/// Issued at store time and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoredImageKey(String);

impl StoredImageKey {
    /// Wraps an existing filename, e.g. one persisted on a diary entry record.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generates a fresh key for the given variant.
    #[must_use]
    pub fn generate(variant: ImageVariant) -> Self {
        let id = uuid::Uuid::new_v4().to_string().to_uppercase();
        match variant {
            ImageVariant::Full => Self(format!("{id}.jpg")),
            ImageVariant::Thumbnail => Self(format!("{id}_thumb.jpg")),
        }
    }

    /// Returns the inner filename.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key can be used as a plain file name.
    ///
    /// Keys come from entry records, so anything that could escape the
    /// image directories is refused before touching the filesystem.
    #[must_use]
    pub fn is_valid_file_name(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl std::fmt::Display for StoredImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StoredImageKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StoredImageKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Which of the two stored renditions of a photo a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageVariant {
    /// Full-resolution rendition (longest edge capped at a few thousand pixels).
    Full,
    /// Small rendition used by calendar cells and indicators.
    Thumbnail,
}

impl std::fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// The two keys written together for one diary entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImagePair {
    /// Key of the full-resolution file.
    pub full: StoredImageKey,
    /// Key of the thumbnail file.
    pub thumbnail: StoredImageKey,
}

impl ImagePair {
    /// Creates a pair from two existing keys.
    #[must_use]
    pub const fn new(full: StoredImageKey, thumbnail: StoredImageKey) -> Self {
        Self { full, thumbnail }
    }

    /// Generates a fresh, never-used pair of keys.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            full: StoredImageKey::generate(ImageVariant::Full),
            thumbnail: StoredImageKey::generate(ImageVariant::Thumbnail),
        }
    }

    /// Returns the key for the requested variant.
    #[must_use]
    pub const fn key(&self, variant: ImageVariant) -> &StoredImageKey {
        match variant {
            ImageVariant::Full => &self.full,
            ImageVariant::Thumbnail => &self.thumbnail,
        }
    }
}

/// A decoded image plus the orientation it should be displayed with.
///
/// Pixels are stored as decoded. `orientation` describes the rotation or
/// mirroring still to be applied; the codec bakes it into the pixels before
/// encoding, so everything read back from disk is `NoTransforms`.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pixels: DynamicImage,
    orientation: Orientation,
}

impl Bitmap {
    /// Creates an upright bitmap.
    #[must_use]
    pub const fn new(pixels: DynamicImage) -> Self {
        Self {
            pixels,
            orientation: Orientation::NoTransforms,
        }
    }

    /// Creates a bitmap whose pixels still need `orientation` applied.
    #[must_use]
    pub const fn with_orientation(pixels: DynamicImage, orientation: Orientation) -> Self {
        Self {
            pixels,
            orientation,
        }
    }

    /// Raw pixel buffer.
    #[must_use]
    pub const fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Consumes the bitmap, returning the raw pixel buffer.
    #[must_use]
    pub fn into_pixels(self) -> DynamicImage {
        self.pixels
    }

    /// Pending orientation transform.
    #[must_use]
    pub const fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Width of the stored pixel buffer.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height of the stored pixel buffer.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)` of the stored pixel buffer.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Approximate decoded memory footprint, as if held as 32-bit RGBA.
    #[must_use]
    pub fn cost(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height()) * BYTES_PER_PIXEL
    }

    /// Returns true if there are no pixels to encode.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Scheduling hint for a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// A visible view is waiting on the image.
    #[default]
    Interactive,
    /// Cache warming for content the user has not reached yet.
    Background,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interactive => write!(f, "interactive"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Final state of one load request.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The image is available.
    Delivered(Arc<Bitmap>),
    /// No file exists for the key, or its bytes could not be decoded.
    NotFound,
    /// The request was cancelled before a result arrived.
    Cancelled,
    /// Reading failed for a reason other than absence.
    Failed(String),
}

impl LoadOutcome {
    /// Returns the bitmap if the load was delivered.
    #[must_use]
    pub fn bitmap(&self) -> Option<&Arc<Bitmap>> {
        match self {
            Self::Delivered(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    /// Consumes the outcome, returning the bitmap if delivered.
    #[must_use]
    pub fn into_bitmap(self) -> Option<Arc<Bitmap>> {
        match self {
            Self::Delivered(bitmap) => Some(bitmap),
            _ => None,
        }
    }

    /// Returns true if the image was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// Returns true if the request was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The image keys a diary entry record holds, with the day it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryImages {
    /// Calendar day of the entry.
    pub date: NaiveDate,
    /// Stored photo keys.
    pub pair: ImagePair,
}

impl EntryImages {
    /// Creates a new entry reference.
    #[must_use]
    pub const fn new(date: NaiveDate, pair: ImagePair) -> Self {
        Self { date, pair }
    }
}
