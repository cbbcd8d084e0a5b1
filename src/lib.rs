//! Daygram - photo storage and caching for a personal diary.
//!
//! Photos are persisted as a full-size rendition plus a thumbnail, decoded
//! images are kept in a bounded memory cache, and an async loader serves
//! views without blocking them on disk reads.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer composing the image subsystem.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing storage, cache and configuration adapters.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "daygram";
