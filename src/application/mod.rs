//! Application layer composing the infrastructure into services.

/// Application services.
pub mod services;

pub use services::ImageServices;
