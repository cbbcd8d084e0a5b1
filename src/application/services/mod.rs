pub mod image_services;

pub use image_services::{INITIAL_PRELOAD_RADIUS, ImageServices, PRELOAD_RADIUS};
