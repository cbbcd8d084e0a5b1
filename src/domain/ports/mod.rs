mod image_store_port;

pub use image_store_port::ImageStorePort;
#[cfg(test)]
pub use image_store_port::MockImageStorePort;
