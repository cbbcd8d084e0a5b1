//! Image codec and storage error types.

use thiserror::Error;

/// Result type for durable store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Codec failures.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum CodecError {
    #[error("failed to encode image: {message}")]
    Encode { message: String },

    #[error("failed to decode image: {message}")]
    Decode { message: String },
}

impl CodecError {
    /// Creates encode error.
    #[must_use]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Durable store failures.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("encode error: {message}")]
    Encode { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("failed to write {variant} file, pair rolled back: {message}")]
    PartialWrite { variant: String, message: String },

    #[error("background task failed: {message}")]
    Task { message: String },
}

impl StoreError {
    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates partial write error.
    #[must_use]
    pub fn partial_write(variant: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::PartialWrite {
            variant: variant.to_string(),
            message: message.into(),
        }
    }

    /// Creates task error.
    #[must_use]
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }

    /// Returns whether retrying the same operation later could succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::PartialWrite { .. } | Self::Task { .. }
        )
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode { message } => Self::Encode { message },
            CodecError::Decode { message } => Self::Decode { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_conversion() {
        let err: StoreError = CodecError::encode("no pixels").into();
        assert!(matches!(err, StoreError::Encode { .. }));
        assert!(!err.is_recoverable());

        let err: StoreError = CodecError::decode("truncated").into();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn test_partial_write_message() {
        let err = StoreError::partial_write("thumbnail", "disk full");
        assert_eq!(
            err.to_string(),
            "failed to write thumbnail file, pair rolled back: disk full"
        );
        assert!(err.is_recoverable());
    }
}
