//! Error types for slidecast

use crate::{AudioCodec, Codec, Container};
use thiserror::Error;

/// Result type alias for slidecast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for slidecast operations
#[derive(Error, Debug)]
pub enum Error {
    /// Project configuration rejected before any resource work
    #[error("Invalid project: {0}")]
    ConfigValidation(String),

    /// A slide, logo or background image could not be decoded
    #[error("Failed to load resource: {0}")]
    ResourceLoad(String),

    /// The background audio track could not be decoded or rendered
    #[error("Failed to decode audio: {0}")]
    AudioDecode(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Codec is not available on this system
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// Container and video codec combination is not supported
    #[error("Container {container:?} does not support codec {codec:?}")]
    ContainerCodecMismatch { container: Container, codec: Codec },

    /// Container and audio codec combination is not supported
    #[error("Container {container:?} does not support audio codec {codec:?}")]
    ContainerAudioMismatch {
        container: Container,
        codec: AudioCodec,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Muxing error
    #[error("Muxing error: {0}")]
    Mux(String),

    /// FFmpeg process error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// The run was cancelled; no output was produced
    #[error("Render cancelled")]
    Cancelled,
}

impl Error {
    /// Build an [`Error::ConfigValidation`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Build an [`Error::ResourceLoad`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::ResourceLoad(msg.into())
    }

    /// Build an [`Error::AudioDecode`] value.
    pub fn audio(msg: impl Into<String>) -> Self {
        Self::AudioDecode(msg.into())
    }
}

/// Error code for FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Invalid input parameter or project configuration
    InvalidInput = 1,
    /// Codec not available
    CodecUnavailable = 2,
    /// Container/codec mismatch
    ContainerCodecMismatch = 3,
    /// I/O error
    IoError = 4,
    /// Encoding or muxing error
    EncodeError = 5,
    /// Image or audio decoding error
    DecodeError = 6,
    /// Run was cancelled
    Cancelled = 7,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::ConfigValidation(_) => ErrorCode::InvalidInput,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::ResourceLoad(_) => ErrorCode::DecodeError,
            Error::AudioDecode(_) => ErrorCode::DecodeError,
            Error::CodecUnavailable(_) => ErrorCode::CodecUnavailable,
            Error::ContainerCodecMismatch { .. } => ErrorCode::ContainerCodecMismatch,
            Error::ContainerAudioMismatch { .. } => ErrorCode::ContainerCodecMismatch,
            Error::Io(_) => ErrorCode::IoError,
            Error::Image(_) => ErrorCode::DecodeError,
            Error::Encode(_) => ErrorCode::EncodeError,
            Error::Mux(_) => ErrorCode::EncodeError,
            Error::Ffmpeg(_) => ErrorCode::EncodeError,
            Error::Cancelled => ErrorCode::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ErrorCode::from(&Error::config("no slides")),
            ErrorCode::InvalidInput
        );
        assert_eq!(
            ErrorCode::from(&Error::audio("bad track")),
            ErrorCode::DecodeError
        );
        assert_eq!(ErrorCode::from(&Error::Cancelled), ErrorCode::Cancelled);
    }

    #[test]
    fn test_error_messages() {
        let err = Error::resource("slide 'a': unsupported format");
        assert_eq!(
            err.to_string(),
            "Failed to load resource: slide 'a': unsupported format"
        );
    }
}
