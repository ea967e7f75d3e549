//! Error types for the OCR pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Failure while turning an encoded byte buffer into a pixel matrix
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Missing buffer or zero declared length
    #[error("input image data is invalid or its length is zero")]
    InvalidInput,
    /// The bytes are not a decodable image
    #[error("failed to decode image data: {0}")]
    Decode(String),
}

/// Failure inside a detection or recognition stage
#[derive(Debug, Error)]
pub enum OcrError {
    /// Model artifact missing, unreadable, or rejected by the runtime
    #[error("failed to load model {path:?}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    /// Character dictionary could not be read
    #[error("failed to read character dictionary {path:?}: {source}")]
    Dictionary {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input image is unusable (zero area, degenerate resize)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The runtime rejected the input or produced malformed output
    #[error("inference failed: {0}")]
    Inference(String),
}

impl From<ort::Error> for OcrError {
    fn from(err: ort::Error) -> Self {
        OcrError::Inference(err.to_string())
    }
}

/// Result alias for stage operations
pub type StageResult<T> = std::result::Result<T, OcrError>;
