//! Error Handling Module
//!
//! Defines the error taxonomy shared by chipping, training and inference.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Main error type for Planet Sentinel operations
#[derive(Error, Debug)]
pub enum SentinelError {
    /// Channel or shape mismatch between model and input, or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing paired file, before/after dimension mismatch, unreadable tile
    #[error("Data error: {0}")]
    Data(String),

    /// Checkpoint incompatible with the requested architecture
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Unexpected tensor shape or content at the serving boundary
    #[error("Inference error: {0}")]
    Inference(String),

    /// A batch produced a non-finite loss; the run must stop
    #[error("Training fatal error at epoch {epoch}, batch {batch}: loss = {loss}")]
    TrainingFatal {
        epoch: usize,
        batch: usize,
        loss: f64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SentinelError {
    /// Whether this error should only skip the current source pair or sample
    /// rather than abort the surrounding run.
    pub fn is_skippable(&self) -> bool {
        matches!(self, SentinelError::Data(_) | SentinelError::Image(_))
    }
}

impl From<image::ImageError> for SentinelError {
    fn from(err: image::ImageError) -> Self {
        SentinelError::Image(err.to_string())
    }
}

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        SentinelError::Serialization(err.to_string())
    }
}

/// Convenience Result type for Planet Sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
