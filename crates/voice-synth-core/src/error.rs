//! Error types for voice synthesis.

use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Voice synthesis error types.
#[derive(Error, Debug)]
pub enum Error {
    /// ONNX Runtime could not be loaded or initialised
    #[error("Inference runtime unavailable: {0}")]
    Runtime(String),

    /// Model file not found, failed to download, or unsupported on this device
    #[error("Model error: {0}")]
    Model(String),

    /// Audio file error (read/write/format)
    #[error("Audio error: {0}")]
    Audio(String),

    /// Voice not found in cache
    #[error("Voice '{0}' not found. Add it first with add_voice()")]
    VoiceNotFound(String),

    /// Voice audio too short (needs 5+ seconds)
    #[error("Voice audio must be at least 5 seconds, got {0:.1}s")]
    VoiceAudioTooShort(f32),

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// ONNX Runtime error
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    /// Tokenizer error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Shape/dimension mismatch
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Generic error for other cases
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
