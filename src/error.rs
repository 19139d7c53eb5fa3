//! Error types for Voicery

use thiserror::Error;

/// Result type alias for Voicery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Voicery
///
/// Transport and decode failures on the recognition/synthesis paths are
/// represented as marked result values rather than raised; these variants
/// cover the places where an operation genuinely cannot proceed (bad
/// configuration, unreadable role files, chat completion failures).
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Role configuration not found or invalid
    #[error("role error: {0}")]
    Role(String),

    /// Audio preprocessing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Recognition protocol error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Chat completion error
    #[error("completion error: {0}")]
    Completion(String),

    /// Intent classification error
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Result cache error
    #[error("cache error: {0}")]
    Cache(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
