//! Error types for convcost-core

use thiserror::Error;

/// Main error type for the convcost-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error for an export file
    #[error("parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Tokenizer could not be loaded or failed while encoding
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Malformed filter or query input (dates, model names)
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Conversation not found
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
}

/// Result type alias for convcost-core
pub type Result<T> = std::result::Result<T, Error>;
