//! Error handling for catalogo-sync

use std::fmt;
use thiserror::Error;

use catalogo_sync_realtime::RealtimeError;

/// Unified error type
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Local filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Change-feed errors
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// Remote store rejected or failed a request
    #[error("Remote store error: {0}")]
    Remote(String),

    /// A backing store cannot be used at all
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Local fallback store is full
    #[error("Quota exceeded writing '{key}': {needed} bytes needed, {capacity} bytes capacity")]
    QuotaExceeded {
        key: String,
        needed: usize,
        capacity: usize,
    },

    /// Submitted data was rejected; the collection is unchanged
    #[error("Validation error: {0}")]
    Validation(String),

    /// No record with the given identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// A state change the record does not allow
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Create a new remote store error
    pub fn remote<T: fmt::Display>(msg: T) -> Self {
        Error::Remote(msg.to_string())
    }

    /// Create a new store-unavailable error
    pub fn unavailable<T: fmt::Display>(msg: T) -> Self {
        Error::StoreUnavailable(msg.to_string())
    }

    /// Create a new validation error
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Error::Validation(msg.to_string())
    }

    /// Create a new not-found error
    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Create a new invalid-transition error
    pub fn invalid_transition<T: fmt::Display>(msg: T) -> Self {
        Error::InvalidTransition(msg.to_string())
    }

    /// Create a new general error
    pub fn general<T: fmt::Display>(msg: T) -> Self {
        Error::General(msg.to_string())
    }

    /// Whether this error was caused by user input rather than the stores.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
