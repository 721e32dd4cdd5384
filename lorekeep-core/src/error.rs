//! Error types for the lorekeep core library.

use thiserror::Error;

/// Top-level error type for all lorekeep operations.
///
/// Pure scoring functions never return this — decay math and relevance
/// scoring are total. Write paths (acquisition, claims, review updates)
/// surface these loudly and roll back; read paths catch them, log, and
/// degrade to neutral defaults.
#[derive(Error, Debug)]
pub enum LoreError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure (fingerprints, tag lists).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A knowledge item referenced on a write path does not exist.
    #[error("Knowledge item not found: {0}")]
    ItemNotFound(crate::KnowledgeId),

    /// A knowledge domain referenced on a write path does not exist.
    #[error("Knowledge domain not found: {0}")]
    DomainNotFound(crate::DomainId),

    /// Acquisition cannot classify because the domain registry is empty.
    #[error("No active knowledge domains registered")]
    NoActiveDomains,

    /// Invalid weighting constants — raised by `LoreConfig::validate` at
    /// startup, never per request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error (config file loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LoreError>;
