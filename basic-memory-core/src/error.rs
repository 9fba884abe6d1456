//! Error types for basic-memory-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the basic-memory-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file could not be scanned (read or stat failure). Fatal for the
    /// whole sync cycle: nothing is committed.
    #[error("could not scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file's contents did not parse into an entity. Isolated to that
    /// file; the rest of the sync cycle proceeds.
    #[error("could not parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A stored invariant was violated (dangling relation target, etc).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A permalink collision could not be resolved within the retry budget.
    #[error("could not allocate a unique permalink for {permalink} after {attempts} attempts")]
    Conflict { permalink: String, attempts: u32 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Entity not found
    #[error("entity not found: {0}")]
    EntityNotFound(String),
}

/// Result type alias for basic-memory-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_displays_a_non_empty_message() {
        let variants = vec![
            Error::Database(rusqlite::Error::QueryReturnedNoRows),
            Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing")),
            Error::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err()),
            Error::Scan {
                path: PathBuf::from("notes/a.md"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            },
            Error::Parse {
                path: PathBuf::from("notes/a.md"),
                message: "bad frontmatter".to_string(),
            },
            Error::Integrity("dangling relation".to_string()),
            Error::Conflict {
                permalink: "note".to_string(),
                attempts: 10,
            },
            Error::Config("missing field".to_string()),
            Error::EntityNotFound("note".to_string()),
        ];

        for variant in variants {
            let message = variant.to_string();
            assert!(!message.is_empty());
        }
    }
}
