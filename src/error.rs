//! Error types shared across the crate.
//!
//! Three failure kinds cover everything the library can reject:
//!
//! - [`Error::Configuration`]: invalid construction or call arguments
//!   (empty corpus, zero-width hidden layers, non-positive step size or
//!   temperature)
//! - [`Error::Codec`]: a character outside the trained charset
//! - [`Error::Serialization`]: a malformed or inconsistent persisted
//!   record (missing matrices, shape mismatches, bad JSON)
//!
//! All validation happens before any state is mutated: a call that
//! returns an error leaves the network exactly as it was.

use thiserror::Error;

/// Errors produced by network construction, training, generation,
/// and persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or call arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A character that is not part of the trained charset.
    #[error("character {0:?} is not in the trained charset")]
    Codec(char),

    /// A persisted record that cannot be reconstructed into a network.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checkpoint file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
