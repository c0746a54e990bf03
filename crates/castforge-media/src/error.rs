//! Error types for castforge-media.

use thiserror::Error;

/// Result type for castforge-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for playlist parsing.
#[derive(Debug, Error)]
pub enum Error {
    /// The text does not start with `#EXTM3U`.
    #[error("Missing #EXTM3U header")]
    MissingHeader,

    /// A tag carried a value that could not be parsed.
    #[error("Invalid value for {tag} on line {line}: {value}")]
    InvalidTag {
        tag: &'static str,
        line: usize,
        value: String,
    },

    /// An `#EXTINF` tag was not followed by a segment URI.
    #[error("Dangling #EXTINF on line {0}")]
    DanglingSegment(usize),
}

impl Error {
    /// Create an invalid-tag error.
    pub fn invalid_tag(tag: &'static str, line: usize, value: impl Into<String>) -> Self {
        Self::InvalidTag {
            tag,
            line,
            value: value.into(),
        }
    }
}
