//! Error taxonomy shared by every castforge component.
//!
//! The broadcast core absorbs most failures into state transitions (a dead
//! transcoder falls back to the offline filler). What remains here are the
//! failures a caller can actually observe, plus enough context for the HTTP
//! surface to derive a status code via [`Error::http_status`].

use crate::types::StorageTier;
use crate::StreamIdentifier;

/// Unified error type for the broadcast core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A second broadcaster tried to connect while a session is active.
    #[error("A broadcast session is already active")]
    AlreadyBroadcasting,

    /// A disconnect was requested but nothing is connected.
    #[error("No inbound stream connected")]
    NoActiveSession,

    /// The supervised transcoder exited unexpectedly.
    #[error("Transcoder [{identifier}] failed: {reason}")]
    TranscodeFailed {
        /// Which job namespace failed.
        identifier: StreamIdentifier,
        /// Exit status or spawn failure description.
        reason: String,
    },

    /// Writing an artifact to a storage tier failed.
    #[error("Storage write to {tier} tier failed for {path}: {message}")]
    StorageWriteFailed {
        /// The tier that rejected the write.
        tier: StorageTier,
        /// Storage-relative path of the artifact.
        path: String,
        /// Underlying error description.
        message: String,
    },

    /// A playlist could not be parsed.
    #[error("Playlist error: {0}")]
    Playlist(String),

    /// Configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::AlreadyBroadcasting => 409,
            Error::NoActiveSession => 409,
            Error::TranscodeFailed { .. } => 502,
            Error::StorageWriteFailed { .. } => 507,
            Error::Playlist(_) => 422,
            Error::Config(_) => 400,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether the pipeline can keep going after this error.
    ///
    /// Only a failed local write has no fallback tier.
    pub fn is_fatal_to_pipeline(&self) -> bool {
        matches!(
            self,
            Error::StorageWriteFailed {
                tier: StorageTier::Local,
                ..
            }
        )
    }

    /// Convenience constructor for [`Error::TranscodeFailed`].
    pub fn transcode_failed(identifier: StreamIdentifier, reason: impl Into<String>) -> Self {
        Error::TranscodeFailed {
            identifier,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::StorageWriteFailed`].
    pub fn storage_write(
        tier: StorageTier,
        path: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::StorageWriteFailed {
            tier,
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Playlist`].
    pub fn playlist(msg: impl Into<String>) -> Self {
        Error::Playlist(msg.into())
    }

    /// Convenience constructor for [`Error::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
