//! Error types for Strata.

use thiserror::Error;

use crate::coords::Location;

/// World and chunk errors.
///
/// Errors are `Clone` because a single outcome is shared by every holder of a
/// chunk handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// Chunk is not resident
    #[error("Chunk ({x}, {y}) does not exist")]
    ChunkNotFound {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
    },

    /// Generator failed to produce a chunk
    #[error("Failed to generate chunk ({x}, {y}): {reason}")]
    GenerationFailed {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
        /// Generator message
        reason: String,
    },

    /// Persistor failed to save a chunk
    #[error("Failed to save chunk ({x}, {y}): {reason}")]
    PersistFailed {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
        /// Persistor message
        reason: String,
    },

    /// A bulk save finished with some chunks unsaved
    #[error("Saved {saved} chunks, {} failed", .failed.len())]
    SaveSweepFailed {
        /// Number of chunks saved successfully
        saved: usize,
        /// Locations whose save failed
        failed: Vec<Location>,
    },

    /// Area iterator advanced past its last location
    #[error("Area iterator is exhausted")]
    AreaExhausted,

    /// No async runtime available to run chunk work
    #[error("No tokio runtime available")]
    NoRuntime,
}

impl WorldError {
    /// Chunk-not-found error for a location.
    #[must_use]
    pub const fn not_found(location: Location) -> Self {
        Self::ChunkNotFound {
            x: location.x,
            y: location.y,
        }
    }

    /// Generation error for a location.
    #[must_use]
    pub fn generation(location: Location, reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            x: location.x,
            y: location.y,
            reason: reason.into(),
        }
    }

    /// Persist error for a location.
    #[must_use]
    pub fn persist(location: Location, reason: impl Into<String>) -> Self {
        Self::PersistFailed {
            x: location.x,
            y: location.y,
            reason: reason.into(),
        }
    }
}

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
