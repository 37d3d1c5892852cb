//! Error types for bundlegate-state

use thiserror::Error;

use crate::build::BuildState;

/// Errors raised by build and listing persistence.
#[derive(Error, Debug)]
pub enum StateError {
    /// No record exists for the id
    #[error("build not found: {0}")]
    BuildNotFound(String),

    /// A record with the id already exists
    #[error("build already exists: {0}")]
    BuildExists(String),

    /// Requested state change is not part of the lifecycle
    #[error("invalid transition for build {build_id}: {from} -> {to}")]
    InvalidTransition {
        build_id: String,
        from: BuildState,
        to: BuildState,
    },

    /// Another owner holds an unexpired lease
    #[error("build {build_id} is leased by {owner}")]
    LeaseHeld { build_id: String, owner: String },

    /// The presented lease token is stale, expired or foreign
    #[error("lease rejected for build {build_id}: {reason}")]
    LeaseRejected { build_id: String, reason: String },

    /// Id contains characters that cannot name a directory
    #[error("invalid build id: {0:?}")]
    InvalidId(String),

    /// Restore requested on a record that is not deleted
    #[error("build {0} is not deleted")]
    NotDeleted(String),

    /// Listing lookup failed
    #[error("listing not found: {0}")]
    ListingNotFound(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    /// Whether the error means "nothing stored under that id".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StateError::BuildNotFound(_) | StateError::ListingNotFound(_)
        )
    }
}
