//! bundlegate-state: build lifecycle persistence
//!
//! Owns the persisted side of a submission: the [`BuildRecord`] and its state
//! machine, the explicit per-build [`Lease`] that makes single-writer
//! ownership enforceable, and the listing/versioning collaborator the
//! ingestion pipeline reports into.
//!
//! ## Key Components
//!
//! - `BuildState` / `BuildRecord`: lifecycle, timeline, diagnostics
//! - `BuildStore`: async storage contract, `FsBuildStore` on disk
//! - `Lease`: owner token required for every mutation
//! - `ListingService` / `Versioning`: slug and version bookkeeping
//! - `fakes`: in-memory stores for tests

pub mod build;
mod error;
pub mod fakes;
pub mod fs_store;
pub mod lease;
pub mod listing;
pub mod store;

pub use build::{
    is_valid_build_id, BuildPatch, BuildRecord, BuildState, ErrorCategory, NetworkPolicy,
    TimelineEntry,
};
pub use error::StateError;
pub use fs_store::{read_json, write_json_atomic, FsBuildStore, BUILD_RECORD_FILE};
pub use lease::Lease;
pub use listing::{
    slugify, FsListingStore, ListingRecord, ListingRef, ListingService, ListingTranslation,
    ListingUpsert, MonotonicVersioning, NextVersion, Versioning,
};
pub use store::{advance, release_logged, review, BuildPage, BuildStore, ReviewDecision, DEFAULT_LEASE_TTL};

/// Result type for bundlegate-state operations
pub type StateResult<T> = std::result::Result<T, StateError>;
