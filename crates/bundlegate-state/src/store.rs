//! Async storage contract for build records.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::{BuildPatch, BuildRecord, BuildState};
use crate::lease::Lease;
use crate::{StateError, StateResult};

/// Default lease lifetime for pipeline stages.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

/// One page of builds, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildPage {
    pub items: Vec<BuildRecord>,
    pub next_cursor: Option<String>,
}

/// Persistence for [`BuildRecord`]s.
///
/// Mutations require a [`Lease`] obtained from [`acquire_lease`](Self::acquire_lease).
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Store a new record. Fails if the id is taken.
    async fn create(&self, record: BuildRecord) -> StateResult<()>;

    async fn get(&self, build_id: &str) -> StateResult<BuildRecord>;

    /// Page through builds ordered by creation time, newest first.
    /// `cursor` is the id of the last item of the previous page.
    async fn list(&self, cursor: Option<&str>, limit: usize) -> StateResult<BuildPage>;

    async fn acquire_lease(&self, build_id: &str, owner: &str, ttl: Duration)
        -> StateResult<Lease>;

    async fn release_lease(&self, lease: &Lease) -> StateResult<()>;

    /// Apply a patch under a lease and persist the whole record.
    async fn update(&self, lease: &Lease, patch: BuildPatch) -> StateResult<BuildRecord>;

    /// Overlay `deleted` on the record.
    async fn delete(&self, lease: &Lease) -> StateResult<BuildRecord>;

    /// Return a deleted record to its previous state.
    async fn restore(&self, lease: &Lease) -> StateResult<BuildRecord>;
}

/// Take a lease, apply one patch and release.
pub async fn advance(
    store: &dyn BuildStore,
    build_id: &str,
    owner: &str,
    patch: BuildPatch,
) -> StateResult<BuildRecord> {
    let lease = store.acquire_lease(build_id, owner, DEFAULT_LEASE_TTL).await?;
    let result = store.update(&lease, patch).await;
    release_logged(store, &lease).await;
    result
}

/// Release a lease after the leased work finished.
///
/// A failed release is logged and the lease left to expire.
pub async fn release_logged(store: &dyn BuildStore, lease: &Lease) {
    if let Err(e) = store.release_lease(lease).await {
        tracing::warn!(
            event = "lease.release_failed",
            build_id = %lease.build_id,
            owner = %lease.owner,
            error = %e,
        );
    }
}

/// Outcome of a human review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

/// Record a review decision on a build waiting in `pending_review*`.
pub async fn review(
    store: &dyn BuildStore,
    build_id: &str,
    reviewer: &str,
    decision: ReviewDecision,
) -> StateResult<BuildRecord> {
    let record = store.get(build_id).await?;
    let next = match &decision {
        ReviewDecision::Approve => BuildState::Approved,
        ReviewDecision::Reject { .. } => BuildState::Rejected,
    };
    if !matches!(
        record.state,
        BuildState::PendingReview | BuildState::PendingReviewLlm
    ) {
        return Err(StateError::InvalidTransition {
            build_id: build_id.to_string(),
            from: record.state,
            to: next,
        });
    }
    let patch = match decision {
        ReviewDecision::Approve => BuildPatch::state(next),
        ReviewDecision::Reject { reason } => {
            let mut patch = BuildPatch::state(next).with_reasons(vec![reason.clone()]);
            patch.public_message = Some(reason);
            patch
        }
    };
    advance(store, build_id, reviewer, patch).await
}

/// Slice `ids` (newest first) into a page after `cursor`.
pub(crate) fn page_ids(ids: &[String], cursor: Option<&str>, limit: usize) -> (Vec<String>, Option<String>) {
    let start = match cursor {
        Some(c) => ids.iter().position(|id| id == c).map(|i| i + 1).unwrap_or(ids.len()),
        None => 0,
    };
    let limit = limit.max(1);
    let page: Vec<String> = ids.iter().skip(start).take(limit).cloned().collect();
    let next = if start + page.len() < ids.len() {
        page.last().cloned()
    } else {
        None
    };
    (page, next)
}
