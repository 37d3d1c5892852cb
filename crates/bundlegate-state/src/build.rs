//! Build lifecycle record and its state machine.
//!
//! A [`BuildRecord`] is rewritten whole on every change. The `timeline`
//! only grows, and only when the state actually changes; diagnostic fields
//! can be updated on their own without touching it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

// ---------------------------------------------------------------------------
// BuildState
// ---------------------------------------------------------------------------

/// Lifecycle states of a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Queued,
    Init,
    Analyze,
    Build,
    Bundle,
    Verify,
    AiScan,
    LlmWaiting,
    LlmGenerating,
    PendingReview,
    PendingReviewLlm,
    Approved,
    Publishing,
    Published,
    PublishFailed,
    Rejected,
    Failed,
    Deleted,
}

/// Rank shared by the three review outcomes.
const REVIEW_RANK: u8 = 9;

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Queued => "queued",
            BuildState::Init => "init",
            BuildState::Analyze => "analyze",
            BuildState::Build => "build",
            BuildState::Bundle => "bundle",
            BuildState::Verify => "verify",
            BuildState::AiScan => "ai_scan",
            BuildState::LlmWaiting => "llm_waiting",
            BuildState::LlmGenerating => "llm_generating",
            BuildState::PendingReview => "pending_review",
            BuildState::PendingReviewLlm => "pending_review_llm",
            BuildState::Approved => "approved",
            BuildState::Publishing => "publishing",
            BuildState::Published => "published",
            BuildState::PublishFailed => "publish_failed",
            BuildState::Rejected => "rejected",
            BuildState::Failed => "failed",
            BuildState::Deleted => "deleted",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Published | BuildState::Rejected | BuildState::Failed
        )
    }

    /// Whether the build is waiting on (or has passed) review.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            BuildState::PendingReview | BuildState::PendingReviewLlm | BuildState::Approved
        )
    }

    /// Position along the forward pipeline, `None` outside of it.
    fn pipeline_rank(&self) -> Option<u8> {
        let rank = match self {
            BuildState::Queued => 0,
            BuildState::Init => 1,
            BuildState::Analyze => 2,
            BuildState::Build => 3,
            BuildState::Bundle => 4,
            BuildState::Verify => 5,
            BuildState::AiScan => 6,
            BuildState::LlmWaiting => 7,
            BuildState::LlmGenerating => 8,
            BuildState::PendingReview | BuildState::PendingReviewLlm | BuildState::Approved => {
                REVIEW_RANK
            }
            _ => return None,
        };
        Some(rank)
    }

    /// Progress percentage a build reports when it enters this state.
    pub fn default_progress(&self) -> u8 {
        match self {
            BuildState::Queued => 0,
            BuildState::Init => 5,
            BuildState::Analyze => 15,
            BuildState::Build => 35,
            BuildState::Bundle => 55,
            BuildState::Verify => 65,
            BuildState::AiScan => 75,
            BuildState::LlmWaiting => 80,
            BuildState::LlmGenerating => 85,
            BuildState::PendingReview | BuildState::PendingReviewLlm => 90,
            BuildState::Approved => 95,
            BuildState::Publishing => 97,
            BuildState::Published
            | BuildState::PublishFailed
            | BuildState::Rejected
            | BuildState::Failed
            | BuildState::Deleted => 100,
        }
    }

    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// Re-applying the current state is always allowed (diagnostic update).
    /// `deleted` is an overlay and is only entered or left through
    /// [`BuildRecord::mark_deleted`] and [`BuildRecord::restore`].
    pub fn can_transition_to(&self, next: BuildState) -> bool {
        use BuildState::*;

        if *self == next {
            return true;
        }
        if *self == Deleted || next == Deleted || self.is_terminal() {
            return false;
        }
        if matches!(next, Rejected | Failed) {
            return true;
        }
        match (*self, next) {
            (Approved | PublishFailed, Publishing) => true,
            (Publishing, Published | PublishFailed) => true,
            (PendingReview | PendingReviewLlm, Approved) => true,
            (PendingReview, PendingReviewLlm) | (PendingReviewLlm, PendingReview) => true,
            _ => match (self.pipeline_rank(), next.pipeline_rank()) {
                (Some(from), Some(to)) => from < REVIEW_RANK && from < to,
                _ => false,
            },
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NetworkPolicy / ErrorCategory
// ---------------------------------------------------------------------------

/// Outbound network allowance granted to a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkPolicy {
    #[default]
    NoNet,
    MediaOnly,
    OpenNet,
}

impl NetworkPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkPolicy::NoNet => "NO_NET",
            NetworkPolicy::MediaOnly => "MEDIA_ONLY",
            NetworkPolicy::OpenNet => "OPEN_NET",
        }
    }

    /// Images and media may load from anywhere.
    pub fn allows_media(&self) -> bool {
        matches!(self, NetworkPolicy::MediaOnly | NetworkPolicy::OpenNet)
    }
}

impl fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure class shown next to `error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Syntax,
    Dependency,
    BuildConfig,
    Runtime,
    Unknown,
}

impl ErrorCategory {
    /// Best-effort classification of a failure message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("syntaxerror") || lower.contains("unexpected token") {
            ErrorCategory::Syntax
        } else if lower.contains("cannot find module")
            || lower.contains("could not resolve")
            || lower.contains("eresolve")
            || lower.contains("npm err")
        {
            ErrorCategory::Dependency
        } else if lower.contains("index.html")
            || lower.contains("build output")
            || lower.contains("package.json")
            || lower.contains("required file")
        {
            ErrorCategory::BuildConfig
        } else if lower.contains("timed out") || lower.contains("exit code") {
            ErrorCategory::Runtime
        } else {
            ErrorCategory::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// BuildRecord
// ---------------------------------------------------------------------------

/// Build ids name directories, so they are restricted to `[A-Za-z0-9_-]`.
pub fn is_valid_build_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub(crate) fn validate_build_id(id: &str) -> Result<(), StateError> {
    if is_valid_build_id(id) {
        Ok(())
    } else {
        Err(StateError::InvalidId(id.to_string()))
    }
}

/// One entry of the append-only state history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub state: BuildState,
    pub timestamp: DateTime<Utc>,
}

/// Persisted lifecycle record of one submission (`build.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub id: String,
    pub state: BuildState,
    pub progress: u8,
    pub timeline: Vec<TimelineEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<NetworkPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<BuildState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    /// Fresh record in `queued` with a single timeline entry.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state: BuildState::Queued,
            progress: 0,
            timeline: vec![TimelineEntry {
                state: BuildState::Queued,
                timestamp: now,
            }],
            created_at: now,
            updated_at: now,
            error: None,
            public_message: None,
            error_category: None,
            reasons: Vec::new(),
            attempts: 0,
            retry_count: 0,
            network_policy: None,
            network_policy_reason: None,
            listing_id: None,
            archive_sha256: None,
            bundle_sha256: None,
            previous_state: None,
            deleted_at: None,
        }
    }

    /// Apply a patch. Returns `true` when a timeline entry was appended.
    pub fn apply(&mut self, patch: BuildPatch, now: DateTime<Utc>) -> Result<bool, StateError> {
        let mut appended = false;
        if let Some(next) = patch.state {
            if !self.state.can_transition_to(next) {
                return Err(StateError::InvalidTransition {
                    build_id: self.id.clone(),
                    from: self.state,
                    to: next,
                });
            }
            if next != self.state {
                self.state = next;
                self.timeline.push(TimelineEntry {
                    state: next,
                    timestamp: now,
                });
                if patch.progress.is_none() {
                    self.progress = next.default_progress();
                }
                appended = true;
            }
        }

        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(message) = patch.public_message {
            self.public_message = Some(message);
        }
        if let Some(category) = patch.error_category {
            self.error_category = Some(category);
        }
        if let Some(reasons) = patch.reasons {
            self.reasons = reasons;
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(retry_count) = patch.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(policy) = patch.network_policy {
            self.network_policy = Some(policy);
        }
        if let Some(reason) = patch.network_policy_reason {
            self.network_policy_reason = Some(reason);
        }
        if let Some(listing_id) = patch.listing_id {
            self.listing_id = Some(listing_id);
        }
        if let Some(digest) = patch.archive_sha256 {
            self.archive_sha256 = Some(digest);
        }
        if let Some(digest) = patch.bundle_sha256 {
            self.bundle_sha256 = Some(digest);
        }

        self.updated_at = now;
        Ok(appended)
    }

    /// Overlay `deleted`, remembering where the build was.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        if self.state == BuildState::Deleted {
            return;
        }
        self.previous_state = Some(self.state);
        self.deleted_at = Some(now);
        self.state = BuildState::Deleted;
        self.timeline.push(TimelineEntry {
            state: BuildState::Deleted,
            timestamp: now,
        });
        self.updated_at = now;
    }

    /// Undo [`mark_deleted`](Self::mark_deleted).
    pub fn restore(&mut self, now: DateTime<Utc>) -> Result<BuildState, StateError> {
        if self.state != BuildState::Deleted {
            return Err(StateError::NotDeleted(self.id.clone()));
        }
        let previous = self.previous_state.take().unwrap_or(BuildState::Queued);
        self.state = previous;
        self.deleted_at = None;
        self.timeline.push(TimelineEntry {
            state: previous,
            timestamp: now,
        });
        self.updated_at = now;
        Ok(previous)
    }

    /// Effective network policy (unset means `NO_NET`).
    pub fn effective_network_policy(&self) -> NetworkPolicy {
        self.network_policy.unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// BuildPatch
// ---------------------------------------------------------------------------

/// Partial update applied by the stage that currently owns a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildPatch {
    pub state: Option<BuildState>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub public_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub reasons: Option<Vec<String>>,
    pub attempts: Option<u32>,
    pub retry_count: Option<u32>,
    pub network_policy: Option<NetworkPolicy>,
    pub network_policy_reason: Option<String>,
    pub listing_id: Option<String>,
    pub archive_sha256: Option<String>,
    pub bundle_sha256: Option<String>,
}

impl BuildPatch {
    /// Patch that only moves the state.
    pub fn state(state: BuildState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Patch that moves to `failed` with a classified error.
    pub fn failed(error: impl Into<String>, public_message: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            state: Some(BuildState::Failed),
            error_category: Some(ErrorCategory::classify(&error)),
            error: Some(error),
            public_message: Some(public_message.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = Some(reasons);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_network_policy(mut self, policy: NetworkPolicy, reason: impl Into<String>) -> Self {
        self.network_policy = Some(policy);
        self.network_policy_reason = Some(reason.into());
        self
    }

    pub fn with_listing(mut self, listing_id: impl Into<String>) -> Self {
        self.listing_id = Some(listing_id.into());
        self
    }

    pub fn with_digests(mut self, archive: Option<String>, bundle: Option<String>) -> Self {
        self.archive_sha256 = archive;
        self.bundle_sha256 = bundle;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    #[test]
    fn forward_pipeline_and_skips_allowed() {
        assert!(BuildState::Queued.can_transition_to(BuildState::Init));
        assert!(BuildState::Init.can_transition_to(BuildState::Build));
        assert!(BuildState::AiScan.can_transition_to(BuildState::PendingReview));
        assert!(BuildState::Queued.can_transition_to(BuildState::Approved));
        assert!(!BuildState::Build.can_transition_to(BuildState::Analyze));
    }

    #[test]
    fn publishing_only_after_approval() {
        assert!(!BuildState::PendingReview.can_transition_to(BuildState::Publishing));
        assert!(BuildState::Approved.can_transition_to(BuildState::Publishing));
        assert!(BuildState::PublishFailed.can_transition_to(BuildState::Publishing));
        assert!(BuildState::Publishing.can_transition_to(BuildState::Published));
        assert!(!BuildState::Verify.can_transition_to(BuildState::Published));
    }

    #[test]
    fn terminal_states_are_closed() {
        for terminal in [BuildState::Published, BuildState::Rejected, BuildState::Failed] {
            assert!(!terminal.can_transition_to(BuildState::Queued));
            assert!(!terminal.can_transition_to(BuildState::Publishing));
        }
        assert!(BuildState::PendingReview.can_transition_to(BuildState::Rejected));
        assert!(BuildState::Publishing.can_transition_to(BuildState::Failed));
    }

    #[test]
    fn same_state_updates_diagnostics_without_timeline_entry() {
        let mut record = BuildRecord::new("b1", ts(0));
        record
            .apply(BuildPatch::state(BuildState::Build), ts(1))
            .expect("queued -> build");
        assert_eq!(record.timeline.len(), 2);

        let appended = record
            .apply(
                BuildPatch::state(BuildState::Build).with_error("still compiling"),
                ts(2),
            )
            .expect("same state");
        assert!(!appended);
        assert_eq!(record.timeline.len(), 2);
        assert_eq!(record.error.as_deref(), Some("still compiling"));
        assert_eq!(record.updated_at, ts(2));
    }

    #[test]
    fn invalid_transition_leaves_record_untouched() {
        let mut record = BuildRecord::new("b2", ts(0));
        let before = record.clone();
        match record.apply(BuildPatch::state(BuildState::Published), ts(1)) {
            Err(StateError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, BuildState::Queued);
                assert_eq!(to, BuildState::Published);
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(record, before);
    }

    #[test]
    fn delete_and_restore_round_trip() {
        let mut record = BuildRecord::new("b3", ts(0));
        record
            .apply(BuildPatch::state(BuildState::PendingReview), ts(1))
            .expect("advance");
        record.mark_deleted(ts(2));
        assert_eq!(record.state, BuildState::Deleted);
        assert_eq!(record.previous_state, Some(BuildState::PendingReview));
        assert!(record.deleted_at.is_some());
        assert!(record
            .apply(BuildPatch::state(BuildState::Approved), ts(3))
            .is_err());

        let restored = record.restore(ts(4)).expect("restore");
        assert_eq!(restored, BuildState::PendingReview);
        assert_eq!(record.state, BuildState::PendingReview);
        assert!(record.deleted_at.is_none());
    }

    #[test]
    fn build_ids_cannot_escape_directories() {
        assert!(is_valid_build_id("3f2a-build_01"));
        assert!(!is_valid_build_id("../etc"));
        assert!(!is_valid_build_id("a/b"));
        assert!(!is_valid_build_id(""));
    }

    #[test]
    fn failed_patch_classifies_error() {
        let patch = BuildPatch::failed("Cannot find module 'react'", "Build failed");
        assert_eq!(patch.error_category, Some(ErrorCategory::Dependency));
        assert_eq!(patch.state, Some(BuildState::Failed));
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let mut record = BuildRecord::new("b4", ts(0));
        record
            .apply(
                BuildPatch::state(BuildState::PendingReview)
                    .with_network_policy(NetworkPolicy::OpenNet, "domains detected"),
                ts(1),
            )
            .expect("advance");
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["state"], "pending_review");
        assert_eq!(json["networkPolicy"], "OPEN_NET");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("deletedAt").is_none());
    }
}
