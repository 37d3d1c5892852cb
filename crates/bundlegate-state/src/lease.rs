//! Explicit per-build ownership.
//!
//! Only the stage holding an unexpired lease may rewrite a build record.
//! A lease is identified by an opaque token; presenting a token that does
//! not match the stored lease, or one that has expired, is rejected.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub build_id: String,
    pub owner: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        build_id: impl Into<String>,
        owner: impl Into<String>,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            owner: owner.into(),
            token: Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now + Duration::milliseconds(ttl.as_millis() as i64),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Validate `presented` against this (stored) lease.
    pub fn verify(&self, presented: &Lease, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.token != presented.token {
            return Err(StateError::LeaseRejected {
                build_id: presented.build_id.clone(),
                reason: format!("token does not match lease held by {}", self.owner),
            });
        }
        if self.is_expired(now) {
            return Err(StateError::LeaseRejected {
                build_id: presented.build_id.clone(),
                reason: "lease expired".to_string(),
            });
        }
        Ok(())
    }
}

/// Whether a new lease may be taken given what is currently stored.
///
/// A live lease is never handed out twice, not even to the owner that holds
/// it; anyone may take over an expired lease.
pub fn check_acquire(
    current: Option<&Lease>,
    build_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StateError> {
    match current {
        Some(lease) if !lease.is_expired(now) => {
            Err(StateError::LeaseHeld {
                build_id: build_id.to_string(),
                owner: lease.owner.clone(),
            })
        }
        _ => Ok(()),
    }
}

/// Validate a presented lease against the stored one (if any).
pub fn check_presented(
    current: Option<&Lease>,
    presented: &Lease,
    now: DateTime<Utc>,
) -> Result<(), StateError> {
    match current {
        Some(stored) => stored.verify(presented, now),
        None => Err(StateError::LeaseRejected {
            build_id: presented.build_id.clone(),
            reason: "no lease held".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn foreign_owner_cannot_take_live_lease() {
        let lease = Lease::new("b1", "worker-a", std::time::Duration::from_secs(60), now());
        match check_acquire(Some(&lease), "b1", now()) {
            Err(StateError::LeaseHeld { owner, .. }) => assert_eq!(owner, "worker-a"),
            other => panic!("expected LeaseHeld, got {:?}", other),
        }
    }

    #[test]
    fn same_owner_cannot_take_live_lease_twice() {
        let lease = Lease::new("b1", "bundlegated", std::time::Duration::from_secs(60), now());
        match check_acquire(Some(&lease), "b1", now()) {
            Err(StateError::LeaseHeld { owner, .. }) => assert_eq!(owner, "bundlegated"),
            other => panic!("expected LeaseHeld, got {:?}", other),
        }
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let lease = Lease::new("b1", "worker-a", std::time::Duration::from_secs(1), now());
        let later = now() + Duration::seconds(5);
        assert!(check_acquire(Some(&lease), "b1", later).is_ok());
        assert!(lease.verify(&lease, later).is_err());
    }

    #[test]
    fn stale_token_rejected() {
        let old = Lease::new("b1", "worker-a", std::time::Duration::from_secs(60), now());
        let replacement = Lease::new("b1", "worker-a", std::time::Duration::from_secs(60), now());
        assert!(check_presented(Some(&replacement), &old, now()).is_err());
        assert!(check_presented(Some(&replacement), &replacement, now()).is_ok());
        assert!(check_presented(None, &replacement, now()).is_err());
    }
}
