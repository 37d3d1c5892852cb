//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryBuildStore` and `MemoryListingService` honour the same lease and
//! transition rules as the file-backed stores without touching disk.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::build::{validate_build_id, BuildPatch, BuildRecord};
use crate::error::StateError;
use crate::lease::{check_acquire, check_presented, Lease};
use crate::listing::{
    apply_upsert, ListingRecord, ListingRef, ListingService, ListingUpsert, MonotonicVersioning,
};
use crate::store::{page_ids, BuildPage, BuildStore};
use crate::StateResult;

// ---------------------------------------------------------------------------
// MemoryBuildStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, BuildRecord>,
    leases: HashMap<String, Lease>,
}

#[derive(Debug, Default)]
pub struct MemoryBuildStore {
    inner: Mutex<Inner>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_leased<F>(&self, lease: &Lease, f: F) -> StateResult<BuildRecord>
    where
        F: FnOnce(&mut BuildRecord) -> StateResult<()>,
    {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        check_presented(inner.leases.get(&lease.build_id), lease, now)?;
        let record = inner
            .records
            .get_mut(&lease.build_id)
            .ok_or_else(|| StateError::BuildNotFound(lease.build_id.clone()))?;
        let mut updated = record.clone();
        f(&mut updated)?;
        *record = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create(&self, record: BuildRecord) -> StateResult<()> {
        validate_build_id(&record.id)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.id) {
            return Err(StateError::BuildExists(record.id));
        }
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, build_id: &str) -> StateResult<BuildRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .get(build_id)
            .cloned()
            .ok_or_else(|| StateError::BuildNotFound(build_id.to_string()))
    }

    async fn list(&self, cursor: Option<&str>, limit: usize) -> StateResult<BuildPage> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<&BuildRecord> = inner.records.values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let (page, next_cursor) = page_ids(&ids, cursor, limit);
        let items = page
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect();
        Ok(BuildPage { items, next_cursor })
    }

    async fn acquire_lease(
        &self,
        build_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> StateResult<Lease> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.records.contains_key(build_id) {
            return Err(StateError::BuildNotFound(build_id.to_string()));
        }
        let now = Utc::now();
        check_acquire(inner.leases.get(build_id), build_id, now)?;
        let lease = Lease::new(build_id, owner, ttl, now);
        inner.leases.insert(build_id.to_string(), lease.clone());
        Ok(lease)
    }

    async fn release_lease(&self, lease: &Lease) -> StateResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .leases
            .get(&lease.build_id)
            .is_some_and(|stored| stored.token == lease.token)
        {
            inner.leases.remove(&lease.build_id);
        }
        Ok(())
    }

    async fn update(&self, lease: &Lease, patch: BuildPatch) -> StateResult<BuildRecord> {
        self.with_leased(lease, |record| record.apply(patch, Utc::now()).map(|_| ()))
    }

    async fn delete(&self, lease: &Lease) -> StateResult<BuildRecord> {
        self.with_leased(lease, |record| {
            record.mark_deleted(Utc::now());
            Ok(())
        })
    }

    async fn restore(&self, lease: &Lease) -> StateResult<BuildRecord> {
        self.with_leased(lease, |record| record.restore(Utc::now()).map(|_| ()))
    }
}

// ---------------------------------------------------------------------------
// MemoryListingService
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryListingService {
    listings: Mutex<Vec<ListingRecord>>,
}

impl MemoryListingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ListingRecord> {
        self.listings.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListingService for MemoryListingService {
    async fn upsert(&self, request: ListingUpsert) -> StateResult<ListingRef> {
        let mut listings = self.listings.lock().unwrap();
        Ok(apply_upsert(
            &mut listings,
            request,
            &MonotonicVersioning,
            Utc::now(),
        ))
    }

    async fn get(&self, listing_id: &str) -> StateResult<ListingRecord> {
        self.listings
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.id == listing_id)
            .cloned()
            .ok_or_else(|| StateError::ListingNotFound(listing_id.to_string()))
    }
}
