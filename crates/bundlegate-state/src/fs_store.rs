//! File-backed [`BuildStore`].
//!
//! Layout under the data root:
//!
//! ```text
//! builds/index.json          [{id, createdAt}], newest first
//! builds/<id>/build.json     BuildRecord
//! builds/<id>/lease.json     current Lease (absent when free)
//! ```
//!
//! Every write goes to a temp file in the target directory and is renamed
//! into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::build::{validate_build_id, BuildPatch, BuildRecord};
use crate::error::StateError;
use crate::lease::{check_acquire, check_presented, Lease};
use crate::store::{page_ids, BuildPage, BuildStore};
use crate::StateResult;

pub const BUILD_RECORD_FILE: &str = "build.json";
const LEASE_FILE: &str = "lease.json";
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    id: String,
    created_at: DateTime<Utc>,
}

pub struct FsBuildStore {
    builds_dir: PathBuf,
    // serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FsBuildStore {
    /// Open (creating if needed) `<data_root>/builds`.
    pub fn new(data_root: impl AsRef<Path>) -> StateResult<Self> {
        let builds_dir = data_root.as_ref().join("builds");
        fs::create_dir_all(&builds_dir)?;
        Ok(Self {
            builds_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    /// Directory holding everything for one build.
    pub fn build_dir(&self, build_id: &str) -> PathBuf {
        self.builds_dir.join(build_id)
    }

    fn record_path(&self, build_id: &str) -> PathBuf {
        self.build_dir(build_id).join(BUILD_RECORD_FILE)
    }

    fn lease_path(&self, build_id: &str) -> PathBuf {
        self.build_dir(build_id).join(LEASE_FILE)
    }

    fn index_path(&self) -> PathBuf {
        self.builds_dir.join(INDEX_FILE)
    }

    fn read_record(&self, build_id: &str) -> StateResult<BuildRecord> {
        validate_build_id(build_id)?;
        read_json(&self.record_path(build_id))?
            .ok_or_else(|| StateError::BuildNotFound(build_id.to_string()))
    }

    fn read_lease(&self, build_id: &str) -> StateResult<Option<Lease>> {
        read_json(&self.lease_path(build_id))
    }

    fn read_index(&self) -> StateResult<Vec<IndexEntry>> {
        Ok(read_json(&self.index_path())?.unwrap_or_default())
    }

    /// Load the record and verify the presented lease.
    fn leased_record(&self, lease: &Lease, now: DateTime<Utc>) -> StateResult<BuildRecord> {
        let record = self.read_record(&lease.build_id)?;
        let stored = self.read_lease(&lease.build_id)?;
        check_presented(stored.as_ref(), lease, now)?;
        Ok(record)
    }
}

#[async_trait]
impl BuildStore for FsBuildStore {
    async fn create(&self, record: BuildRecord) -> StateResult<()> {
        validate_build_id(&record.id)?;
        let _guard = self.write_lock.lock().await;

        let path = self.record_path(&record.id);
        if path.exists() {
            return Err(StateError::BuildExists(record.id));
        }
        write_json_atomic(&path, &record)?;

        let mut index = self.read_index()?;
        index.retain(|e| e.id != record.id);
        index.push(IndexEntry {
            id: record.id.clone(),
            created_at: record.created_at,
        });
        index.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        write_json_atomic(&self.index_path(), &index)?;

        debug!(event = "build.created", build_id = %record.id);
        Ok(())
    }

    async fn get(&self, build_id: &str) -> StateResult<BuildRecord> {
        self.read_record(build_id)
    }

    async fn list(&self, cursor: Option<&str>, limit: usize) -> StateResult<BuildPage> {
        let ids: Vec<String> = self.read_index()?.into_iter().map(|e| e.id).collect();
        let (page, next_cursor) = page_ids(&ids, cursor, limit);
        let mut items = Vec::with_capacity(page.len());
        for id in page {
            match self.read_record(&id) {
                Ok(record) => items.push(record),
                // index can briefly list an id whose directory was removed
                Err(StateError::BuildNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(BuildPage { items, next_cursor })
    }

    async fn acquire_lease(
        &self,
        build_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> StateResult<Lease> {
        let _guard = self.write_lock.lock().await;
        // lease only makes sense for an existing record
        self.read_record(build_id)?;

        let now = Utc::now();
        let current = self.read_lease(build_id)?;
        check_acquire(current.as_ref(), build_id, now)?;

        let lease = Lease::new(build_id, owner, ttl, now);
        write_json_atomic(&self.lease_path(build_id), &lease)?;
        debug!(event = "lease.acquired", build_id = %build_id, owner = %owner);
        Ok(lease)
    }

    async fn release_lease(&self, lease: &Lease) -> StateResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.lease_path(&lease.build_id);
        match self.read_lease(&lease.build_id)? {
            Some(stored) if stored.token == lease.token => {
                fs::remove_file(path)?;
                Ok(())
            }
            // already released or taken over after expiry
            _ => Ok(()),
        }
    }

    async fn update(&self, lease: &Lease, patch: BuildPatch) -> StateResult<BuildRecord> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut record = self.leased_record(lease, now)?;
        record.apply(patch, now)?;
        write_json_atomic(&self.record_path(&record.id), &record)?;
        Ok(record)
    }

    async fn delete(&self, lease: &Lease) -> StateResult<BuildRecord> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut record = self.leased_record(lease, now)?;
        record.mark_deleted(now);
        write_json_atomic(&self.record_path(&record.id), &record)?;
        Ok(record)
    }

    async fn restore(&self, lease: &Lease) -> StateResult<BuildRecord> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut record = self.leased_record(lease, now)?;
        record.restore(now)?;
        write_json_atomic(&self.record_path(&record.id), &record)?;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Read and decode a JSON file; `Ok(None)` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pretty-print `value` to `path` via temp file + rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StateResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(value)?)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
