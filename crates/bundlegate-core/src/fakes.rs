//! In-memory fakes for the network, bundler and storage seams (testing only)
//!
//! - `FakeFetcher` serves canned bodies (in chunks) and statuses per URL
//! - `FakeBundler` records the entry it was given and writes a stub `app.js`
//! - `MemoryObjectStore` keeps uploaded objects in a map

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::bundler::{BundleOutput, BundleRequest, BundlerError, ModuleBundler};
use crate::storage::{ObjectMetadata, ObjectStore, StorageResult};
use crate::vendor::{FetchResponse, ResourceFetcher, VendorError};

/// Chunk size used when streaming canned bodies.
const FAKE_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// FakeFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Canned {
    Body(Vec<u8>),
    Status(u16),
}

#[derive(Debug, Default)]
struct FetcherState {
    responses: HashMap<String, Canned>,
    counts: HashMap<String, usize>,
}

/// Unknown URLs answer 404.
#[derive(Debug, Clone, Default)]
pub struct FakeFetcher {
    state: Arc<Mutex<FetcherState>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(self, url: &str, body: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), Canned::Body(body.to_vec()));
        self
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), Canned::Status(status));
        self
    }

    /// Sleep before answering every request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .counts
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, VendorError> {
        let canned = {
            let mut state = self.state.lock().unwrap();
            *state.counts.entry(url.to_string()).or_insert(0) += 1;
            state.responses.get(url).cloned()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let (status, body) = match canned {
            Some(Canned::Body(body)) => (200, body),
            Some(Canned::Status(status)) => (status, Vec::new()),
            None => (404, Vec::new()),
        };
        let chunks: Vec<Result<Vec<u8>, VendorError>> =
            body.chunks(FAKE_CHUNK).map(|c| Ok(c.to_vec())).collect();
        Ok(FetchResponse {
            status,
            body: stream::iter(chunks).boxed(),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeBundler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BundlerState {
    last_entry: Option<String>,
    calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeBundler {
    state: Arc<Mutex<BundlerState>>,
    warnings: Vec<String>,
    failure: Option<String>,
}

impl FakeBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bundler that always exits non-zero with `stderr`.
    pub fn failing(stderr: &str) -> Self {
        Self {
            failure: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Content of the entry file seen by the most recent call.
    pub fn last_entry(&self) -> Option<String> {
        self.state.lock().unwrap().last_entry.clone()
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

#[async_trait]
impl ModuleBundler for FakeBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, BundlerError> {
        let entry = tokio::fs::read_to_string(&request.entry_file).await?;
        {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.last_entry = Some(entry.clone());
        }
        if let Some(stderr) = &self.failure {
            return Err(BundlerError::Failed {
                code: 1,
                stderr: stderr.clone(),
            });
        }
        tokio::fs::write(&request.outfile, format!("// bundled\n{}", entry)).await?;
        Ok(BundleOutput {
            warnings: self.warnings.clone(),
            duration_ms: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryObjectStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, source: &Path, key: &str, metadata: &ObjectMetadata) -> StorageResult<()> {
        let body = tokio::fs::read(source).await?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://objects/{}", key.trim_start_matches('/'))
    }
}
