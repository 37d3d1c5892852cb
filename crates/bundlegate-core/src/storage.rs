//! Durable object storage for promoted bundles.
//!
//! - [`ObjectStore`] is the upload seam used by promotion
//! - [`HttpObjectStore`] PUTs objects to a plain HTTP endpoint
//! - [`upload_dir`] mirrors a directory tree under a key prefix

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fsutil;

/// Cache header applied to every promoted bundle object.
pub const BUNDLE_CACHE_CONTROL: &str = "public, max-age=600";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage is not configured: {0}")]
    NotConfigured(String),

    #[error("upload of {key} failed with HTTP {status}")]
    Http { key: String, status: u16 },

    #[error("storage request failed: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub content_type: String,
    pub cache_control: Option<String>,
}

impl ObjectMetadata {
    /// Metadata for a bundle file, content type inferred from its name.
    pub fn for_bundle_file(path: &str) -> Self {
        Self {
            content_type: content_type_for(path).to_string(),
            cache_control: Some(BUNDLE_CACHE_CONTROL.to_string()),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, source: &Path, key: &str, metadata: &ObjectMetadata) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Public URL under which `key` is served.
    fn public_url(&self, key: &str) -> String;
}

/// MIME type by file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "txt" => "text/plain; charset=utf-8",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Upload every file under `dir` as `<prefix>/<relative path>`. Returns the count.
pub async fn upload_dir(store: &dyn ObjectStore, dir: &Path, prefix: &str) -> StorageResult<usize> {
    let files = fsutil::list_files(dir)?;
    let prefix = prefix.trim_end_matches('/');
    for rel in &files {
        let key = format!("{}/{}", prefix, rel);
        store
            .upload(&dir.join(rel), &key, &ObjectMetadata::for_bundle_file(rel))
            .await?;
    }
    Ok(files.len())
}

/// PUT-based object store (S3-compatible gateways, presigned proxies, ...).
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    upload_base: String,
    public_base: String,
}

impl HttpObjectStore {
    pub fn new(upload_base: impl Into<String>) -> StorageResult<Self> {
        let upload_base = upload_base.into().trim_end_matches('/').to_string();
        if upload_base.is_empty() {
            return Err(StorageError::NotConfigured(
                "STORAGE_UPLOAD_URL is empty".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            public_base: upload_base.clone(),
            upload_base,
        })
    }

    /// Serve from a different origin than uploads go to (CDN in front of a bucket).
    pub fn with_public_base(mut self, public_base: impl Into<String>) -> Self {
        self.public_base = public_base.into().trim_end_matches('/').to_string();
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.upload_base, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, source: &Path, key: &str, metadata: &ObjectMetadata) -> StorageResult<()> {
        let body = tokio::fs::read(source).await?;
        let mut request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, &metadata.content_type)
            .body(body);
        if let Some(cache) = &metadata.cache_control {
            request = request.header(reqwest::header::CACHE_CONTROL, cache);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Http {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }
        tracing::debug!(event = "storage.uploaded", key = %key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let response = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key.trim_start_matches('/'))
    }
}
