//! Publish promotion: canonicalize a build's output and hand it to storage.
//!
//! 1. pick the authoritative directory (`bundle/` with an index, else `build/`)
//! 2. stage a copy, hydrating missing files from root-level siblings
//! 3. run the sandboxing transform once over the staged copy
//! 4. synthesize `app.js` and `manifest_v1.json` when absent
//! 5. mirror the staged copy into both `bundle/` and `build/`
//! 6. keep it local, or archive and upload it
//!
//! Every run re-derives both directories from the current source, so a
//! crashed promotion is repaired by running it again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bundlegate_state::{
    is_valid_build_id, release_logged, BuildPatch, BuildState, BuildStore, StateError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};

use crate::config::{PublishConfig, StorageDriver};
use crate::entry::{detect_external_domains, ensure_app_js};
use crate::fsutil;
use crate::layout::{BuildLayout, APP_FILE, BUNDLE_ARCHIVE, INDEX_FILE};
use crate::manifest::{read_bundle_metadata, Manifest, ManifestError, MANIFEST_FILE};
use crate::obs;
use crate::storage::{upload_dir, HttpObjectStore, ObjectMetadata, ObjectStore, StorageError};
use crate::transform::{HtmlTransformer, TransformError, TransformReport, TRANSFORM_REPORT_FILE};

const STAGING_DIR: &str = ".promote-staging";

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("invalid build id: {0:?}")]
    InvalidId(String),

    #[error("Missing required file(s): {file}")]
    RequiredFileMissing { file: String },

    #[error("build {build_id} cannot be published from state {state}")]
    NotPublishable { build_id: String, state: BuildState },

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("manifest write failed: {0}")]
    Manifest(#[from] ManifestError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromoteError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PromoteError::InvalidId(_) => "BUILD_INVALID_ID",
            PromoteError::RequiredFileMissing { .. } => "BUILD_REQUIRED_FILE_MISSING",
            PromoteError::NotPublishable { .. } => "BUILD_NOT_PUBLISHABLE",
            PromoteError::Transform(e) => e.code(),
            PromoteError::Storage(_) => "BUNDLE_UPLOAD_FAILED",
            PromoteError::Manifest(_) => "MANIFEST_WRITE_FAILED",
            PromoteError::State(_) => "BUILD_STATE_ERROR",
            PromoteError::Io(_) => "BUNDLE_IO_FAILED",
        }
    }

    fn missing(file: &str) -> Self {
        PromoteError::RequiredFileMissing {
            file: file.to_string(),
        }
    }
}

pub type PromoteResult<T> = std::result::Result<T, PromoteError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromoteOutcome {
    pub build_id: String,
    pub public_url: String,
    /// Objects sent to remote storage (archive included); 0 for local serving.
    pub uploaded_files: usize,
    /// Present when the transform ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TransformReport>,
}

pub struct Promoter {
    data_root: PathBuf,
    config: PublishConfig,
    transformer: HtmlTransformer,
    store: Option<Arc<dyn ObjectStore>>,
}

impl Promoter {
    pub fn new(data_root: impl Into<PathBuf>, config: PublishConfig, transformer: HtmlTransformer) -> Self {
        Self {
            data_root: data_root.into(),
            config,
            transformer,
            store: None,
        }
    }

    /// Build a promoter whose object store follows `config.storage`.
    pub fn from_config(
        data_root: impl Into<PathBuf>,
        config: PublishConfig,
        transformer: HtmlTransformer,
    ) -> PromoteResult<Self> {
        let store: Option<Arc<dyn ObjectStore>> = match &config.storage {
            StorageDriver::Local => None,
            StorageDriver::Http { upload_url } => Some(Arc::new(HttpObjectStore::new(upload_url.clone())?)),
        };
        let mut promoter = Self::new(data_root, config, transformer);
        promoter.store = store;
        Ok(promoter)
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn store(&self) -> Option<&dyn ObjectStore> {
        self.store.as_deref()
    }

    pub fn layout(&self, build_id: &str) -> BuildLayout {
        BuildLayout::new(&self.data_root, build_id)
    }

    /// Canonicalize and publish `build_id`, returning where it is served.
    pub async fn promote(&self, build_id: &str) -> PromoteResult<PromoteOutcome> {
        if !is_valid_build_id(build_id) {
            return Err(PromoteError::InvalidId(build_id.to_string()));
        }
        let layout = self.layout(build_id);
        let staging = layout.root().join(STAGING_DIR);

        let result = self
            .promote_staged(&layout, &staging)
            .instrument(obs::build_span(build_id))
            .await;
        let cleanup = staging.clone();
        if let Err(e) = run_blocking(move || Ok(fsutil::remove_dir_if_exists(&cleanup)?)).await {
            tracing::warn!(event = "promotion.staging_cleanup_failed", error = %e);
        }
        match &result {
            Ok(outcome) => {
                obs::emit_promotion_finished(build_id, &outcome.public_url, outcome.uploaded_files)
            }
            Err(e) => obs::emit_promotion_failed(build_id, e),
        }
        result
    }

    async fn promote_staged(&self, layout: &BuildLayout, staging: &Path) -> PromoteResult<PromoteOutcome> {
        let build_id = layout.build_id();
        let (stage_layout, stage_dir) = (layout.clone(), staging.to_path_buf());
        let manifest_path = run_blocking(move || stage_sources(&stage_layout, &stage_dir)).await?;

        let report = if self.config.autofix {
            let report = self.transformer.transform(&staging.join(INDEX_FILE)).await?;
            let (dir, written) = (staging.to_path_buf(), report.clone());
            run_blocking(move || Ok(written.write_to(&dir.join(TRANSFORM_REPORT_FILE))?)).await?;
            Some(report)
        } else {
            None
        };

        let (stage_layout, stage_dir) = (layout.clone(), staging.to_path_buf());
        run_blocking(move || seal_and_swap(&stage_layout, &stage_dir, &manifest_path)).await?;

        let (public_url, uploaded_files) = match &self.config.storage {
            StorageDriver::Local => (layout.url("bundle/"), 0),
            StorageDriver::Http { .. } => {
                let store = self.store.as_deref().ok_or_else(|| {
                    StorageError::NotConfigured("no object store for the http driver".to_string())
                })?;
                self.upload(store, layout).await?
            }
        };

        Ok(PromoteOutcome {
            build_id: build_id.to_string(),
            public_url,
            uploaded_files,
            report,
        })
    }

    async fn upload(&self, store: &dyn ObjectStore, layout: &BuildLayout) -> PromoteResult<(String, usize)> {
        let archive = layout.archive_path();
        let (bundle_dir, tarball) = (layout.bundle_dir(), archive.clone());
        run_blocking(move || Ok(crate::archive::write_tar_gz(&bundle_dir, &tarball)?)).await?;
        store
            .upload(
                &archive,
                &layout.key(BUNDLE_ARCHIVE),
                &ObjectMetadata::for_bundle_file(BUNDLE_ARCHIVE),
            )
            .await?;
        let files = upload_dir(store, &layout.bundle_dir(), &layout.key("bundle")).await?;

        if !self.config.keep_local_bundle {
            let (bundle_dir, build_dir) = (layout.bundle_dir(), layout.build_dir());
            run_blocking(move || {
                fsutil::remove_dir_if_exists(&bundle_dir)?;
                fsutil::remove_dir_if_exists(&build_dir)?;
                Ok(())
            })
            .await?;
            if let Err(e) = tokio::fs::remove_file(&archive).await {
                tracing::debug!(event = "promotion.archive_cleanup_failed", error = %e);
            }
        }
        Ok((store.public_url(&layout.key("bundle/")), files + 1))
    }

    /// Drive an approved build through `publishing` to `published` or
    /// `publish_failed`, holding the build's lease for the whole run.
    pub async fn publish_approved(
        &self,
        builds: &dyn BuildStore,
        build_id: &str,
        owner: &str,
    ) -> PromoteResult<PromoteOutcome> {
        let record = builds.get(build_id).await?;
        if !matches!(record.state, BuildState::Approved | BuildState::PublishFailed) {
            return Err(PromoteError::NotPublishable {
                build_id: build_id.to_string(),
                state: record.state,
            });
        }

        let lease = builds
            .acquire_lease(build_id, owner, bundlegate_state::DEFAULT_LEASE_TTL)
            .await?;
        let result = self.publish_leased(builds, &lease, record.state).await;
        release_logged(builds, &lease).await;
        result
    }

    async fn publish_leased(
        &self,
        builds: &dyn BuildStore,
        lease: &bundlegate_state::Lease,
        from: BuildState,
    ) -> PromoteResult<PromoteOutcome> {
        let build_id = lease.build_id.as_str();
        builds
            .update(lease, BuildPatch::state(BuildState::Publishing))
            .await?;
        obs::emit_build_transition(build_id, from.as_str(), BuildState::Publishing.as_str());

        match self.promote(build_id).await {
            Ok(outcome) => {
                builds
                    .update(lease, BuildPatch::state(BuildState::Published))
                    .await?;
                obs::emit_build_transition(
                    build_id,
                    BuildState::Publishing.as_str(),
                    BuildState::Published.as_str(),
                );
                Ok(outcome)
            }
            Err(err) => {
                let patch = BuildPatch::state(BuildState::PublishFailed)
                    .with_error(format!("{}: {}", err.code(), err))
                    .with_reasons(vec![err.code().to_string()]);
                builds.update(lease, patch).await?;
                obs::emit_build_transition(
                    build_id,
                    BuildState::Publishing.as_str(),
                    BuildState::PublishFailed.as_str(),
                );
                Err(err)
            }
        }
    }
}

/// Run filesystem-heavy promotion steps off the async workers.
async fn run_blocking<T, F>(f: F) -> PromoteResult<T>
where
    F: FnOnce() -> PromoteResult<T> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
        .await
        .map_err(|e| PromoteError::Io(std::io::Error::other(e)))?
}

/// Copy the best available output into `staging`, returning where its
/// manifest lives.
fn stage_sources(layout: &BuildLayout, staging: &Path) -> PromoteResult<PathBuf> {
    let bundle_dir = layout.bundle_dir();
    let build_dir = layout.build_dir();
    let (source, other) = if bundle_dir.join(INDEX_FILE).is_file() {
        (bundle_dir, build_dir)
    } else if build_dir.join(INDEX_FILE).is_file() {
        (build_dir, bundle_dir)
    } else if bundle_dir.is_dir() {
        (bundle_dir, build_dir)
    } else {
        (build_dir, bundle_dir)
    };
    info!(event = "promotion.source", source = %source.display());

    fsutil::remove_dir_if_exists(staging)?;
    std::fs::create_dir_all(staging)?;
    if source.is_dir() {
        fsutil::copy_dir_all(&source, staging)?;
    }
    for file in [INDEX_FILE, APP_FILE] {
        let root_copy = layout.root().join(file);
        let target = staging.join(file);
        if !target.is_file() && root_copy.is_file() {
            std::fs::copy(&root_copy, &target)?;
        }
    }
    if !staging.join(INDEX_FILE).is_file() {
        return Err(PromoteError::missing(INDEX_FILE));
    }

    let manifest_path = staging.join(MANIFEST_FILE);
    if !manifest_path.is_file() && other.join(MANIFEST_FILE).is_file() {
        std::fs::copy(other.join(MANIFEST_FILE), &manifest_path)?;
    }
    Ok(manifest_path)
}

/// Fill in `app.js` and the manifest, then swap `staging` over both output
/// directories.
fn seal_and_swap(layout: &BuildLayout, staging: &Path, manifest_path: &Path) -> PromoteResult<()> {
    if ensure_app_js(staging)?.is_none() {
        return Err(PromoteError::missing(APP_FILE));
    }

    if Manifest::load(manifest_path).is_none() {
        let html = std::fs::read_to_string(staging.join(INDEX_FILE))?;
        let metadata = read_bundle_metadata(layout.root(), layout.build_id());
        Manifest::synthesize(layout.build_id(), &metadata, detect_external_domains(&html))
            .write(manifest_path)?;
    }

    fsutil::replace_dir(staging, &layout.bundle_dir())?;
    fsutil::replace_dir(staging, &layout.build_dir())?;
    Ok(())
}
