//! Ingestion worker: one uploaded archive in, one reviewable build out.
//!
//! Stages, each appended to the job log:
//!
//! 1. unpack the zip into a private scratch directory
//! 2. build the project (opt-in) and locate its static output
//! 3. copy to `deployments/<listingId>/<buildId>/` and into `bundle/`
//! 4. synthesize `app.js`, run the sandboxing transform
//! 5. detect remaining external origins, write metadata and manifest
//! 6. digest the upload and the produced bundle archive
//! 7. advance the build to `pending_review`, upsert the listing
//!
//! The build record is only touched in the last stage, so a failure
//! anywhere earlier leaves it exactly where it was. The scratch directory
//! is removed whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bundlegate_core::archive::write_tar_gz;
use bundlegate_core::digest::sha256_file;
use bundlegate_core::fsutil;
use bundlegate_core::layout::{APP_FILE, INDEX_FILE};
use bundlegate_core::manifest::{MANIFEST_FILE, METADATA_FILE};
use bundlegate_core::obs;
use bundlegate_core::transform::TRANSFORM_REPORT_FILE;
use bundlegate_core::{
    detect_external_domains, ensure_app_js, read_bundle_metadata, BuildLayout, HtmlTransformer,
    Manifest, TransformReport,
};
use bundlegate_state::{
    is_valid_build_id, release_logged, write_json_atomic, BuildPatch, BuildRecord, BuildState,
    BuildStore, ListingService, ListingUpsert, NetworkPolicy, DEFAULT_LEASE_TTL,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn, Instrument};

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::joblog::JobLog;
use crate::project::ProjectBuilder;
use crate::unpack::unpack_zip;

/// Lease owner name used by ingestion workers.
pub const WORKER_OWNER: &str = "ingest-worker";

/// One queued archive submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub job_id: String,
    pub build_id: String,
    pub listing_id: String,
    pub archive_path: PathBuf,
    pub author_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Submitter asks for the project's `build` script to run.
    #[serde(default)]
    pub allow_scripts: bool,
}

impl IngestJob {
    /// Fresh job with generated job and build ids.
    pub fn new(
        archive_path: impl Into<PathBuf>,
        listing_id: impl Into<String>,
        author_uid: impl Into<String>,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            build_id: uuid::Uuid::new_v4().to_string(),
            listing_id: listing_id.into(),
            archive_path: archive_path.into(),
            author_uid: author_uid.into(),
            title: None,
            allow_scripts: false,
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_scripts(mut self, allowed: bool) -> Self {
        self.allow_scripts = allowed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub build_id: String,
    pub listing_id: String,
    pub slug: String,
    pub version: u32,
    pub deployment_dir: PathBuf,
    pub archive_sha256: String,
    pub bundle_sha256: String,
    pub network_policy: NetworkPolicy,
    pub network_domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TransformReport>,
}

/// Everything the pipeline produced before the state stage.
struct Prepared {
    title: String,
    description: Option<String>,
    tags: Vec<String>,
    translations: std::collections::BTreeMap<String, bundlegate_state::ListingTranslation>,
    deployment_dir: PathBuf,
    archive_sha256: String,
    bundle_sha256: String,
    network_policy: NetworkPolicy,
    network_domains: Vec<String>,
    report: Option<TransformReport>,
}

pub struct IngestWorker {
    config: IngestConfig,
    builds: Arc<dyn BuildStore>,
    listings: Arc<dyn ListingService>,
    transformer: HtmlTransformer,
    builder: Arc<dyn ProjectBuilder>,
}

impl IngestWorker {
    pub fn new(
        config: IngestConfig,
        builds: Arc<dyn BuildStore>,
        listings: Arc<dyn ListingService>,
        transformer: HtmlTransformer,
        builder: Arc<dyn ProjectBuilder>,
    ) -> Self {
        Self {
            config,
            builds,
            listings,
            transformer,
            builder,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn builds(&self) -> &dyn BuildStore {
        self.builds.as_ref()
    }

    pub(crate) fn listings(&self) -> &dyn ListingService {
        self.listings.as_ref()
    }

    pub(crate) fn transformer(&self) -> &HtmlTransformer {
        &self.transformer
    }

    /// Run every stage of `job`; `attempt` is 1-based and only recorded.
    pub async fn process(&self, job: &IngestJob, attempt: u32) -> IngestResult<IngestOutcome> {
        for (what, id) in [("build id", &job.build_id), ("listing id", &job.listing_id)] {
            if !is_valid_build_id(id) {
                return Err(IngestError::InvalidInput(format!("invalid {}: {:?}", what, id)));
            }
        }
        let started = Instant::now();

        std::fs::create_dir_all(&self.config.scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir_in(&self.config.scratch_root)?;
        let log = JobLog::create(self.config.job_log_path(&job.listing_id, &job.job_id))?;
        log.record(
            "start",
            "job started",
            json!({ "buildId": job.build_id, "attempt": attempt }),
        );

        let result = self
            .run(job, attempt, scratch.path(), &log)
            .instrument(obs::build_span(&job.build_id))
            .await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(event = "ingest.scratch_cleanup_failed", path = %scratch_path.display(), error = %e);
        }
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => log.record(
                "done",
                "build ready for review",
                json!({ "slug": outcome.slug, "durationMs": duration_ms }),
            ),
            Err(e) => log.record(
                "error",
                &e.to_string(),
                json!({ "code": e.code(), "durationMs": duration_ms }),
            ),
        }
        result
    }

    async fn run(
        &self,
        job: &IngestJob,
        attempt: u32,
        scratch: &Path,
        log: &JobLog,
    ) -> IngestResult<IngestOutcome> {
        let prepared = self.prepare(job, scratch, log).await?;
        self.record(job, attempt, prepared, log).await
    }

    async fn prepare(&self, job: &IngestJob, scratch: &Path, log: &JobLog) -> IngestResult<Prepared> {
        let src = scratch.join("src");
        let files = unpack_zip(&job.archive_path, &src).await?;
        log.record("unpack", "archive extracted", json!({ "files": files }));

        let allow_scripts = job.allow_scripts && self.config.allow_build_scripts;
        let output = self.builder.build(&src, allow_scripts, log).await?;
        if !output.join(INDEX_FILE).is_file() {
            return Err(IngestError::OutputMissing(INDEX_FILE.to_string()));
        }

        let deployment_dir = self.config.deployment_dir(&job.listing_id, &job.build_id);
        fsutil::replace_dir(&output, &deployment_dir)?;
        log.record(
            "deploy",
            "output copied",
            json!({ "dir": deployment_dir.display().to_string() }),
        );
        let archive_sha256 = sha256_file(&job.archive_path)?;

        let layout = BuildLayout::new(&self.config.data_root, &job.build_id);
        let bundle_dir = layout.bundle_dir();
        fsutil::replace_dir(&deployment_dir, &bundle_dir)?;

        if let Some(entry) = ensure_app_js(&bundle_dir)? {
            log.record("entry", "entrypoint ready", json!({ "entry": entry }));
        }

        let index = bundle_dir.join(INDEX_FILE);
        let report = if self.config.autofix {
            let report = self.transformer.transform(&index).await?;
            report.write_to(&bundle_dir.join(TRANSFORM_REPORT_FILE))?;
            log.record(
                "transform",
                "sandboxing transform applied",
                json!({
                    "changed": report.changed,
                    "vendored": report.vendored.len(),
                    "warnings": report.warnings,
                }),
            );
            Some(report)
        } else {
            None
        };
        if !bundle_dir.join(APP_FILE).is_file() {
            std::fs::write(bundle_dir.join(APP_FILE), "")?;
            log.stage("entry", "no scripts found; wrote empty app.js");
        }

        let html = std::fs::read_to_string(&index)?;
        let network_domains = detect_external_domains(&html);

        let fallback = job.title.clone().unwrap_or_else(|| job.listing_id.clone());
        let metadata = read_bundle_metadata(&src, &fallback);
        write_json_atomic(&layout.root().join(METADATA_FILE), &metadata)?;
        let title = job
            .title
            .clone()
            .or_else(|| metadata.name.clone())
            .unwrap_or_else(|| job.listing_id.clone());

        let mut manifest = Manifest::synthesize(&job.build_id, &metadata, network_domains.clone());
        manifest.name = title.clone();
        manifest.write(&layout.build_dir().join(MANIFEST_FILE))?;
        manifest.write(&bundle_dir.join(MANIFEST_FILE))?;
        log.record(
            "manifest",
            "manifest written",
            json!({
                "networkPolicy": manifest.network_policy.as_str(),
                "networkDomains": network_domains,
            }),
        );

        write_tar_gz(&bundle_dir, &layout.archive_path())?;
        let bundle_sha256 = sha256_file(&layout.archive_path())?;
        log.record(
            "digest",
            "archives hashed",
            json!({ "archiveSha256": archive_sha256, "bundleSha256": bundle_sha256 }),
        );

        Ok(Prepared {
            title,
            description: metadata.description,
            tags: metadata.tags,
            translations: metadata.translations,
            deployment_dir,
            archive_sha256,
            bundle_sha256,
            network_policy: manifest.network_policy,
            network_domains,
            report,
        })
    }

    async fn ensure_record(&self, build_id: &str) -> IngestResult<BuildState> {
        match self.builds.get(build_id).await {
            Ok(record) => Ok(record.state),
            Err(e) if e.is_not_found() => {
                self.builds
                    .create(BuildRecord::new(build_id, Utc::now()))
                    .await?;
                Ok(BuildState::Queued)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn record(
        &self,
        job: &IngestJob,
        attempt: u32,
        prepared: Prepared,
        log: &JobLog,
    ) -> IngestResult<IngestOutcome> {
        let from = self.ensure_record(&job.build_id).await?;
        let lease = self
            .builds
            .acquire_lease(&job.build_id, WORKER_OWNER, DEFAULT_LEASE_TTL)
            .await?;
        let result = self.record_leased(job, attempt, &lease, from, prepared, log).await;
        release_logged(self.builds.as_ref(), &lease).await;
        result
    }

    async fn record_leased(
        &self,
        job: &IngestJob,
        attempt: u32,
        lease: &bundlegate_state::Lease,
        from: BuildState,
        prepared: Prepared,
        log: &JobLog,
    ) -> IngestResult<IngestOutcome> {
        let reason = if prepared.network_domains.is_empty() {
            "no external references".to_string()
        } else {
            format!("external references: {}", prepared.network_domains.join(", "))
        };
        let patch = BuildPatch::state(BuildState::PendingReview)
            .with_progress(100)
            .with_attempts(attempt)
            .with_network_policy(prepared.network_policy, reason)
            .with_digests(
                Some(prepared.archive_sha256.clone()),
                Some(prepared.bundle_sha256.clone()),
            );
        self.builds.update(lease, patch).await?;
        obs::emit_build_transition(&job.build_id, from.as_str(), BuildState::PendingReview.as_str());

        let listing = self
            .listings
            .upsert(ListingUpsert {
                listing_id: Some(job.listing_id.clone()),
                title: prepared.title,
                author_uid: job.author_uid.clone(),
                build_id: job.build_id.clone(),
                description: prepared.description,
                tags: prepared.tags,
                translations: prepared.translations,
            })
            .await?;
        self.builds
            .update(lease, BuildPatch::default().with_listing(&listing.listing_id))
            .await?;
        log.record(
            "listing",
            "listing updated",
            json!({ "listingId": listing.listing_id, "slug": listing.slug, "version": listing.version }),
        );
        info!(
            event = "ingest.ready_for_review",
            build_id = %job.build_id,
            listing_id = %listing.listing_id,
            slug = %listing.slug,
        );

        Ok(IngestOutcome {
            build_id: job.build_id.clone(),
            listing_id: listing.listing_id,
            slug: listing.slug,
            version: listing.version,
            deployment_dir: prepared.deployment_dir,
            archive_sha256: prepared.archive_sha256,
            bundle_sha256: prepared.bundle_sha256,
            network_policy: prepared.network_policy,
            network_domains: prepared.network_domains,
            report: prepared.report,
        })
    }
}
