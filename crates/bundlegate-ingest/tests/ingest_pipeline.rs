//! Ingestion pipeline against a real data directory with in-memory
//! collaborators.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bundlegate_core::digest::sha256_file;
use bundlegate_core::fakes::{FakeBundler, FakeFetcher};
use bundlegate_core::manifest::MANIFEST_FILE;
use bundlegate_core::transform::TRANSFORM_REPORT_FILE;
use bundlegate_core::{BuildLayout, HtmlTransformer, Manifest, TransformOptions};
use bundlegate_ingest::project::find_output_dir;
use bundlegate_ingest::{
    submit_inline, IngestConfig, IngestError, IngestJob, IngestResult, IngestWorker,
    InlineSubmission, JobLog, ProjectBuilder, WorkerPool,
};
use bundlegate_state::fakes::{MemoryBuildStore, MemoryListingService};
use bundlegate_state::{BuildRecord, BuildState, BuildStore, NetworkPolicy};
use zip::write::SimpleFileOptions;

const INDEX: &str = r#"<!doctype html>
<html>
<head><title>Weather</title></head>
<body>
<script>window.units = "metric";</script>
<script src="https://api.example.com/sdk.js"></script>
<script type="module" src="./main.js"></script>
</body>
</html>
"#;

/// Uses whatever static output the archive already contains.
struct StaticBuilder;

#[async_trait]
impl ProjectBuilder for StaticBuilder {
    async fn build(&self, project_dir: &Path, _allow_scripts: bool, _log: &JobLog) -> IngestResult<PathBuf> {
        find_output_dir(project_dir)
    }
}

/// Build step that always fails, counting calls.
#[derive(Default)]
struct FailingBuilder {
    calls: AtomicUsize,
}

#[async_trait]
impl ProjectBuilder for FailingBuilder {
    async fn build(&self, _project_dir: &Path, _allow_scripts: bool, _log: &JobLog) -> IngestResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(IngestError::BuildFailed {
            step: "build".to_string(),
            code: 1,
            stderr: "Cannot find module 'left-pad'".to_string(),
        })
    }
}

struct Harness {
    config: IngestConfig,
    builds: Arc<MemoryBuildStore>,
    listings: Arc<MemoryListingService>,
    worker: IngestWorker,
}

fn harness(data_root: &Path, config: IngestConfig, builder: Arc<dyn ProjectBuilder>) -> Harness {
    let config = config.with_data_root(data_root);
    let builds = Arc::new(MemoryBuildStore::new());
    let listings = Arc::new(MemoryListingService::new());
    let transformer = HtmlTransformer::new(TransformOptions::default())
        .with_fetcher(Arc::new(
            FakeFetcher::new().with_status("https://api.example.com/sdk.js", 502),
        ))
        .with_bundler(Arc::new(FakeBundler::new()));
    let worker = IngestWorker::new(
        config.clone(),
        builds.clone(),
        listings.clone(),
        transformer,
        builder,
    );
    Harness {
        config,
        builds,
        listings,
        worker,
    }
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        zip.write_all(body.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

fn project_zip(dir: &Path) -> PathBuf {
    let archive = dir.join("upload.zip");
    write_zip(
        &archive,
        &[
            ("index.html", INDEX),
            ("main.js", "import './ui.js';"),
            ("ui.js", "document.title = 'ok';"),
            (
                "metadata.json",
                r#"{"name":"Weather","description":"Forecasts","translations":{"hr":{"title":"Vrijeme"}}}"#,
            ),
        ],
    );
    archive
}

fn scratch_is_empty(config: &IngestConfig) -> bool {
    match std::fs::read_dir(&config.scratch_root) {
        Ok(entries) => entries.count() == 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn archive_reaches_pending_review() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = project_zip(dir.path());
    let h = harness(&dir.path().join("data"), IngestConfig::default(), Arc::new(StaticBuilder));
    let job = IngestJob::new(&archive, "listing-1", "author-1").with_build_id("b-weather");

    let outcome = h.worker.process(&job, 1).await.expect("ingest");
    assert_eq!(outcome.slug, "weather");
    assert_eq!(outcome.network_policy, NetworkPolicy::OpenNet);
    assert_eq!(outcome.network_domains, vec!["https://api.example.com".to_string()]);
    assert_eq!(outcome.archive_sha256, sha256_file(&archive).expect("digest"));

    let record = h.builds.get("b-weather").await.expect("record");
    assert_eq!(record.state, BuildState::PendingReview);
    assert_eq!(record.progress, 100);
    assert_eq!(record.network_policy, Some(NetworkPolicy::OpenNet));
    assert_eq!(record.listing_id.as_deref(), Some("listing-1"));
    assert_eq!(record.bundle_sha256.as_deref(), Some(outcome.bundle_sha256.as_str()));

    let layout = BuildLayout::new(&h.config.data_root, "b-weather");
    let bundle = std::fs::read_to_string(layout.bundle_dir().join("index.html")).expect("bundle");
    assert!(!bundle.contains("<script>window.units"));
    assert!(layout.bundle_dir().join("app.js").is_file());
    assert!(layout.archive_path().is_file());
    let manifest = Manifest::load(&layout.build_dir().join(MANIFEST_FILE)).expect("manifest");
    assert_eq!(manifest.name, "Weather");
    assert_eq!(manifest.network_policy, NetworkPolicy::OpenNet);

    let deployed = h.config.deployment_dir("listing-1", "b-weather").join("index.html");
    assert_eq!(std::fs::read_to_string(deployed).expect("deployment"), INDEX);

    let listings = h.listings.all();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].build_id, "b-weather");
    assert!(listings[0].translations.contains_key("hr"));

    let stages: Vec<String> = JobLog::read(&h.config.job_log_path("listing-1", &job.job_id))
        .expect("job log")
        .into_iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(stages.first().map(String::as_str), Some("start"));
    assert!(stages.contains(&"unpack".to_string()));
    assert_eq!(stages.last().map(String::as_str), Some("done"));
    assert!(scratch_is_empty(&h.config));
}

#[tokio::test]
async fn failed_build_leaves_state_and_scratch_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = project_zip(dir.path());
    let h = harness(
        &dir.path().join("data"),
        IngestConfig::default(),
        Arc::new(FailingBuilder::default()),
    );
    h.builds
        .create(BuildRecord::new("b-broken", chrono::Utc::now()))
        .await
        .expect("create");
    let job = IngestJob::new(&archive, "listing-2", "author-1").with_build_id("b-broken");

    match h.worker.process(&job, 1).await {
        Err(IngestError::BuildFailed { stderr, .. }) => assert!(stderr.contains("left-pad")),
        other => panic!("expected BuildFailed, got {:?}", other),
    }

    let record = h.builds.get("b-broken").await.expect("record");
    assert_eq!(record.state, BuildState::Queued);
    assert_eq!(record.timeline.len(), 1);
    assert!(scratch_is_empty(&h.config));
    assert!(!BuildLayout::new(&h.config.data_root, "b-broken")
        .bundle_dir()
        .exists());
    assert!(h.listings.all().is_empty());
}

#[tokio::test]
async fn pool_retries_then_marks_build_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = project_zip(dir.path());
    let builder = Arc::new(FailingBuilder::default());
    let h = harness(
        &dir.path().join("data"),
        IngestConfig::default().with_retries(2, 1),
        builder.clone(),
    );
    let job = IngestJob::new(&archive, "listing-3", "author-1").with_build_id("b-retry");

    let pool = WorkerPool::start(Arc::new(h.worker));
    pool.enqueue(job).await.expect("enqueue");
    let reports = pool.shutdown().await;

    assert_eq!(reports.len(), 1);
    assert!(!reports[0].succeeded());
    assert_eq!(reports[0].attempts, 3);
    assert_eq!(builder.calls.load(Ordering::SeqCst), 3);

    let record = h.builds.get("b-retry").await.expect("record");
    assert_eq!(record.state, BuildState::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.reasons, vec!["BUILD_FAILED".to_string()]);
    assert_eq!(record.public_message.as_deref(), Some("The project build failed."));
    assert!(record.error_category.is_some());
}

#[tokio::test]
async fn traversal_archive_is_rejected_without_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = dir.path().join("evil.zip");
    write_zip(&archive, &[("index.html", INDEX), ("../../outside.js", "pwn()")]);
    let h = harness(
        &dir.path().join("data"),
        IngestConfig::default().with_retries(3, 1),
        Arc::new(StaticBuilder),
    );
    let job = IngestJob::new(&archive, "listing-4", "author-1").with_build_id("b-evil");

    let pool = WorkerPool::start(Arc::new(h.worker));
    pool.enqueue(job).await.expect("enqueue");
    let reports = pool.shutdown().await;

    assert_eq!(reports[0].attempts, 1);
    assert!(reports[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("ARCHIVE_UNSAFE_ENTRY"));
    assert!(!dir.path().join("outside.js").exists());
    assert_eq!(
        h.builds.get("b-evil").await.expect("record").state,
        BuildState::Failed
    );
}

#[tokio::test]
async fn inline_module_code_is_wrapped_and_queued_for_review() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = harness(&dir.path().join("data"), IngestConfig::default(), Arc::new(StaticBuilder));

    let outcome = submit_inline(
        &h.worker,
        InlineSubmission {
            code: "document.body.textContent = 'hello';".to_string(),
            title: "Hello World".to_string(),
            author_uid: "author-1".to_string(),
            listing_id: None,
        },
    )
    .await
    .expect("submit");
    assert_eq!(outcome.slug, "hello-world");
    assert!(outcome.report.module_bundle.created);

    let record = h.builds.get(&outcome.build_id).await.expect("record");
    assert_eq!(record.state, BuildState::PendingReview);
    assert_eq!(record.listing_id.as_deref(), Some(outcome.listing_id.as_str()));

    let layout = BuildLayout::new(&h.config.data_root, &outcome.build_id);
    let html = std::fs::read_to_string(layout.build_dir().join("index.html")).expect("index");
    assert!(html.contains("<title>Hello World</title>"));
    assert!(html.contains("<script src=\"./app.js\" defer></script>"));
    let manifest = Manifest::load(&layout.build_dir().join(MANIFEST_FILE)).expect("manifest");
    assert_eq!(manifest.network_policy, NetworkPolicy::NoNet);
    assert_eq!(manifest.name, "Hello World");
}

#[tokio::test(flavor = "current_thread")]
async fn inline_document_is_stored_as_index_with_empty_app_js() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = harness(&dir.path().join("data"), IngestConfig::default(), Arc::new(StaticBuilder));

    let outcome = submit_inline(
        &h.worker,
        InlineSubmission {
            code: "<!doctype html><html><head><title>Clock</title></head><body><p>tick</p></body></html>"
                .to_string(),
            title: "Clock".to_string(),
            author_uid: "author-2".to_string(),
            listing_id: None,
        },
    )
    .await
    .expect("submit");

    let layout = BuildLayout::new(&h.config.data_root, &outcome.build_id);
    let html = std::fs::read_to_string(layout.build_dir().join("index.html")).expect("index");
    assert!(html.contains("<p>tick</p>"));
    assert_eq!(
        std::fs::read_to_string(layout.build_dir().join("app.js")).expect("app.js"),
        ""
    );
    assert!(layout.build_dir().join(MANIFEST_FILE).is_file());
    assert!(layout.build_dir().join(TRANSFORM_REPORT_FILE).is_file());
    assert_eq!(
        h.builds.get(&outcome.build_id).await.expect("record").state,
        BuildState::PendingReview
    );
}

#[tokio::test]
async fn inline_rejects_empty_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = harness(&dir.path().join("data"), IngestConfig::default(), Arc::new(StaticBuilder));
    let err = submit_inline(
        &h.worker,
        InlineSubmission {
            code: "   ".to_string(),
            title: "Empty".to_string(),
            author_uid: "author-1".to_string(),
            listing_id: None,
        },
    )
    .await
    .expect_err("empty");
    assert_eq!(err.code(), "SUBMISSION_INVALID");
}
