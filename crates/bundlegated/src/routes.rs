//! Router and handlers.
//!
//! Two surfaces share one state: `/builds/<id>/...` serves build output with
//! synthesized security headers, `/api/...` exposes the build lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bundlegate_core::fsutil::is_safe_relative;
use bundlegate_core::layout::{BUILD_DIR, BUNDLE_ARCHIVE, BUNDLE_DIR, INDEX_FILE};
use bundlegate_core::storage::content_type_for;
use bundlegate_core::{headers_for_build, BuildArtifacts, BuildLayout, CspConfig, Promoter};
use bundlegate_ingest::{submit_inline, IngestJob, IngestWorker, InlineSubmission, JobQueue};
use bundlegate_state::{is_valid_build_id, review, BuildRecord, BuildStore, ReviewDecision};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};

/// Lease owner recorded for API-driven transitions.
pub const API_OWNER: &str = "bundlegated";

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// Root-level build files that may be served besides `build/` and `bundle/`.
const SERVED_ROOT_FILES: [&str; 2] = [BUNDLE_ARCHIVE, "llm.json"];

/// Directory under the data root that `POST /api/ingest` reads archives from.
pub const UPLOADS_DIR: &str = "uploads";

#[derive(Clone)]
pub struct AppState {
    pub data_root: PathBuf,
    pub builds: Arc<dyn BuildStore>,
    pub csp: Arc<CspConfig>,
    pub promoter: Arc<Promoter>,
    pub worker: Arc<IngestWorker>,
    pub queue: JobQueue,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/builds/:id/*path", get(serve_build_file))
        .route("/api/builds", get(list_builds))
        .route("/api/builds/:id", get(get_build))
        .route("/api/builds/:id/artifacts", get(get_artifacts))
        .route("/api/builds/:id/promote", post(promote_build))
        .route("/api/builds/:id/review", post(review_build))
        .route("/api/ingest", post(enqueue_ingest))
        .route("/api/submit", post(submit_code))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "bundlegated",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ----------------------------------------------------------------------------
// Static serving
// ----------------------------------------------------------------------------

fn servable(rel: &str) -> bool {
    match rel.split_once('/') {
        Some((top, _)) => top == BUILD_DIR || top == BUNDLE_DIR,
        None => SERVED_ROOT_FILES.contains(&rel),
    }
}

/// GET /builds/:id/*path - build output with synthesized headers.
async fn serve_build_file(
    State(state): State<AppState>,
    Path((build_id, rel)): Path<(String, String)>,
) -> ApiResult<Response> {
    if !is_valid_build_id(&build_id) || !is_safe_relative(&rel) {
        warn!(event = "serve.rejected", build_id = %build_id, path = %rel);
        return Err(ApiError::bad_request("PATH_REJECTED", format!("refusing path {rel:?}")));
    }

    let layout = BuildLayout::new(&state.data_root, &build_id);
    let mut rel = rel;
    if rel.ends_with('/') || layout.root().join(&rel).is_dir() {
        rel = format!("{}/{}", rel.trim_end_matches('/'), INDEX_FILE);
    }
    if !servable(&rel) {
        return Err(ApiError::not_found(format!("no such file: {rel}")));
    }
    let body = match tokio::fs::read(layout.root().join(&rel)).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("no such file: {rel}")))
        }
        Err(e) => {
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BUNDLE_IO_FAILED",
                e.to_string(),
            ))
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type_for(&rel)));
    for (name, value) in headers_for_build(&layout, &state.csp).pairs() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(event = "serve.header_skipped", header = name),
        }
    }
    Ok((StatusCode::OK, headers, body).into_response())
}

// ----------------------------------------------------------------------------
// Build API
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListParams {
    cursor: Option<String>,
    limit: Option<usize>,
}

/// GET /api/builds
async fn list_builds(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let page = state.builds.list(params.cursor.as_deref(), limit).await?;
    Ok(Json(page))
}

/// GET /api/builds/:id
async fn get_build(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> ApiResult<Json<BuildRecord>> {
    Ok(Json(state.builds.get(&build_id).await?))
}

/// GET /api/builds/:id/artifacts
async fn get_artifacts(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> ApiResult<Json<BuildArtifacts>> {
    if !is_valid_build_id(&build_id) {
        return Err(ApiError::bad_request("BUILD_INVALID_ID", build_id));
    }
    let layout = BuildLayout::new(&state.data_root, &build_id);
    Ok(Json(
        BuildArtifacts::probe(&layout, state.promoter.store()).await,
    ))
}

/// POST /api/builds/:id/promote - approved -> publishing -> published.
async fn promote_build(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .promoter
        .publish_approved(state.builds.as_ref(), &build_id, API_OWNER)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/builds/:id/review
async fn review_build(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
    Json(decision): Json<ReviewDecision>,
) -> ApiResult<Json<BuildRecord>> {
    let record = review(state.builds.as_ref(), &build_id, API_OWNER, decision).await?;
    Ok(Json(record))
}

// ----------------------------------------------------------------------------
// Submissions
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    /// Archive file name under `<data>/uploads/`.
    archive: String,
    listing_id: String,
    author_uid: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    allow_scripts: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestAccepted {
    build_id: String,
    job_id: String,
}

/// POST /api/ingest - queue an uploaded archive.
async fn enqueue_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<impl IntoResponse> {
    if !is_safe_relative(&req.archive) {
        return Err(ApiError::bad_request(
            "SUBMISSION_INVALID",
            format!("refusing archive path {:?}", req.archive),
        ));
    }
    let archive = state.data_root.join(UPLOADS_DIR).join(&req.archive);
    if !archive.is_file() {
        return Err(ApiError::not_found(format!("no uploaded archive {:?}", req.archive)));
    }

    let mut job = IngestJob::new(archive, req.listing_id, req.author_uid)
        .with_scripts(req.allow_scripts);
    if let Some(title) = req.title {
        job = job.with_title(title);
    }
    state
        .builds
        .create(BuildRecord::new(&job.build_id, chrono::Utc::now()))
        .await?;
    let accepted = IngestAccepted {
        build_id: job.build_id.clone(),
        job_id: job.job_id.clone(),
    };
    state.queue.enqueue(job).await?;
    info!(event = "ingest.accepted", build_id = %accepted.build_id, job_id = %accepted.job_id);
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// POST /api/submit - inline code straight to review.
async fn submit_code(
    State(state): State<AppState>,
    Json(submission): Json<InlineSubmission>,
) -> ApiResult<impl IntoResponse> {
    let outcome = submit_inline(&state.worker, submission).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use bundlegate_core::fakes::{FakeBundler, FakeFetcher};
    use bundlegate_core::{HtmlTransformer, PublishConfig, TransformOptions};
    use bundlegate_ingest::{IngestConfig, NodeProjectBuilder, WorkerPool};
    use bundlegate_state::fakes::{MemoryBuildStore, MemoryListingService};
    use bundlegate_state::BuildState;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(data_root: &std::path::Path) -> (AppState, Arc<MemoryBuildStore>) {
        let builds = Arc::new(MemoryBuildStore::new());
        let transformer = HtmlTransformer::new(TransformOptions::default())
            .with_fetcher(Arc::new(FakeFetcher::new()))
            .with_bundler(Arc::new(FakeBundler::new()));
        let config = IngestConfig::default().with_data_root(data_root);
        let worker = Arc::new(IngestWorker::new(
            config,
            builds.clone(),
            Arc::new(MemoryListingService::new()),
            transformer.clone(),
            Arc::new(NodeProjectBuilder::new(Duration::from_secs(5))),
        ));
        let pool = WorkerPool::start(worker.clone());
        let state = AppState {
            data_root: data_root.to_path_buf(),
            builds: builds.clone(),
            csp: Arc::new(CspConfig::default()),
            promoter: Arc::new(Promoter::new(
                data_root,
                PublishConfig::default(),
                transformer,
            )),
            worker,
            queue: pool.queue(),
        };
        (state, builds)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn write_bundle(data_root: &std::path::Path, build_id: &str) {
        let bundle = BuildLayout::new(data_root, build_id).bundle_dir();
        std::fs::create_dir_all(&bundle).expect("mkdir");
        std::fs::write(bundle.join("index.html"), "<p>hi</p>").expect("index");
        std::fs::write(bundle.join("app.js"), "").expect("app");
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        let res = build_router(state).oneshot(get("/healthz")).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn served_files_carry_security_headers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, builds) = test_state(dir.path());
        write_bundle(dir.path(), "b1");
        builds
            .create(BuildRecord::new("b1", chrono::Utc::now()))
            .await
            .expect("create");

        let res = build_router(state)
            .oneshot(get("/builds/b1/bundle/index.html"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let headers = res.headers();
        assert!(headers[CONTENT_TYPE]
            .to_str()
            .expect("ascii")
            .starts_with("text/html"));
        let csp = headers["content-security-policy"].to_str().expect("ascii");
        assert!(csp.contains("object-src 'none'"));
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert!(headers.contains_key("permissions-policy"));
    }

    #[tokio::test]
    async fn directory_requests_serve_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        write_bundle(dir.path(), "b1");
        let res = build_router(state)
            .oneshot(get("/builds/b1/bundle/"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn traversal_is_rejected_and_unknown_files_are_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        write_bundle(dir.path(), "b1");
        let app = build_router(state);

        let res = app
            .clone()
            .oneshot(get("/builds/b1/bundle/../../other/build.json"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(get("/builds/b1/bundle/missing.js"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app.oneshot(get("/builds/b1/build.json")).await.expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn open_net_record_widens_connect_src() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        write_bundle(dir.path(), "b2");
        let root = BuildLayout::new(dir.path(), "b2");
        std::fs::write(
            root.root().join("build.json"),
            json!({"id": "b2", "state": "pending_review", "networkPolicy": "OPEN_NET"}).to_string(),
        )
        .expect("record");

        let res = build_router(state)
            .oneshot(get("/builds/b2/bundle/index.html"))
            .await
            .expect("response");
        let csp = res.headers()["content-security-policy"]
            .to_str()
            .expect("ascii")
            .to_string();
        let connect = csp
            .split(';')
            .map(str::trim)
            .find(|d| d.starts_with("connect-src"))
            .expect("connect-src");
        assert!(connect.split(' ').any(|s| s == "https:"));
    }

    #[tokio::test]
    async fn submit_review_and_promote() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        let app = build_router(state);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/submit",
                json!({
                    "code": "document.body.textContent = 'hi';",
                    "title": "Greeter",
                    "authorUid": "author-1"
                }),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::CREATED);
        let build_id = body_json(res).await["buildId"]
            .as_str()
            .expect("build id")
            .to_string();

        let res = app
            .clone()
            .oneshot(post_json(&format!("/api/builds/{build_id}/promote"), json!({})))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .clone()
            .oneshot(post_json(
                &format!("/api/builds/{build_id}/review"),
                json!({"decision": "approve"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["state"], "approved");

        let res = app
            .clone()
            .oneshot(post_json(&format!("/api/builds/{build_id}/promote"), json!({})))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            body_json(res).await["publicUrl"],
            format!("/builds/{build_id}/bundle/")
        );

        let res = app
            .oneshot(get(&format!("/api/builds/{build_id}")))
            .await
            .expect("response");
        assert_eq!(body_json(res).await["state"], "published");
    }

    #[tokio::test]
    async fn review_outside_pending_review_conflicts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, builds) = test_state(dir.path());
        builds
            .create(BuildRecord::new("b3", chrono::Utc::now()))
            .await
            .expect("create");
        let res = build_router(state)
            .oneshot(post_json(
                "/api/builds/b3/review",
                json!({"decision": "reject", "reason": "uses eval"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(builds.get("b3").await.expect("get").state, BuildState::Queued);
    }

    #[tokio::test]
    async fn list_pages_builds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, builds) = test_state(dir.path());
        for id in ["b1", "b2", "b3"] {
            builds
                .create(BuildRecord::new(id, chrono::Utc::now()))
                .await
                .expect("create");
        }
        let res = build_router(state)
            .oneshot(get("/api/builds?limit=2"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let page = body_json(res).await;
        assert_eq!(page["items"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn unknown_build_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        let res = build_router(state)
            .oneshot(get("/api/builds/nope"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(res).await["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn ingest_rejects_paths_outside_uploads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, builds) = test_state(dir.path());
        let app = build_router(state);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/ingest",
                json!({"archive": "../secret.zip", "listingId": "l1", "authorUid": "a1"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .oneshot(post_json(
                "/api/ingest",
                json!({"archive": "missing.zip", "listingId": "l1", "authorUid": "a1"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(builds.list(None, 10).await.expect("list").items.is_empty());
    }

    #[tokio::test]
    async fn artifacts_report_preview() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _) = test_state(dir.path());
        write_bundle(dir.path(), "b4");
        let res = build_router(state)
            .oneshot(get("/api/builds/b4/artifacts"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["previewIndex"]["exists"], true);
    }
}
