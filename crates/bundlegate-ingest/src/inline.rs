//! Inline submissions: a single pasted document or module, no archive.
//!
//! Full HTML documents become `index.html` as-is. Anything else is treated
//! as module code, stored as `app.js` and loaded from a minimal wrapper
//! document. Inline submissions never declare network access.

use std::path::Path;

use bundlegate_core::layout::{APP_FILE, INDEX_FILE};
use bundlegate_core::manifest::MANIFEST_FILE;
use bundlegate_core::transform::TRANSFORM_REPORT_FILE;
use bundlegate_core::{ensure_app_js, obs, BuildLayout, BundleMetadata, Manifest, TransformReport};
use bundlegate_state::{
    advance, BuildPatch, BuildRecord, BuildState, ListingUpsert, NetworkPolicy,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};

use crate::error::{IngestError, IngestResult};
use crate::worker::{IngestWorker, WORKER_OWNER};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineSubmission {
    pub code: String,
    pub title: String,
    pub author_uid: String,
    /// Existing listing to attach a new version to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineOutcome {
    pub build_id: String,
    pub listing_id: String,
    pub slug: String,
    pub version: u32,
    pub report: TransformReport,
}

/// `<!doctype html` (any case) or `<html` at the start.
pub fn is_html_document(code: &str) -> bool {
    let head: String = code.trim_start().chars().take(16).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Minimal document that loads `app.js` as a module.
pub fn wrapper_document(title: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n<div id=\"root\"></div>\n\
         <script type=\"module\" src=\"./{}\"></script>\n</body>\n</html>\n",
        escape_html(title),
        APP_FILE
    )
}

/// Store, transform and queue an inline submission for review.
pub async fn submit_inline(
    worker: &IngestWorker,
    submission: InlineSubmission,
) -> IngestResult<InlineOutcome> {
    if submission.code.trim().is_empty() {
        return Err(IngestError::InvalidInput("code is empty".to_string()));
    }
    if submission.title.trim().is_empty() {
        return Err(IngestError::InvalidInput("title is empty".to_string()));
    }
    let build_id = uuid::Uuid::new_v4().to_string();
    submit_as(worker, &build_id, submission)
        .instrument(obs::build_span(&build_id))
        .await
}

async fn submit_as(
    worker: &IngestWorker,
    build_id: &str,
    submission: InlineSubmission,
) -> IngestResult<InlineOutcome> {
    let layout = BuildLayout::new(&worker.config().data_root, build_id);
    let build_dir = layout.build_dir();
    tokio::fs::create_dir_all(&build_dir).await?;

    let index = build_dir.join(INDEX_FILE);
    if is_html_document(&submission.code) {
        tokio::fs::write(&index, &submission.code).await?;
    } else {
        tokio::fs::write(build_dir.join(APP_FILE), &submission.code).await?;
        tokio::fs::write(&index, wrapper_document(&submission.title)).await?;
    }

    let report = worker.transformer().transform(&index).await?;

    let (dir, id, title) = (build_dir.clone(), build_id.to_string(), submission.title.clone());
    let report = tokio::task::spawn_blocking(move || seal_build_dir(&dir, &id, &title, report))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))??;

    let builds = worker.builds();
    builds.create(BuildRecord::new(build_id, Utc::now())).await?;
    let listing = worker
        .listings()
        .upsert(ListingUpsert {
            listing_id: submission.listing_id.clone(),
            title: submission.title.clone(),
            author_uid: submission.author_uid.clone(),
            build_id: build_id.to_string(),
            ..ListingUpsert::default()
        })
        .await?;
    let patch = BuildPatch::state(BuildState::PendingReview)
        .with_network_policy(NetworkPolicy::NoNet, "inline submission")
        .with_listing(&listing.listing_id);
    advance(builds, build_id, WORKER_OWNER, patch).await?;
    obs::emit_build_transition(
        build_id,
        BuildState::Queued.as_str(),
        BuildState::PendingReview.as_str(),
    );
    info!(event = "inline.submitted", build_id = %build_id, slug = %listing.slug);

    Ok(InlineOutcome {
        build_id: build_id.to_string(),
        listing_id: listing.listing_id,
        slug: listing.slug,
        version: listing.version,
        report,
    })
}

/// Write the report and manifest next to the transformed document.
fn seal_build_dir(
    build_dir: &Path,
    build_id: &str,
    title: &str,
    report: TransformReport,
) -> IngestResult<TransformReport> {
    report.write_to(&build_dir.join(TRANSFORM_REPORT_FILE))?;
    if ensure_app_js(build_dir)?.is_none() {
        std::fs::write(build_dir.join(APP_FILE), "")?;
    }

    let metadata = BundleMetadata {
        name: Some(title.to_string()),
        ..BundleMetadata::default()
    };
    Manifest::synthesize(build_id, &metadata, Vec::new()).write(&build_dir.join(MANIFEST_FILE))?;
    Ok(report)
}
