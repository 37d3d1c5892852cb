//! Structured observability hooks for bundle pipeline events.
//!
//! - `BuildSpan` RAII guard tags every event with the build id; async code
//!   instruments its futures with `build_span` instead
//! - `emit_*` functions give each lifecycle event a stable `event` name
//!
//! Filter with `RUST_LOG`; set `BUNDLEGATE_LOG_FORMAT=json` for JSON lines.

use tracing::{info, warn};

use crate::transform::TransformReport;

/// RAII guard that enters a build-scoped span.
///
/// ```ignore
/// let _span = BuildSpan::enter("build-42");
/// // every event below carries build_id = "build-42"
/// ```
pub struct BuildSpan {
    _span: tracing::span::EnteredSpan,
}

impl BuildSpan {
    pub fn enter(build_id: &str) -> Self {
        Self {
            _span: build_span(build_id).entered(),
        }
    }
}

/// The same span for `.instrument(..)`; an entered guard must not be held
/// across `.await` in a task that has to be `Send`.
pub fn build_span(build_id: &str) -> tracing::Span {
    tracing::info_span!("bundlegate.build", build_id = %build_id)
}

pub fn emit_vendored(url: &str, local_path: &str, bytes: u64) {
    info!(event = "vendor.stored", url = %url, local_path = %local_path, bytes = bytes);
}

pub fn emit_vendor_failed(url: &str, code: &str) {
    warn!(event = "vendor.failed", url = %url, code = %code);
}

/// Summary of one transform run.
pub fn emit_transform_finished(index: &str, report: &TransformReport) {
    info!(
        event = "transform.finished",
        index = %index,
        changed = report.changed,
        base_removed = report.base_removed,
        inline_scripts = report.total_inline_scripts,
        inline_styles = report.total_inline_styles,
        event_handlers = report.inline_event_handlers.len(),
        vendored = report.vendored.len(),
        module_bundle = report.module_bundle.created,
        warnings = report.warnings.len(),
    );
}

pub fn emit_module_bundle_failed(error: &dyn std::fmt::Display) {
    warn!(event = "transform.module_bundle_failed", error = %error);
}

pub fn emit_build_transition(build_id: &str, from: &str, to: &str) {
    info!(event = "build.transition", build_id = %build_id, from = %from, to = %to);
}

pub fn emit_promotion_finished(build_id: &str, public_url: &str, uploaded_files: usize) {
    info!(
        event = "promotion.finished",
        build_id = %build_id,
        public_url = %public_url,
        uploaded_files = uploaded_files,
    );
}

pub fn emit_promotion_failed(build_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "promotion.failed", build_id = %build_id, error = %error);
}

pub fn emit_job_started(job_id: &str, build_id: &str, attempt: u32) {
    info!(event = "job.started", job_id = %job_id, build_id = %build_id, attempt = attempt);
}

pub fn emit_job_finished(job_id: &str, build_id: &str, ok: bool, duration_ms: u64) {
    if ok {
        info!(event = "job.finished", job_id = %job_id, build_id = %build_id, duration_ms = duration_ms);
    } else {
        warn!(event = "job.failed", job_id = %job_id, build_id = %build_id, duration_ms = duration_ms);
    }
}
