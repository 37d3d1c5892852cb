//! Transform report types and errors.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::vendor::VendoredResource;

/// File name used when a report is persisted next to the index document.
pub const TRANSFORM_REPORT_FILE: &str = "transform_report_v1.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineScriptReport {
    pub file_name: String,
    pub hash: String,
    pub size: u64,
    pub module: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineStyleReport {
    pub tag: String,
    /// `attribute` or `tag#<n>`.
    pub location: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineEventHandlerReport {
    pub tag: String,
    pub attribute: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleBundleReport {
    pub created: bool,
    pub inputs: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformReport {
    pub changed: bool,
    pub base_removed: bool,
    pub inline_scripts: Vec<InlineScriptReport>,
    pub total_inline_scripts: usize,
    pub inline_styles: Vec<InlineStyleReport>,
    pub total_inline_styles: usize,
    pub inline_event_handlers: Vec<InlineEventHandlerReport>,
    pub vendored: Vec<VendoredResource>,
    pub module_bundle: ModuleBundleReport,
    pub warnings: Vec<String>,
}

impl TransformReport {
    /// Warnings produced by failed vendoring attempts.
    pub fn vendor_failures(&self) -> impl Iterator<Item = &str> {
        self.warnings
            .iter()
            .filter(|w| w.starts_with("vendor_failed:"))
            .map(String::as_str)
    }

    /// Persist as pretty JSON at `path`.
    pub fn write_to(&self, path: &Path) -> TransformResult<()> {
        bundlegate_state::write_json_atomic(path, self)
            .map_err(|e| TransformError::Report(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("inline_event_handlers_detected ({count} handler(s))")]
    InlineEventHandlers { count: usize },

    #[error("failed to write transform report: {0}")]
    Report(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::InlineEventHandlers { .. } => "inline_event_handlers_detected",
            TransformError::Report(_) => "transform_report_failed",
            TransformError::Io(_) => "transform_io_failed",
        }
    }
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;
