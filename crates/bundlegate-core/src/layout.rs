//! On-disk layout of one build under the data root.
//!
//! ```text
//! <data>/builds/<id>/
//!   build.json lease.json policy.json llm.json bundle.tar.gz
//!   index.html app.js            (root-level copies some producers leave)
//!   build/                       (producer output)
//!   bundle/                      (canonical, promotion-ready)
//! ```

use std::path::{Path, PathBuf};

pub const BUILD_DIR: &str = "build";
pub const BUNDLE_DIR: &str = "bundle";
pub const INDEX_FILE: &str = "index.html";
pub const APP_FILE: &str = "app.js";
pub const BUNDLE_ARCHIVE: &str = "bundle.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    build_id: String,
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(data_root: impl AsRef<Path>, build_id: &str) -> Self {
        Self {
            build_id: build_id.to_string(),
            root: data_root.as_ref().join("builds").join(build_id),
        }
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join(BUILD_DIR)
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.root.join(BUNDLE_DIR)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(BUNDLE_ARCHIVE)
    }

    /// Storage key / URL path of `rel` relative to the build root.
    pub fn key(&self, rel: &str) -> String {
        format!("builds/{}/{}", self.build_id, rel.trim_start_matches('/'))
    }

    /// URL path under which `rel` is served locally.
    pub fn url(&self, rel: &str) -> String {
        format!("/{}", self.key(rel))
    }
}
