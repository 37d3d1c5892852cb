//! Existence view over a build's artifacts, probed fresh on every call.

use serde::{Deserialize, Serialize};

use crate::layout::{BuildLayout, BUNDLE_ARCHIVE, INDEX_FILE};
use crate::manifest::MANIFEST_FILE;
use crate::storage::ObjectStore;
use crate::transform::TRANSFORM_REPORT_FILE;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifacts {
    pub ast_summary: ArtifactRef,
    pub manifest: ArtifactRef,
    pub llm_report: ArtifactRef,
    pub bundle: ArtifactRef,
    pub imports: ArtifactRef,
    pub transform_plan: ArtifactRef,
    pub transform_report: ArtifactRef,
    pub preview_index: ArtifactRef,
}

/// Probe a build-relative path locally, then in `store` when given.
async fn probe(layout: &BuildLayout, rel: &str, store: Option<&dyn ObjectStore>) -> ArtifactRef {
    if tokio::fs::try_exists(layout.root().join(rel)).await.unwrap_or(false) {
        return ArtifactRef {
            exists: true,
            url: Some(layout.url(rel)),
        };
    }
    if let Some(store) = store {
        let key = layout.key(rel);
        match store.exists(&key).await {
            Ok(true) => {
                return ArtifactRef {
                    exists: true,
                    url: Some(store.public_url(&key)),
                }
            }
            Ok(false) => {}
            Err(err) => {
                tracing::debug!(event = "artifacts.probe_failed", key = %key, error = %err);
            }
        }
    }
    ArtifactRef::default()
}

async fn first_existing(
    layout: &BuildLayout,
    candidates: &[&str],
    store: Option<&dyn ObjectStore>,
) -> ArtifactRef {
    for rel in candidates {
        let found = probe(layout, rel, store).await;
        if found.exists {
            return found;
        }
    }
    ArtifactRef::default()
}

impl BuildArtifacts {
    pub async fn probe(layout: &BuildLayout, store: Option<&dyn ObjectStore>) -> Self {
        let build = |name: &str| format!("build/{}", name);
        let bundle_index = format!("bundle/{}", INDEX_FILE);
        let build_index = build(INDEX_FILE);
        Self {
            ast_summary: probe(layout, &build("AST_SUMMARY.json"), store).await,
            manifest: probe(layout, &build(MANIFEST_FILE), store).await,
            llm_report: probe(layout, "llm.json", store).await,
            bundle: first_existing(layout, &[BUNDLE_ARCHIVE, bundle_index.as_str()], store).await,
            imports: probe(layout, &build("imports_v1.json"), store).await,
            transform_plan: probe(layout, &build("transform_plan_v1.json"), store).await,
            transform_report: probe(layout, &build(TRANSFORM_REPORT_FILE), store).await,
            preview_index: first_existing(layout, &[bundle_index.as_str(), build_index.as_str()], store).await,
        }
    }
}
