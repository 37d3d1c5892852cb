//! `manifest_v1.json` and the display metadata it is synthesized from.

use std::collections::BTreeMap;
use std::path::Path;

use bundlegate_state::{ListingTranslation, NetworkPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MANIFEST_FILE: &str = "manifest_v1.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const DEFAULT_ENTRY: &str = "app.js";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Entry point, display metadata and declared network needs of one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "policy")]
    pub network_policy: NetworkPolicy,
    #[serde(default)]
    pub network_domains: Vec<String>,
}

fn default_entry() -> String {
    DEFAULT_ENTRY.to_string()
}

impl Manifest {
    /// `OPEN_NET` only when external domains were recorded.
    pub fn synthesize(build_id: &str, metadata: &BundleMetadata, domains: Vec<String>) -> Self {
        let network_policy = if domains.is_empty() {
            NetworkPolicy::NoNet
        } else {
            NetworkPolicy::OpenNet
        };
        Self {
            id: build_id.to_string(),
            entry: default_entry(),
            name: metadata
                .name
                .clone()
                .unwrap_or_else(|| build_id.to_string()),
            description: metadata.description.clone().unwrap_or_default(),
            network_policy,
            network_domains: domains,
        }
    }

    /// Parse leniently; a missing or malformed file is `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read(path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn write(&self, path: &Path) -> ManifestResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Display metadata a project ships in `metadata.json` / `package.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translations: BTreeMap<String, ListingTranslation>,
}

fn pick_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn pick_strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| pick_string(Some(v))).collect())
        .unwrap_or_default()
}

fn read_object(path: &Path) -> Option<serde_json::Map<String, Value>> {
    let raw = std::fs::read(path).ok()?;
    match serde_json::from_slice(&raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Read `metadata.json` (root, `dist/`, `public/`), fill gaps from
/// `package.json`, and fall back to `fallback_name`.
pub fn read_bundle_metadata(project_dir: &Path, fallback_name: &str) -> BundleMetadata {
    let mut result = BundleMetadata::default();

    let raw = [
        project_dir.join(METADATA_FILE),
        project_dir.join("dist").join(METADATA_FILE),
        project_dir.join("public").join(METADATA_FILE),
    ]
    .iter()
    .find_map(|p| read_object(p));

    if let Some(meta) = raw {
        result.name = pick_string(meta.get("name").or_else(|| meta.get("title")));
        result.description = pick_string(meta.get("description"));
        result.tags = pick_strings(meta.get("tags"));
        if let Some(Value::Object(translations)) = meta.get("translations") {
            for (locale, value) in translations {
                let entry = ListingTranslation {
                    title: pick_string(value.get("title")),
                    description: pick_string(value.get("description")),
                };
                if entry.title.is_some() || entry.description.is_some() {
                    result.translations.insert(locale.clone(), entry);
                }
            }
        }
    }

    if result.name.is_none() || result.description.is_none() || result.tags.is_empty() {
        if let Some(pkg) = read_object(&project_dir.join("package.json")) {
            if result.name.is_none() {
                result.name = pick_string(pkg.get("displayName")).or_else(|| pick_string(pkg.get("name")));
            }
            if result.description.is_none() {
                result.description = pick_string(pkg.get("description"));
            }
            if result.tags.is_empty() {
                result.tags = pick_strings(pkg.get("keywords"));
            }
        }
    }

    if result.name.is_none() {
        result.name = Some(fallback_name.to_string());
    }
    result
}
