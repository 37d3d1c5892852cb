//! Runtime configuration for the transform, header synthesis and promotion.
//!
//! Every struct has a `Default` suitable for tests and a `from_env()` reading
//! the deployment environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Limits for downloading third-party resources during one transform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorConfig {
    pub enabled: bool,
    /// Budget shared by every download of a single transform run.
    pub max_total_bytes: u64,
    /// Per-download wall-clock limit (milliseconds).
    pub timeout_ms: u64,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_total_bytes: 20 * MIB,
            timeout_ms: 15_000,
        }
    }
}

impl VendorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("BUNDLEGATE_VENDOR", defaults.enabled),
            max_total_bytes: env_u64("PUBLISH_VENDOR_MAX_MB", defaults.max_total_bytes / MIB) * MIB,
            timeout_ms: env_u64("PUBLISH_VENDOR_TIMEOUT_MS", defaults.timeout_ms),
        }
    }
}

/// Toggles for the HTML sandboxing transform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransformOptions {
    pub extract_inline_scripts: bool,
    pub extract_inline_styles: bool,
    pub bundle_modules: bool,
    pub vendor: VendorConfig,
    /// Abort on the first `on*` attribute.
    pub strict: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            extract_inline_scripts: true,
            extract_inline_styles: false,
            bundle_modules: true,
            vendor: VendorConfig::default(),
            strict: false,
        }
    }
}

impl TransformOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            extract_inline_scripts: env_bool(
                "BUNDLEGATE_EXTRACT_INLINE_SCRIPTS",
                defaults.extract_inline_scripts,
            ),
            extract_inline_styles: env_bool(
                "BUNDLEGATE_EXTRACT_INLINE_STYLES",
                defaults.extract_inline_styles,
            ),
            bundle_modules: env_bool("BUNDLEGATE_BUNDLE_MODULES", defaults.bundle_modules),
            vendor: VendorConfig::from_env(),
            strict: env_bool("PUBLISH_CSP_AUTOFIX_STRICT", defaults.strict),
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_vendor(mut self, vendor: VendorConfig) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_style_extraction(mut self, enabled: bool) -> Self {
        self.extract_inline_styles = enabled;
        self
    }

    pub fn with_module_bundling(mut self, enabled: bool) -> Self {
        self.bundle_modules = enabled;
        self
    }
}

// ---------------------------------------------------------------------------
// Header synthesis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CspConfig {
    /// Platform front-end origin(s), comma separated.
    pub web_base: String,
    /// Outside production the local dev origins may frame builds.
    pub production: bool,
    /// Allow module imports from the esm CDN.
    pub allow_cdn: bool,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            web_base: "http://localhost:3000".to_string(),
            production: false,
            allow_cdn: false,
        }
    }
}

impl CspConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            web_base: std::env::var("WEB_BASE").unwrap_or(defaults.web_base),
            production: std::env::var("BUNDLEGATE_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            allow_cdn: env_bool("EXTERNAL_HTTP_ESM", defaults.allow_cdn),
        }
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Where promoted bundles end up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageDriver {
    /// Serve straight from the data directory.
    Local,
    /// PUT every object under `upload_url`.
    Http { upload_url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishConfig {
    pub storage: StorageDriver,
    /// Keep local directories after a remote upload.
    pub keep_local_bundle: bool,
    /// Run the sandboxing transform during promotion.
    pub autofix: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            storage: StorageDriver::Local,
            keep_local_bundle: false,
            autofix: true,
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        let storage = match std::env::var("STORAGE_DRIVER").as_deref() {
            Ok("http") => StorageDriver::Http {
                upload_url: std::env::var("STORAGE_UPLOAD_URL").unwrap_or_default(),
            },
            _ => StorageDriver::Local,
        };
        Self {
            storage,
            keep_local_bundle: env_bool("KEEP_LOCAL_BUNDLE", false),
            autofix: env_bool("PUBLISH_CSP_AUTOFIX", true),
        }
    }
}

/// Root directory for builds, deployments, listings and logs.
pub fn data_root_from_env() -> PathBuf {
    std::env::var("BUNDLEGATE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".bundlegate"))
}
