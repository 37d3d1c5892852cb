//! bundlegate-core: turning untrusted front-end output into CSP-safe bundles
//!
//! Everything between "a producer wrote some files" and "the browser gets
//! them with the right headers".
//!
//! ## Key Components
//!
//! - `vendor`: budgeted, content-addressed download of remote scripts/styles
//! - `transform`: the HTML sandboxing rewrite and its [`TransformReport`]
//! - `bundler`: module bundling seam (`esbuild` in production)
//! - `csp`: per-request CSP / Permissions-Policy synthesis
//! - `promote`: canonicalization of `build/` + `bundle/` and upload
//! - `artifacts`: existence view over a build's side-files
//! - `obs` / `telemetry`: structured tracing events and subscriber setup
//! - `fakes`: in-memory fetcher, bundler and object store for tests

pub mod archive;
pub mod artifacts;
pub mod bundler;
pub mod config;
pub mod csp;
pub mod digest;
pub mod entry;
pub mod fakes;
pub mod fsutil;
pub mod html;
pub mod layout;
pub mod manifest;
pub mod obs;
pub mod promote;
pub mod storage;
pub mod telemetry;
pub mod transform;
pub mod vendor;

pub use artifacts::{ArtifactRef, BuildArtifacts};
pub use bundler::{BundleOutput, BundleRequest, BundlerError, EsbuildBundler, ModuleBundler};
pub use config::{
    data_root_from_env, CspConfig, PublishConfig, StorageDriver, TransformOptions, VendorConfig,
};
pub use csp::{
    build_csp, headers_for_build, synthesize_headers, HeaderInputs, PermissionsPolicy,
    SecurityHeaders,
};
pub use entry::{detect_external_domains, ensure_app_js};
pub use layout::BuildLayout;
pub use manifest::{read_bundle_metadata, BundleMetadata, Manifest, ManifestError};
pub use promote::{PromoteError, PromoteOutcome, PromoteResult, Promoter};
pub use storage::{HttpObjectStore, ObjectMetadata, ObjectStore, StorageError};
pub use telemetry::init_tracing;
pub use transform::{HtmlTransformer, TransformError, TransformReport};
pub use vendor::{
    HttpFetcher, ResourceFetcher, TransformSession, UnavailableFetcher, VendorError, VendorKind,
    VendoredResource,
};
