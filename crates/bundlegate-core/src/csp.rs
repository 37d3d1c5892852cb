//! Security headers for files served out of a build.
//!
//! Everything here is a pure function of three small side-files:
//!
//! - `build.json`: the record's `networkPolicy`, when set
//! - `manifest_v1.json` (in `build/`, else `bundle/`): policy and declared domains
//! - `policy.json`: opt-in browser capabilities
//!
//! Missing or malformed files fall back to the most restrictive defaults.

use std::path::Path;

use bundlegate_state::{NetworkPolicy, BUILD_RECORD_FILE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CspConfig;
use crate::layout::BuildLayout;
use crate::manifest::Manifest;

pub const POLICY_FILE: &str = "policy.json";

const CDN_ORIGIN: &str = "https://esm.sh";
const STRIPE_SCRIPT_ORIGINS: [&str; 1] = ["https://js.stripe.com"];
const STRIPE_CONNECT_ORIGINS: [&str; 1] = ["https://api.stripe.com"];
const STRIPE_FRAME_ORIGINS: [&str; 2] = ["https://js.stripe.com", "https://m.stripe.network"];
const DEV_FRAME_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Browser capabilities a reviewer granted to one build. Everything defaults to denied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionsPolicy {
    pub camera: bool,
    pub microphone: bool,
    pub geolocation: bool,
    pub clipboard_read: bool,
    pub clipboard_write: bool,
}

impl PermissionsPolicy {
    pub fn load(path: &Path) -> Self {
        std::fs::read(path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }

    /// `camera=(self), microphone=(), ...`
    pub fn header_value(&self) -> String {
        let grant = |allowed: bool| if allowed { "(self)" } else { "()" };
        [
            ("camera", self.camera),
            ("microphone", self.microphone),
            ("geolocation", self.geolocation),
            ("clipboard-read", self.clipboard_read),
            ("clipboard-write", self.clipboard_write),
        ]
        .iter()
        .map(|(name, allowed)| format!("{}={}", name, grant(*allowed)))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Everything header synthesis needs to know about one build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInputs {
    pub network_policy: NetworkPolicy,
    pub network_domains: Vec<String>,
    pub permissions: PermissionsPolicy,
}

impl HeaderInputs {
    /// Read the side-files of the build rooted at `layout`.
    pub fn load(layout: &BuildLayout) -> Self {
        let manifest = [layout.build_dir(), layout.bundle_dir()]
            .iter()
            .find_map(|dir| Manifest::load(&dir.join(crate::manifest::MANIFEST_FILE)));
        let record_policy = record_network_policy(&layout.root().join(BUILD_RECORD_FILE));

        let network_policy = record_policy
            .or_else(|| manifest.as_ref().map(|m| m.network_policy))
            .unwrap_or_default();
        Self {
            network_policy,
            network_domains: manifest.map(|m| m.network_domains).unwrap_or_default(),
            permissions: PermissionsPolicy::load(&layout.root().join(POLICY_FILE)),
        }
    }
}

fn record_network_policy(path: &Path) -> Option<NetworkPolicy> {
    let raw = std::fs::read(path).ok()?;
    let value: Value = serde_json::from_slice(&raw).ok()?;
    serde_json::from_value(value.get("networkPolicy")?.clone()).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityHeaders {
    pub content_security_policy: String,
    pub permissions_policy: String,
}

impl SecurityHeaders {
    pub const REFERRER_POLICY: &'static str = "no-referrer";

    /// Header name/value pairs in emission order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Security-Policy", self.content_security_policy.clone()),
            ("Permissions-Policy", self.permissions_policy.clone()),
            ("Referrer-Policy", Self::REFERRER_POLICY.to_string()),
            ("X-Content-Type-Options", "nosniff".to_string()),
            ("Vary", "Origin".to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Origins
// ---------------------------------------------------------------------------

fn has_scheme(value: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|s| value.len() >= s.len() && value[..s.len()].eq_ignore_ascii_case(s))
}

/// Normalise a declared domain to `scheme://host[:port]`.
///
/// Bare hosts are assumed `https://`; `*.example.com` wildcards are kept.
pub fn normalize_origin(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    if candidate.contains('*') {
        let (scheme, rest) = candidate.split_once("://")?;
        let host = rest.split(['/', '?', '#']).next()?.to_ascii_lowercase();
        let valid = host.starts_with("*.")
            && host.len() > 2
            && host[2..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
        return valid.then(|| format!("{}://{}", scheme.to_ascii_lowercase(), host));
    }

    let url = Url::parse(&candidate).ok()?;
    url.host_str()?;
    let origin = url.origin().ascii_serialization();
    (origin != "null").then_some(origin)
}

/// Normalise, drop invalid entries and collapse duplicates (first one wins).
pub fn normalize_origins<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for origin in values.iter().filter_map(|v| normalize_origin(v.as_ref())) {
        if !out.contains(&origin) {
            out.push(origin);
        }
    }
    out
}

/// `'self'`, the platform front-end origin(s), and local dev origins outside production.
pub fn frame_ancestors(config: &CspConfig) -> Vec<String> {
    let mut sources = vec!["'self'".to_string()];
    let web_bases: Vec<&str> = config.web_base.split(',').collect();
    let mut candidates = normalize_origins(&web_bases[..]);
    if !config.production {
        candidates.extend(DEV_FRAME_ORIGINS.iter().map(|s| s.to_string()));
    }
    for origin in candidates {
        if !sources.contains(&origin) {
            sources.push(origin);
        }
    }
    sources
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

fn push_unique(list: &mut Vec<String>, values: impl IntoIterator<Item = impl Into<String>>) {
    for value in values {
        let value = value.into();
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

fn directive(name: &str, sources: &[String]) -> String {
    format!("{} {}", name, sources.join(" ")).trim().to_string()
}

/// Build the `Content-Security-Policy` value.
pub fn build_csp(policy: NetworkPolicy, domains: &[String], config: &CspConfig) -> String {
    let domains = normalize_origins(domains);
    let open_net: Vec<String> = match policy {
        NetworkPolicy::OpenNet if domains.is_empty() => vec!["https:".to_string()],
        NetworkPolicy::OpenNet => domains,
        NetworkPolicy::NoNet | NetworkPolicy::MediaOnly => Vec::new(),
    };

    let mut script_src = vec!["'self'".to_string(), "blob:".to_string()];
    push_unique(&mut script_src, STRIPE_SCRIPT_ORIGINS);
    let mut style_src = vec!["'self'".to_string(), "'unsafe-inline'".to_string()];
    let mut connect_src = vec!["'self'".to_string(), "blob:".to_string()];
    push_unique(&mut connect_src, STRIPE_CONNECT_ORIGINS);
    if config.allow_cdn {
        push_unique(&mut script_src, [CDN_ORIGIN]);
        push_unique(&mut style_src, [CDN_ORIGIN]);
        push_unique(&mut connect_src, [CDN_ORIGIN]);
    }
    push_unique(&mut script_src, open_net.iter().cloned());
    push_unique(&mut style_src, open_net.iter().cloned());
    push_unique(&mut connect_src, open_net.iter().cloned());

    let media: Vec<String> = if policy.allows_media() {
        vec!["*".into(), "data:".into(), "blob:".into()]
    } else {
        vec!["'self'".into(), "data:".into(), "blob:".into()]
    };
    let mut frame_src = vec!["'self'".to_string()];
    push_unique(&mut frame_src, STRIPE_FRAME_ORIGINS);

    [
        "default-src 'self'".to_string(),
        directive("script-src", &script_src),
        directive("style-src", &style_src),
        directive("img-src", &media),
        directive("media-src", &media),
        directive("connect-src", &connect_src),
        "font-src 'self' data:".to_string(),
        directive("frame-src", &frame_src),
        directive("frame-ancestors", &frame_ancestors(config)),
        "base-uri 'none'".to_string(),
        "object-src 'none'".to_string(),
    ]
    .join("; ")
}

pub fn synthesize_headers(inputs: &HeaderInputs, config: &CspConfig) -> SecurityHeaders {
    SecurityHeaders {
        content_security_policy: build_csp(inputs.network_policy, &inputs.network_domains, config),
        permissions_policy: inputs.permissions.header_value(),
    }
}

/// Load the side-files of `layout` and synthesize its headers.
pub fn headers_for_build(layout: &BuildLayout, config: &CspConfig) -> SecurityHeaders {
    synthesize_headers(&HeaderInputs::load(layout), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BundleMetadata, MANIFEST_FILE};

    fn directive_of<'a>(csp: &'a str, name: &str) -> &'a str {
        csp.split("; ")
            .find(|d| d.starts_with(&format!("{} ", name)))
            .unwrap_or_else(|| panic!("missing directive {}", name))
    }

    #[test]
    fn open_net_with_domains_lists_them() {
        let csp = build_csp(
            NetworkPolicy::OpenNet,
            &["https://api.example.com/v1".to_string()],
            &CspConfig::default(),
        );
        let connect = directive_of(&csp, "connect-src");
        assert!(connect.contains("https://api.example.com"));
        assert!(!connect.split(' ').any(|s| s == "https:"));
    }

    #[test]
    fn open_net_without_domains_uses_blanket_https() {
        let csp = build_csp(NetworkPolicy::OpenNet, &[], &CspConfig::default());
        assert!(directive_of(&csp, "connect-src").split(' ').any(|s| s == "https:"));
        assert!(directive_of(&csp, "script-src").split(' ').any(|s| s == "https:"));
    }

    #[test]
    fn no_net_is_closed() {
        let csp = build_csp(NetworkPolicy::NoNet, &["https://x.com".to_string()], &CspConfig::default());
        assert_eq!(directive_of(&csp, "img-src"), "img-src 'self' data: blob:");
        assert_eq!(
            directive_of(&csp, "connect-src"),
            "connect-src 'self' blob: https://api.stripe.com"
        );
        assert!(csp.contains("base-uri 'none'"));
        assert!(csp.contains("object-src 'none'"));
    }

    #[test]
    fn media_only_opens_media() {
        let csp = build_csp(NetworkPolicy::MediaOnly, &[], &CspConfig::default());
        assert_eq!(directive_of(&csp, "media-src"), "media-src * data: blob:");
        assert!(!directive_of(&csp, "connect-src").contains("https:"));
    }

    #[test]
    fn frame_ancestors_production_vs_dev() {
        let dev = CspConfig {
            web_base: "https://app.example.com/path".to_string(),
            production: false,
            allow_cdn: false,
        };
        assert_eq!(
            frame_ancestors(&dev),
            vec![
                "'self'",
                "https://app.example.com",
                "http://localhost:3000",
                "http://127.0.0.1:3000"
            ]
        );
        let prod = CspConfig {
            production: true,
            ..dev
        };
        assert_eq!(frame_ancestors(&prod), vec!["'self'", "https://app.example.com"]);
    }

    #[test]
    fn cdn_flag_adds_esm() {
        let config = CspConfig {
            allow_cdn: true,
            ..CspConfig::default()
        };
        let csp = build_csp(NetworkPolicy::NoNet, &[], &config);
        assert!(directive_of(&csp, "script-src").contains(CDN_ORIGIN));
    }

    #[test]
    fn origin_normalisation() {
        assert_eq!(normalize_origin("api.example.com").as_deref(), Some("https://api.example.com"));
        assert_eq!(
            normalize_origin("HTTP://Example.com:8080/x?y").as_deref(),
            Some("http://example.com:8080")
        );
        assert_eq!(normalize_origin("*.cdn.example.com").as_deref(), Some("https://*.cdn.example.com"));
        assert_eq!(normalize_origin("   "), None);
        assert_eq!(normalize_origin("http://exa mple.com"), None);
        assert_eq!(
            normalize_origins(&["a.com", "https://a.com/x", "b.com"]),
            vec!["https://a.com", "https://b.com"]
        );
    }

    #[test]
    fn permissions_default_denied() {
        assert_eq!(
            PermissionsPolicy::default().header_value(),
            "camera=(), microphone=(), geolocation=(), clipboard-read=(), clipboard-write=()"
        );
        let granted = PermissionsPolicy {
            camera: true,
            clipboard_write: true,
            ..PermissionsPolicy::default()
        };
        assert!(granted.header_value().starts_with("camera=(self), microphone=()"));
        assert!(granted.header_value().ends_with("clipboard-write=(self)"));
    }

    #[test]
    fn inputs_prefer_record_then_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = BuildLayout::new(dir.path(), "b1");

        // nothing on disk
        let inputs = HeaderInputs::load(&layout);
        assert_eq!(inputs, HeaderInputs::default());

        let manifest = Manifest::synthesize(
            "b1",
            &BundleMetadata::default(),
            vec!["https://api.example.com".to_string()],
        );
        manifest
            .write(&layout.bundle_dir().join(MANIFEST_FILE))
            .expect("manifest");
        std::fs::write(layout.root().join(POLICY_FILE), r#"{"camera":true}"#).expect("policy");
        let inputs = HeaderInputs::load(&layout);
        assert_eq!(inputs.network_policy, NetworkPolicy::OpenNet);
        assert_eq!(inputs.network_domains, vec!["https://api.example.com".to_string()]);
        assert!(inputs.permissions.camera);

        std::fs::write(layout.root().join(BUILD_RECORD_FILE), r#"{"networkPolicy":"MEDIA_ONLY"}"#)
            .expect("record");
        assert_eq!(HeaderInputs::load(&layout).network_policy, NetworkPolicy::MediaOnly);

        let headers = headers_for_build(&layout, &CspConfig::default());
        let pairs = headers.pairs();
        assert_eq!(pairs[2], ("Referrer-Policy", "no-referrer".to_string()));
        assert!(headers.content_security_policy.contains("base-uri 'none'"));
    }

    #[test]
    fn malformed_side_files_fall_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = BuildLayout::new(dir.path(), "b2");
        std::fs::create_dir_all(layout.build_dir()).expect("mkdir");
        std::fs::write(layout.build_dir().join(MANIFEST_FILE), "{{{").expect("write");
        std::fs::write(layout.root().join(POLICY_FILE), "[]").expect("write");
        std::fs::write(layout.root().join(BUILD_RECORD_FILE), r#"{"networkPolicy":"WIDE_OPEN"}"#)
            .expect("write");
        assert_eq!(HeaderInputs::load(&layout), HeaderInputs::default());
    }
}
