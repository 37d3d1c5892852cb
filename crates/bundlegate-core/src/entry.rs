//! Entrypoint (`app.js`) synthesis and external-domain detection over an
//! index document.

use std::io;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::csp::normalize_origins;
use crate::fsutil;
use crate::html::Document;
use crate::layout::{APP_FILE, INDEX_FILE};
use crate::vendor::is_remote_url;

fn external_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:src|href)\s*=\s*['"](https?:[^'"\s>]+)['"]"#).expect("regex is valid")
    })
}

/// Origins of every absolute `src`/`href` still present in `html`.
pub fn detect_external_domains(html: &str) -> Vec<String> {
    let urls: Vec<&str> = external_ref_re()
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    normalize_origins(&urls)
}

fn script_priority(src: &str, module: bool, crossorigin: bool) -> u8 {
    let name = src.rsplit('/').next().unwrap_or(src).to_ascii_lowercase();
    let mut score = 0;
    if module {
        score += 3;
    }
    if ["index", "main", "app"].iter().any(|n| name.contains(n)) {
        score += 2;
    }
    if crossorigin {
        score += 1;
    }
    score
}

/// Highest-priority local script referenced by `html`; first one wins ties.
pub fn pick_entry_script(html: &str) -> Option<String> {
    let doc = Document::parse(html);
    let mut best: Option<(u8, String)> = None;
    for idx in doc.find_tags("script") {
        let Some(tag) = doc.tag(idx) else { continue };
        let Some(src) = tag.attr("src").map(str::trim) else {
            continue;
        };
        if src.is_empty() || src.starts_with("//") || is_remote_url(src) {
            continue;
        }
        let rel = src.trim_start_matches("./").trim_start_matches('/');
        let rel = rel.split(['?', '#']).next().unwrap_or(rel).to_string();
        let module = tag
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("module"));
        let score = script_priority(&rel, module, tag.has_attr("crossorigin"));
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, rel));
        }
    }
    best.map(|(_, rel)| rel)
}

/// Make sure `dir/app.js` exists, pointing it at the best existing script.
///
/// Returns the relative path `app.js` imports, `Some("app.js")` when it was
/// already present, or `None` when the directory has no script to use.
pub fn ensure_app_js(dir: &Path) -> io::Result<Option<String>> {
    let app = dir.join(APP_FILE);
    if app.is_file() {
        return Ok(Some(APP_FILE.to_string()));
    }

    let referenced = std::fs::read_to_string(dir.join(INDEX_FILE))
        .ok()
        .and_then(|html| pick_entry_script(&html))
        .filter(|rel| fsutil::is_safe_relative(rel) && dir.join(rel).is_file());

    let target = match referenced {
        Some(rel) => Some(rel),
        None => {
            let scripts: Vec<String> = fsutil::list_files(dir)?
                .into_iter()
                .filter(|rel| rel.ends_with(".js"))
                .collect();
            scripts
                .iter()
                .find(|rel| rel.starts_with("assets/"))
                .or_else(|| scripts.first())
                .cloned()
        }
    };

    if let Some(rel) = &target {
        std::fs::write(&app, format!("import './{}';\n", rel))?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_origins() {
        let html = r#"<script src="https://cdn.example.com/a.js"></script>
<link href="HTTPS://Fonts.Example.com/css?family=x" rel="stylesheet">
<img src="./local.png"><a href="https://cdn.example.com/other">x</a>"#;
        assert_eq!(
            detect_external_domains(html),
            vec![
                "https://cdn.example.com".to_string(),
                "https://fonts.example.com".to_string()
            ]
        );
    }

    #[test]
    fn module_and_name_raise_priority() {
        let html = r#"<script src="./vendor.js"></script>
<script src="/assets/main-abc.js"></script>
<script type="module" src="./assets/chunk.js"></script>
<script src="https://cdn.example.com/index.js" type="module"></script>"#;
        assert_eq!(pick_entry_script(html).as_deref(), Some("assets/chunk.js"));

        let plain = r#"<script src="./vendor.js"></script><script src="./main.js?v=2"></script>"#;
        assert_eq!(pick_entry_script(plain).as_deref(), Some("main.js"));
        assert_eq!(pick_entry_script("<p>no scripts</p>"), None);
    }

    #[test]
    fn app_js_points_at_referenced_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("assets")).expect("mkdir");
        std::fs::write(
            dir.path().join(INDEX_FILE),
            r#"<script type="module" src="./assets/index-1.js"></script>"#,
        )
        .expect("write");
        std::fs::write(dir.path().join("assets/index-1.js"), "run()").expect("write");

        let target = ensure_app_js(dir.path()).expect("ensure");
        assert_eq!(target.as_deref(), Some("assets/index-1.js"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join(APP_FILE)).expect("read"),
            "import './assets/index-1.js';\n"
        );
    }

    #[test]
    fn app_js_falls_back_to_assets_then_anything() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("assets")).expect("mkdir");
        std::fs::write(dir.path().join(INDEX_FILE), "<p>static</p>").expect("write");
        std::fs::write(dir.path().join("a.js"), "").expect("write");
        std::fs::write(dir.path().join("assets/z.js"), "").expect("write");
        assert_eq!(ensure_app_js(dir.path()).expect("ensure").as_deref(), Some("assets/z.js"));

        let bare = tempfile::tempdir().expect("tempdir");
        std::fs::write(bare.path().join("b.js"), "").expect("write");
        assert_eq!(ensure_app_js(bare.path()).expect("ensure").as_deref(), Some("b.js"));

        let empty = tempfile::tempdir().expect("tempdir");
        assert_eq!(ensure_app_js(empty.path()).expect("ensure"), None);
        assert!(!empty.path().join(APP_FILE).exists());
    }
}
