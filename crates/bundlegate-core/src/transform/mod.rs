//! HTML sandboxing transform.
//!
//! Rewrites one index document in place so it can run under a strict CSP:
//!
//! - root-relative references become document-relative
//! - `<base>` tags are removed
//! - inline `on*` handlers and `style` attributes are linted (strict mode aborts)
//! - inline `<style>` blocks are recorded or spilled to `.css` files
//! - remote scripts and stylesheets are vendored into `vendor/`
//! - inline scripts are spilled to content-addressed files
//! - module scripts are bundled into a single deferred `app.js`
//!
//! Vendoring and bundling failures are downgraded to report warnings.

mod report;
mod rewrite;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use report::{
    InlineEventHandlerReport, InlineScriptReport, InlineStyleReport, ModuleBundleReport,
    TransformError, TransformReport, TransformResult, TRANSFORM_REPORT_FILE,
};
pub use rewrite::{relativize_root_paths, strip_base_tags};

use crate::bundler::{BundleRequest, EsbuildBundler, ModuleBundler};
use crate::config::TransformOptions;
use crate::digest::{short_hash, INLINE_HASH_LEN};
use crate::html::{Document, Node, Tag};
use crate::obs;
use crate::vendor::{default_fetcher, is_remote_url, ResourceFetcher, TransformSession, VendorKind};

const HANDLER_SNIPPET_LEN: usize = 80;
const STYLE_SNIPPET_LEN: usize = 120;
const BUNDLE_SCRATCH_DIR: &str = "__csp_bundle";
const BUNDLE_ENTRY_FILE: &str = "__entry.js";
const BUNDLE_OUTPUT_FILE: &str = "app.js";
const PRELOAD_RELS: [&str; 3] = ["stylesheet", "preload", "modulepreload"];

/// Script `type` values that browsers execute as classic scripts.
const CLASSIC_SCRIPT_TYPES: [&str; 5] = [
    "",
    "text/javascript",
    "application/javascript",
    "text/ecmascript",
    "application/ecmascript",
];

fn snippet(value: &str, max_chars: usize) -> String {
    value.trim().chars().take(max_chars).collect()
}

fn is_event_handler(name: &str) -> bool {
    name.len() > 2
        && name.starts_with("on")
        && name[2..].chars().all(|c| c.is_ascii_lowercase())
}

struct ModuleEntry {
    node: usize,
    source: String,
}

/// Runs the sandboxing transform; one [`TransformSession`] per call.
#[derive(Clone)]
pub struct HtmlTransformer {
    fetcher: Arc<dyn ResourceFetcher>,
    bundler: Arc<dyn ModuleBundler>,
    options: TransformOptions,
}

impl HtmlTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self {
            fetcher: default_fetcher(),
            bundler: Arc::new(EsbuildBundler::from_env()),
            options,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn ModuleBundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }

    /// Transform `index_path`, resolving emitted files against its directory.
    pub async fn transform(&self, index_path: &Path) -> TransformResult<TransformReport> {
        let root_dir = index_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.transform_in(index_path, &root_dir).await
    }

    /// Transform `index_path`, writing extracted and vendored files under `root_dir`.
    pub async fn transform_in(
        &self,
        index_path: &Path,
        root_dir: &Path,
    ) -> TransformResult<TransformReport> {
        if !tokio::fs::try_exists(index_path).await.unwrap_or(false) {
            return Ok(TransformReport::default());
        }
        let original = tokio::fs::read_to_string(index_path).await?;
        tokio::fs::create_dir_all(root_dir).await?;

        let relativized = relativize_root_paths(&original);
        let (working, base_removed) = strip_base_tags(&relativized);
        let mut doc = Document::parse(&working);

        let mut report = TransformReport {
            base_removed,
            ..TransformReport::default()
        };

        lint(&doc, &mut report);
        if self.options.strict && !report.inline_event_handlers.is_empty() {
            return Err(TransformError::InlineEventHandlers {
                count: report.inline_event_handlers.len(),
            });
        }

        self.process_styles(&mut doc, root_dir, &mut report).await?;

        let mut session = TransformSession::new(root_dir, self.options.vendor.clone());
        let modules = self
            .process_scripts(&mut doc, root_dir, &mut session, &mut report)
            .await?;
        self.process_links(&mut doc, &mut session, &mut report).await;

        report.module_bundle.inputs = modules.len();
        if self.options.bundle_modules && !modules.is_empty() {
            self.bundle_modules(&mut doc, root_dir, &modules, &mut report)
                .await;
        }

        let mut output = doc.to_html();
        if original.ends_with('\n') && !output.ends_with('\n') {
            output.push('\n');
        }
        report.changed = output != original;
        if report.changed {
            tokio::fs::write(index_path, &output).await?;
        }

        report.total_inline_styles = report.inline_styles.len();
        report.vendored = session.into_vendored();
        obs::emit_transform_finished(&index_path.display().to_string(), &report);
        Ok(report)
    }

    async fn process_styles(
        &self,
        doc: &mut Document,
        root_dir: &Path,
        report: &mut TransformReport,
    ) -> TransformResult<()> {
        for (position, idx) in doc.find_tags("style").into_iter().enumerate() {
            let Some(content) = doc.inner_text(idx).map(str::to_string) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            if self.options.extract_inline_styles {
                let hash = short_hash(content.as_bytes(), INLINE_HASH_LEN);
                let file_name = format!("inline-style-{}.css", hash);
                tokio::fs::write(root_dir.join(&file_name), &content).await?;
                let href = format!("./{}", file_name);
                let link = Tag::new("link")
                    .with_attr("rel", Some("stylesheet"))
                    .with_attr("href", Some(&href));
                doc.replace_element(idx, link);
            }
            report.inline_styles.push(InlineStyleReport {
                tag: "style".to_string(),
                location: format!("tag#{}", position),
                snippet: snippet(&content, STYLE_SNIPPET_LEN),
            });
        }
        Ok(())
    }

    async fn process_scripts(
        &self,
        doc: &mut Document,
        root_dir: &Path,
        session: &mut TransformSession,
        report: &mut TransformReport,
    ) -> TransformResult<Vec<ModuleEntry>> {
        let mut modules = Vec::new();
        let mut extracted: HashMap<String, String> = HashMap::new();

        for idx in doc.find_tags("script") {
            let Some(tag) = doc.tag(idx) else {
                continue;
            };
            let script_type = tag.attr("type").unwrap_or("").trim().to_ascii_lowercase();
            let is_module = script_type == "module";
            let src = tag.attr("src").map(str::to_string);

            if let Some(url) = src.as_deref().filter(|s| is_remote_url(s)) {
                let kind = if is_module {
                    VendorKind::Module
                } else {
                    VendorKind::Script
                };
                self.vendor_attr(doc, idx, "src", url, kind, session, report)
                    .await;
            }

            let current_src = doc
                .tag(idx)
                .and_then(|t| t.attr("src"))
                .map(str::trim)
                .unwrap_or("")
                .to_string();

            if is_module {
                let source = if current_src.is_empty() {
                    let content = doc.inner_text(idx).unwrap_or("").to_string();
                    if content.trim().is_empty() {
                        doc.set_inner_text(idx, "");
                        continue;
                    }
                    report.total_inline_scripts += 1;
                    let hash = short_hash(content.as_bytes(), INLINE_HASH_LEN);
                    let file_name = format!("module-inline-{}.js", hash);
                    tokio::fs::write(root_dir.join(&file_name), &content).await?;
                    let local = format!("./{}", file_name);
                    doc.set_inner_text(idx, "");
                    if let Some(tag) = doc.tag_mut(idx) {
                        tag.set_attr("src", Some(&local));
                    }
                    report.inline_scripts.push(InlineScriptReport {
                        file_name,
                        hash,
                        size: content.len() as u64,
                        module: true,
                    });
                    local
                } else if is_remote_url(&current_src) || current_src.starts_with("//") {
                    // still third-party: cannot be bundled locally
                    continue;
                } else {
                    current_src
                };
                let source = if source.starts_with('.') {
                    source
                } else {
                    format!("./{}", source)
                };
                modules.push(ModuleEntry { node: idx, source });
                continue;
            }

            if !self.options.extract_inline_scripts
                || !current_src.is_empty()
                || !CLASSIC_SCRIPT_TYPES.contains(&script_type.as_str())
            {
                continue;
            }
            let content = doc.inner_text(idx).unwrap_or("").to_string();
            if content.trim().is_empty() {
                doc.set_inner_text(idx, "");
                continue;
            }
            report.total_inline_scripts += 1;
            let hash = short_hash(content.as_bytes(), INLINE_HASH_LEN);
            let file_name = match extracted.get(&hash) {
                Some(existing) => existing.clone(),
                None => {
                    let file_name = format!("inline-{}.js", hash);
                    tokio::fs::write(root_dir.join(&file_name), &content).await?;
                    report.inline_scripts.push(InlineScriptReport {
                        file_name: file_name.clone(),
                        hash: hash.clone(),
                        size: content.len() as u64,
                        module: false,
                    });
                    tracing::debug!(event = "transform.inline_extracted", file = %file_name);
                    extracted.insert(hash, file_name.clone());
                    file_name
                }
            };
            let local = format!("./{}", file_name);
            if let Some(tag) = doc.tag_mut(idx) {
                tag.set_attr("src", Some(&local));
                tag.set_attr("defer", None);
            }
            doc.set_inner_text(idx, "");
        }
        Ok(modules)
    }

    async fn process_links(
        &self,
        doc: &mut Document,
        session: &mut TransformSession,
        report: &mut TransformReport,
    ) {
        for idx in doc.find_tags("link") {
            let Some(tag) = doc.tag(idx) else {
                continue;
            };
            let rel = tag.attr("rel").unwrap_or("").trim().to_ascii_lowercase();
            if !PRELOAD_RELS.contains(&rel.as_str()) {
                continue;
            }
            let Some(href) = tag.attr("href").filter(|h| is_remote_url(h)).map(str::to_string)
            else {
                continue;
            };
            let kind = if rel == "stylesheet" {
                VendorKind::Style
            } else {
                VendorKind::Other
            };
            self.vendor_attr(doc, idx, "href", &href, kind, session, report)
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn vendor_attr(
        &self,
        doc: &mut Document,
        idx: usize,
        attr: &str,
        url: &str,
        kind: VendorKind,
        session: &mut TransformSession,
        report: &mut TransformReport,
    ) {
        match session.vendor(self.fetcher.as_ref(), url, kind).await {
            Ok(resource) => {
                if let Some(tag) = doc.tag_mut(idx) {
                    tag.set_attr(attr, Some(&resource.local_path));
                    tag.remove_attr("integrity");
                    tag.remove_attr("crossorigin");
                }
            }
            Err(err) => {
                let code = err.code();
                obs::emit_vendor_failed(url, &code);
                report.warnings.push(format!("vendor_failed:{}:{}", url, code));
            }
        }
    }

    async fn bundle_modules(
        &self,
        doc: &mut Document,
        root_dir: &Path,
        modules: &[ModuleEntry],
        report: &mut TransformReport,
    ) {
        let scratch = root_dir.join(BUNDLE_SCRATCH_DIR);
        let result = self.run_bundler(root_dir, &scratch, modules).await;
        if let Err(err) = tokio::fs::remove_dir_all(&scratch).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(event = "transform.scratch_cleanup_failed", error = %err);
            }
        }

        match result {
            Ok(warnings) => {
                for entry in modules {
                    doc.remove_element(entry.node);
                }
                let src = format!("./{}", BUNDLE_OUTPUT_FILE);
                doc.append_to_body(
                    Tag::new("script")
                        .with_attr("src", Some(&src))
                        .with_attr("defer", None),
                );
                report
                    .warnings
                    .extend(warnings.iter().map(|w| format!("esbuild:{}", w)));
                report.module_bundle.created = true;
                report.module_bundle.warnings = warnings;
            }
            Err(message) => {
                obs::emit_module_bundle_failed(&message);
                report
                    .warnings
                    .push(format!("module_bundle_failed:{}", message));
            }
        }
    }

    async fn run_bundler(
        &self,
        root_dir: &Path,
        scratch: &Path,
        modules: &[ModuleEntry],
    ) -> Result<Vec<String>, String> {
        if tokio::fs::try_exists(scratch).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(scratch)
                .await
                .map_err(|e| e.to_string())?;
        }
        tokio::fs::create_dir_all(scratch)
            .await
            .map_err(|e| e.to_string())?;

        let entry_file = scratch.join(BUNDLE_ENTRY_FILE);
        tokio::fs::write(&entry_file, entry_source(modules))
            .await
            .map_err(|e| e.to_string())?;

        let request = BundleRequest {
            root_dir: root_dir.to_path_buf(),
            entry_file,
            outfile: root_dir.join(BUNDLE_OUTPUT_FILE),
        };
        self.bundler
            .bundle(&request)
            .await
            .map(|out| out.warnings)
            .map_err(|e| e.to_string())
    }
}

/// `import '../x';` per module, relative to the scratch directory.
fn entry_source(modules: &[ModuleEntry]) -> String {
    let mut out = String::new();
    for entry in modules {
        let target = entry.source.trim_start_matches("./");
        out.push_str(&format!("import '../{}';\n", target.replace('\'', "\\'")));
    }
    out
}

/// Start tags carrying inline handlers or `style` attributes.
fn lint(doc: &Document, report: &mut TransformReport) {
    for node in doc.nodes() {
        let Node::Start(tag) = node else {
            continue;
        };
        for attr in tag.attrs() {
            if is_event_handler(&attr.name) {
                report.inline_event_handlers.push(InlineEventHandlerReport {
                    tag: tag.name().to_string(),
                    attribute: attr.name.clone(),
                    snippet: snippet(attr.value.as_deref().unwrap_or(""), HANDLER_SNIPPET_LEN),
                });
            }
        }
        if let Some(style) = tag.attr("style").filter(|s| !s.trim().is_empty()) {
            report.inline_styles.push(InlineStyleReport {
                tag: tag.name().to_string(),
                location: "attribute".to_string(),
                snippet: snippet(style, STYLE_SNIPPET_LEN),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VendorConfig;
    use crate::fakes::{FakeBundler, FakeFetcher};

    fn transformer(fetcher: FakeFetcher, bundler: FakeBundler) -> HtmlTransformer {
        HtmlTransformer::new(TransformOptions::default())
            .with_fetcher(Arc::new(fetcher))
            .with_bundler(Arc::new(bundler))
    }

    async fn write_index(dir: &Path, html: &str) -> PathBuf {
        let path = dir.join("index.html");
        tokio::fs::write(&path, html).await.expect("write index");
        path
    }

    #[tokio::test]
    async fn missing_index_yields_empty_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = transformer(FakeFetcher::new(), FakeBundler::new());
        let report = t
            .transform(&dir.path().join("index.html"))
            .await
            .expect("transform");
        assert_eq!(report, TransformReport::default());
    }

    #[tokio::test]
    async fn inline_script_extracted_and_deferred() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = write_index(
            dir.path(),
            "<!DOCTYPE html>\n<html><body><script>console.log('hi')</script></body></html>\n",
        )
        .await;
        let report = transformer(FakeFetcher::new(), FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");

        assert!(report.changed);
        assert_eq!(report.total_inline_scripts, 1);
        let file = &report.inline_scripts[0].file_name;
        assert!(file.starts_with("inline-") && file.ends_with(".js"));
        let html = tokio::fs::read_to_string(&index).await.expect("read");
        assert!(html.starts_with("<!DOCTYPE html>\n"));
        assert!(html.contains(&format!("<script src=\"./{}\" defer></script>", file)));
        assert!(html.ends_with('\n'));
        let body = tokio::fs::read_to_string(dir.path().join(file)).await.expect("script");
        assert_eq!(body, "console.log('hi')");
    }

    #[tokio::test]
    async fn json_data_blocks_stay_inline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<script type=\"application/ld+json\">{\"a\":1}</script>";
        let index = write_index(dir.path(), html).await;
        let report = transformer(FakeFetcher::new(), FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");
        assert!(!report.changed);
        assert_eq!(report.total_inline_scripts, 0);
    }

    #[tokio::test]
    async fn lint_records_handlers_and_styles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = write_index(
            dir.path(),
            "<body><button onclick=\"go()\" style=\"color: red\">x</button><style>p{}</style></body>",
        )
        .await;
        let report = transformer(FakeFetcher::new(), FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");

        assert_eq!(report.inline_event_handlers.len(), 1);
        assert_eq!(report.inline_event_handlers[0].tag, "button");
        assert_eq!(report.inline_event_handlers[0].attribute, "onclick");
        assert_eq!(report.inline_event_handlers[0].snippet, "go()");
        assert_eq!(report.total_inline_styles, 2);
        assert_eq!(report.inline_styles[0].location, "attribute");
        assert_eq!(report.inline_styles[1].location, "tag#0");
        assert!(!report.changed);
    }

    #[tokio::test]
    async fn strict_mode_aborts_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<body><script>x()</script><div onload=\"y()\"></div></body>";
        let index = write_index(dir.path(), html).await;
        let t = HtmlTransformer::new(TransformOptions::default().with_strict(true))
            .with_fetcher(Arc::new(FakeFetcher::new()))
            .with_bundler(Arc::new(FakeBundler::new()));
        let err = t.transform(&index).await.expect_err("strict");
        assert_eq!(err.code(), "inline_event_handlers_detected");
        let after = tokio::fs::read_to_string(&index).await.expect("read");
        assert_eq!(after, html);
    }

    #[tokio::test]
    async fn style_extraction_spills_to_css() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = write_index(dir.path(), "<head><style>body { margin: 0 }</style></head>").await;
        let t = HtmlTransformer::new(TransformOptions::default().with_style_extraction(true))
            .with_fetcher(Arc::new(FakeFetcher::new()))
            .with_bundler(Arc::new(FakeBundler::new()));
        let report = t.transform(&index).await.expect("transform");

        assert!(report.changed);
        let html = tokio::fs::read_to_string(&index).await.expect("read");
        assert!(html.starts_with("<head><link rel=\"stylesheet\" href=\"./inline-style-"));
        assert!(!html.contains("<style>"));
        assert_eq!(report.inline_styles[0].snippet, "body { margin: 0 }");
    }

    #[tokio::test]
    async fn remote_script_vendored_and_integrity_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = write_index(
            dir.path(),
            "<script src=\"https://cdn.example.com/lib.js\" integrity=\"sha384-x\" crossorigin=\"anonymous\"></script>",
        )
        .await;
        let fetcher = FakeFetcher::new().with_resource("https://cdn.example.com/lib.js", b"lib()");
        let report = transformer(fetcher, FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");

        assert_eq!(report.vendored.len(), 1);
        let local = &report.vendored[0].local_path;
        let html = tokio::fs::read_to_string(&index).await.expect("read");
        assert_eq!(html, format!("<script src=\"{}\"></script>", local));
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn vendor_failure_is_a_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<link rel=\"stylesheet\" href=\"https://fonts.example.com/a.css\">";
        let index = write_index(dir.path(), html).await;
        let fetcher = FakeFetcher::new().with_status("https://fonts.example.com/a.css", 503);
        let report = transformer(fetcher, FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");

        assert!(!report.changed);
        assert_eq!(
            report.warnings,
            vec!["vendor_failed:https://fonts.example.com/a.css:download_failed_503".to_string()]
        );
    }

    #[tokio::test]
    async fn escaped_ampersand_in_href_fetches_decoded_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<link rel=\"stylesheet\" href=\"https://fonts.example.com/css?family=Roboto&amp;display=swap\">";
        let index = write_index(dir.path(), html).await;
        let fetcher = FakeFetcher::new().with_resource(
            "https://fonts.example.com/css?family=Roboto&display=swap",
            b"@font-face{font-family:Roboto}",
        );
        let report = transformer(fetcher.clone(), FakeBundler::new())
            .transform(&index)
            .await
            .expect("transform");

        assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
        assert_eq!(report.vendored.len(), 1);
        assert_eq!(
            fetcher.fetch_count("https://fonts.example.com/css?family=Roboto&display=swap"),
            1
        );
        assert_eq!(
            fetcher.fetch_count("https://fonts.example.com/css?family=Roboto&amp;display=swap"),
            0
        );
        let html = tokio::fs::read_to_string(&index).await.expect("read");
        assert!(html.contains(&report.vendored[0].local_path));
        assert!(!html.contains("https://fonts.example.com"));
    }

    #[tokio::test]
    async fn disabled_vendoring_leaves_markup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<script src=\"https://cdn.example.com/lib.js\"></script>";
        let index = write_index(dir.path(), html).await;
        let options = TransformOptions::default().with_vendor(VendorConfig {
            enabled: false,
            ..VendorConfig::default()
        });
        let fetcher = FakeFetcher::new().with_resource("https://cdn.example.com/lib.js", b"lib()");
        let t = HtmlTransformer::new(options)
            .with_fetcher(Arc::new(fetcher.clone()))
            .with_bundler(Arc::new(FakeBundler::new()));
        let report = t.transform(&index).await.expect("transform");
        assert!(!report.changed);
        assert_eq!(fetcher.fetch_count("https://cdn.example.com/lib.js"), 0);
        assert_eq!(
            report.warnings,
            vec!["vendor_failed:https://cdn.example.com/lib.js:vendor_disabled".to_string()]
        );
    }

    #[tokio::test]
    async fn module_scripts_bundled_into_app_js() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = write_index(
            dir.path(),
            "<html><body>\n<script type=\"module\" src=\"./main.js\"></script>\n<script type=\"module\">import './x.js';</script>\n</body></html>\n",
        )
        .await;
        let bundler = FakeBundler::new().with_warnings(vec!["unused import".to_string()]);
        let report = transformer(FakeFetcher::new(), bundler.clone())
            .transform(&index)
            .await
            .expect("transform");

        assert!(report.module_bundle.created);
        assert_eq!(report.module_bundle.inputs, 2);
        assert_eq!(report.warnings, vec!["esbuild:unused import".to_string()]);
        assert_eq!(report.inline_scripts.len(), 1);
        assert!(report.inline_scripts[0].module);

        let html = tokio::fs::read_to_string(&index).await.expect("read");
        assert!(!html.contains("type=\"module\""));
        assert!(html.contains("<script src=\"./app.js\" defer></script>\n</body>"));
        assert!(!dir.path().join(BUNDLE_SCRATCH_DIR).exists());

        let entry = bundler.last_entry().expect("entry captured");
        let module_file = &report.inline_scripts[0].file_name;
        assert_eq!(entry, format!("import '../main.js';\nimport '../{}';\n", module_file));
    }

    #[tokio::test]
    async fn bundle_failure_keeps_module_tags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let html = "<body><script type=\"module\" src=\"./main.js\"></script></body>";
        let index = write_index(dir.path(), html).await;
        let report = transformer(FakeFetcher::new(), FakeBundler::failing("syntax error"))
            .transform(&index)
            .await
            .expect("transform");

        assert!(!report.module_bundle.created);
        assert_eq!(report.module_bundle.inputs, 1);
        assert!(report.warnings[0].starts_with("module_bundle_failed:"));
        assert!(!report.changed);
        assert!(!dir.path().join(BUNDLE_SCRATCH_DIR).exists());
    }

    #[test]
    fn handler_detection() {
        assert!(is_event_handler("onclick"));
        assert!(!is_event_handler("on"));
        assert!(!is_event_handler("one-thing"));
        assert!(!is_event_handler("data-onclick"));
    }
}
