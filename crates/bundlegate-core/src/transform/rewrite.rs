//! Text-level pre-pass run before tokenising the document.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn attr_root_relative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(src|href)(\s*=\s*)(['"])/([^/])"#).expect("attr regex is valid")
    })
}

fn url_root_relative() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)url\(\s*(['"]?)/([^/])"#).expect("url regex is valid"))
}

fn base_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<base\b[^>]*>|</base\s*>").expect("base regex is valid"))
}

/// `src="/x"`, `href='/x'` and `url(/x)` become `./x`; `//host` is left alone.
pub fn relativize_root_paths(html: &str) -> Cow<'_, str> {
    let attrs = attr_root_relative().replace_all(html, "${1}${2}${3}./${4}");
    let urls = match url_root_relative().replace_all(&attrs, "url(${1}./${2}") {
        Cow::Owned(s) => Some(s),
        Cow::Borrowed(_) => None,
    };
    match urls {
        Some(s) => Cow::Owned(s),
        None => attrs,
    }
}

/// Remove every `<base>` tag. Returns the new text and whether one was found.
pub fn strip_base_tags(html: &str) -> (Cow<'_, str>, bool) {
    let stripped = base_tag().replace_all(html, "");
    let removed = matches!(stripped, Cow::Owned(_));
    (stripped, removed)
}
