//! Start tags and their attributes.
//!
//! A parsed tag keeps its original source text until it is modified, so an
//! untouched document serialises back byte for byte. Attribute values are
//! held decoded and escaped again when a tag is rebuilt.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    /// Lowercased attribute name.
    pub name: String,
    /// Decoded value; `None` for boolean attributes (`defer`, `async`).
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    name: String,
    attrs: Vec<Attr>,
    self_closing: bool,
    raw: Option<String>,
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute regex is valid")
    })
}

impl Tag {
    /// Build a fresh tag (always serialised from its parts).
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            self_closing: false,
            raw: None,
        }
    }

    /// Parse the text of a start tag, `<name ...>` inclusive.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix('<')?.strip_suffix('>')?;
        let self_closing = inner.trim_end().ends_with('/');
        let name_end = inner
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }

        let mut attrs: Vec<Attr> = Vec::new();
        for caps in attr_regex().captures_iter(&inner[name_end..]) {
            let attr_name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()).into_owned());
            // first occurrence wins, like a browser
            if !attrs.iter().any(|a| a.name == attr_name) {
                attrs.push(Attr {
                    name: attr_name,
                    value,
                });
            }
        }

        Some(Self {
            name,
            attrs,
            self_closing,
            raw: Some(raw.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    pub fn is_self_closing(&self) -> bool {
        self.self_closing
    }

    /// Attribute value; boolean attributes read as `""`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }

    /// Set (or add) an attribute. No-op if the value is already equal.
    pub fn set_attr(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(str::to_string);
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(existing) if existing.value == value => return,
            Some(existing) => existing.value = value,
            None => self.attrs.push(Attr {
                name: name.to_string(),
                value,
            }),
        }
        self.raw = None;
    }

    pub fn with_attr(mut self, name: &str, value: Option<&str>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn remove_attr(&mut self, name: &str) {
        let before = self.attrs.len();
        self.attrs.retain(|a| a.name != name);
        if self.attrs.len() != before {
            self.raw = None;
        }
    }

    /// Whether the tag was rebuilt since parsing.
    pub fn is_modified(&self) -> bool {
        self.raw.is_none()
    }

    pub fn to_html(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut out = String::with_capacity(16 + self.attrs.len() * 16);
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attrs {
            out.push(' ');
            out.push_str(&attr.name);
            if let Some(value) = &attr.value {
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
        out
    }
}

/// Resolve character references (`&amp;`, `&#39;`, `&#x2F;`, ...) in an
/// attribute value. Unknown or malformed references are kept as written.
pub fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match decode_reference(tail) {
            Some((ch, used)) => {
                out.push(ch);
                rest = &tail[used..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decode the reference at the start of `tail` (which begins with `&`),
/// returning the character and the bytes consumed.
fn decode_reference(tail: &str) -> Option<(char, usize)> {
    let semi = tail
        .char_indices()
        .take(12)
        .find(|(_, c)| *c == ';')
        .map(|(i, _)| i)?;
    let body = &tail[1..semi];
    let ch = match body.strip_prefix('#') {
        Some(num) => {
            let code = match num.strip_prefix(|c| c == 'x' || c == 'X') {
                Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                    u32::from_str_radix(hex, 16).ok()?
                }
                Some(_) => return None,
                None if !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) => {
                    num.parse().ok()?
                }
                None => return None,
            };
            char::from_u32(code)
                .filter(|c| *c != '\0')
                .unwrap_or('\u{FFFD}')
        }
        None => match body {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            "nbsp" => '\u{A0}',
            _ => return None,
        },
    };
    Some((ch, semi + 1))
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_unquoted_and_boolean() {
        let tag = Tag::parse(r#"<SCRIPT type=module src='./a.js' defer data-x="1">"#).expect("tag");
        assert_eq!(tag.name(), "script");
        assert_eq!(tag.attr("type"), Some("module"));
        assert_eq!(tag.attr("src"), Some("./a.js"));
        assert_eq!(tag.attr("defer"), Some(""));
        assert_eq!(tag.attr("data-x"), Some("1"));
        assert!(!tag.is_modified());
    }

    #[test]
    fn untouched_tag_keeps_raw_text() {
        let raw = r#"<div  class = "a"   onclick='go()'>"#;
        let tag = Tag::parse(raw).expect("tag");
        assert_eq!(tag.to_html(), raw);
        assert_eq!(tag.attr("onclick"), Some("go()"));
    }

    #[test]
    fn modification_reserialises() {
        let mut tag = Tag::parse(r#"<script src="https://cdn.example.com/x.js" integrity="sha384-abc" crossorigin>"#)
            .expect("tag");
        tag.set_attr("src", Some("./vendor/x.js"));
        tag.remove_attr("integrity");
        tag.remove_attr("crossorigin");
        assert_eq!(tag.to_html(), r#"<script src="./vendor/x.js">"#);
    }

    #[test]
    fn setting_same_value_is_noop() {
        let raw = r#"<link rel="stylesheet" href="./a.css">"#;
        let mut tag = Tag::parse(raw).expect("tag");
        tag.set_attr("href", Some("./a.css"));
        tag.remove_attr("integrity");
        assert_eq!(tag.to_html(), raw);
    }

    #[test]
    fn self_closing_detected() {
        let tag = Tag::parse(r#"<link rel="icon" href="./f.ico" />"#).expect("tag");
        assert!(tag.is_self_closing());
        assert_eq!(tag.attr("href"), Some("./f.ico"));
    }

    #[test]
    fn entity_references_decode_in_values() {
        let tag = Tag::parse(
            r#"<link href="https://fonts.example.com/css?family=Roboto&amp;display=swap" title='it&#39;s &quot;x&quot; &#x2F; &bogus; & done'>"#,
        )
        .expect("tag");
        assert_eq!(
            tag.attr("href"),
            Some("https://fonts.example.com/css?family=Roboto&display=swap")
        );
        assert_eq!(tag.attr("title"), Some(r#"it's "x" / &bogus; & done"#));
    }

    #[test]
    fn rebuilt_values_are_escaped() {
        let mut tag = Tag::parse(r#"<a href="/q?a=1&amp;b=2" title="say &quot;hi&quot;">"#).expect("tag");
        tag.set_attr("data-x", Some("1"));
        assert_eq!(
            tag.to_html(),
            r#"<a href="/q?a=1&amp;b=2" title="say &quot;hi&quot;" data-x="1">"#
        );
        let reparsed = Tag::parse(&tag.to_html()).expect("reparse");
        assert_eq!(reparsed.attr("href"), Some("/q?a=1&b=2"));
    }

    #[test]
    fn value_without_references_is_borrowed() {
        assert!(matches!(decode_entities("./a.css"), Cow::Borrowed(_)));
        assert_eq!(decode_entities("&#0;&#65;"), "\u{FFFD}A");
    }
}
