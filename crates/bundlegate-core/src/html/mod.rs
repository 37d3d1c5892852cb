//! Lossless HTML token stream.
//!
//! The document is split into start tags, end tags and opaque text (which
//! includes comments, the doctype and the bodies of `<script>`/`<style>`).
//! Only tags that are edited get re-serialised; everything else is written
//! back exactly as read.

mod tag;

pub use tag::{Attr, Tag};

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Start(Tag),
    End { name: String, raw: String },
}

impl Node {
    fn end(name: &str) -> Self {
        Node::End {
            name: name.to_string(),
            raw: format!("</{}>", name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn parse(input: &str) -> Self {
        let lower = input.to_ascii_lowercase();
        let bytes = input.as_bytes();
        let mut nodes = Vec::new();
        let mut text_start = 0;
        let mut pos = 0;

        let flush = |nodes: &mut Vec<Node>, from: usize, to: usize| {
            if to > from {
                nodes.push(Node::Text(input[from..to].to_string()));
            }
        };

        while pos < bytes.len() {
            if bytes[pos] != b'<' {
                pos += 1;
                continue;
            }
            let rest = &lower[pos..];

            if rest.starts_with("<!--") {
                // comment stays inside the surrounding text run
                pos = rest
                    .find("-->")
                    .map(|i| pos + i + 3)
                    .unwrap_or(bytes.len());
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                pos = rest.find('>').map(|i| pos + i + 1).unwrap_or(bytes.len());
                continue;
            }
            if rest.starts_with("</") && rest[2..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                let Some(close) = rest.find('>') else {
                    break;
                };
                flush(&mut nodes, text_start, pos);
                let raw = &input[pos..pos + close + 1];
                let name: String = lower[pos + 2..pos + close]
                    .chars()
                    .take_while(|c| !c.is_whitespace() && *c != '/')
                    .collect();
                nodes.push(Node::End {
                    name,
                    raw: raw.to_string(),
                });
                pos += close + 1;
                text_start = pos;
                continue;
            }
            if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                let Some(end) = find_tag_end(bytes, pos) else {
                    break;
                };
                let Some(tag) = Tag::parse(&input[pos..end]) else {
                    pos += 1;
                    continue;
                };
                flush(&mut nodes, text_start, pos);
                // `<script/>` still opens a raw text element
                let raw_text = RAW_TEXT_ELEMENTS
                    .contains(&tag.name())
                    .then(|| tag.name().to_string());
                nodes.push(Node::Start(tag));
                pos = end;
                if let Some(name) = raw_text {
                    let content_end = raw_text_end(&lower, pos, &name).unwrap_or(bytes.len());
                    nodes.push(Node::Text(input[pos..content_end].to_string()));
                    pos = content_end;
                }
                text_start = pos;
                continue;
            }
            pos += 1;
        }
        flush(&mut nodes, text_start, bytes.len());
        Self { nodes }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Start(tag) => out.push_str(&tag.to_html()),
                Node::End { raw, .. } => out.push_str(raw),
            }
        }
        out
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Indices of start tags named `name`, in document order.
    pub fn find_tags(&self, name: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| match n {
                Node::Start(tag) if tag.name() == name => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn tag(&self, idx: usize) -> Option<&Tag> {
        match self.nodes.get(idx) {
            Some(Node::Start(tag)) => Some(tag),
            _ => None,
        }
    }

    pub fn tag_mut(&mut self, idx: usize) -> Option<&mut Tag> {
        match self.nodes.get_mut(idx) {
            Some(Node::Start(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Raw content of a `<script>`/`<style>` element starting at `idx`.
    pub fn inner_text(&self, idx: usize) -> Option<&str> {
        match (self.tag(idx), self.nodes.get(idx + 1)) {
            (Some(tag), Some(Node::Text(text))) if RAW_TEXT_ELEMENTS.contains(&tag.name()) => {
                Some(text)
            }
            _ => None,
        }
    }

    pub fn set_inner_text(&mut self, idx: usize, content: &str) {
        let is_raw = self
            .tag(idx)
            .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t.name()));
        if let (true, Some(Node::Text(text))) = (is_raw, self.nodes.get_mut(idx + 1)) {
            if text.as_str() != content {
                *text = content.to_string();
            }
        }
    }

    /// Swap the element at `idx` (and its raw content/end tag) for `tag`.
    pub fn replace_element(&mut self, idx: usize, tag: Tag) {
        self.clear_element_body(idx);
        self.nodes[idx] = Node::Start(tag);
    }

    /// Drop the element at `idx` together with its content and end tag.
    pub fn remove_element(&mut self, idx: usize) {
        if self.tag(idx).is_none() {
            return;
        }
        self.clear_element_body(idx);
        self.nodes[idx] = Node::Text(String::new());
    }

    fn clear_element_body(&mut self, idx: usize) {
        let Some(name) = self.tag(idx).map(|t| t.name().to_string()) else {
            return;
        };
        if !RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            return;
        }
        if let Some(Node::Text(_)) = self.nodes.get(idx + 1) {
            self.nodes[idx + 1] = Node::Text(String::new());
            if matches!(self.nodes.get(idx + 2), Some(Node::End { name: n, .. }) if *n == name) {
                self.nodes[idx + 2] = Node::Text(String::new());
            }
        }
    }

    /// Append `<tag></tag>` just before `</body>` (or `</html>`, or the end).
    pub fn append_to_body(&mut self, tag: Tag) {
        let name = tag.name().to_string();
        let anchor = ["body", "html"].iter().find_map(|target| {
            self.nodes
                .iter()
                .rposition(|n| matches!(n, Node::End { name, .. } if name == target))
        });
        let element = [
            Node::Text("  ".to_string()),
            Node::Start(tag),
            Node::end(&name),
            Node::Text("\n".to_string()),
        ];
        match anchor {
            Some(at) => {
                self.nodes.splice(at..at, element);
            }
            None => self.nodes.extend(element),
        }
    }
}

/// Offset of the `</name` that ends a raw text element opened before `from`.
///
/// Only a name followed by whitespace, `/` or `>` counts, so `</scripts>`
/// inside a script body is content.
fn raw_text_end(lower: &str, from: usize, name: &str) -> Option<usize> {
    let closing = format!("</{}", name);
    let mut search = from;
    while let Some(i) = lower[search..].find(&closing) {
        let at = search + i;
        match lower.as_bytes().get(at + closing.len()) {
            Some(b) if b.is_ascii_whitespace() || *b == b'/' || *b == b'>' => return Some(at),
            _ => search = at + closing.len(),
        }
    }
    None
}

/// Byte offset just past the `>` closing the tag at `start`, honouring quotes.
fn find_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!DOCTYPE html>\n<html><head><!-- <script>not a tag</script> -->\n<style>a > b { color: red }</style></head>\n<body class=\"x\"><p title='a>b'>hi</p>\n<script>if (a < b && c > d) {}</script>\n</body></html>\n";

    #[test]
    fn round_trips_unmodified_input() {
        let doc = Document::parse(PAGE);
        assert_eq!(doc.to_html(), PAGE);
    }

    #[test]
    fn comments_do_not_produce_tags() {
        let doc = Document::parse(PAGE);
        assert_eq!(doc.find_tags("script").len(), 1);
        assert_eq!(doc.find_tags("style").len(), 1);
    }

    #[test]
    fn raw_text_bodies_are_opaque() {
        let doc = Document::parse(PAGE);
        let script = doc.find_tags("script")[0];
        assert_eq!(doc.inner_text(script), Some("if (a < b && c > d) {}"));
        let style = doc.find_tags("style")[0];
        assert_eq!(doc.inner_text(style), Some("a > b { color: red }"));
    }

    #[test]
    fn quoted_gt_does_not_end_tag() {
        let doc = Document::parse(PAGE);
        let p = doc.find_tags("p")[0];
        assert_eq!(doc.tag(p).and_then(|t| t.attr("title")), Some("a>b"));
    }

    #[test]
    fn remove_and_append() {
        let mut doc = Document::parse("<body><script type=\"module\" src=\"./a.js\"></script>\n</body>");
        let idx = doc.find_tags("script")[0];
        doc.remove_element(idx);
        doc.append_to_body(Tag::new("script").with_attr("src", Some("./app.js")).with_attr("defer", None));
        assert_eq!(
            doc.to_html(),
            "<body>\n  <script src=\"./app.js\" defer></script>\n</body>"
        );
    }

    #[test]
    fn unterminated_tag_is_text() {
        let input = "<p>ok</p><div class=\"never";
        let doc = Document::parse(input);
        assert_eq!(doc.to_html(), input);
    }

    #[test]
    fn longer_end_tag_name_stays_in_script_body() {
        let input = "<script>const s = \"</scripts>\"; go();</script ><p>after</p>";
        let doc = Document::parse(input);
        let script = doc.find_tags("script")[0];
        assert_eq!(doc.inner_text(script), Some("const s = \"</scripts>\"; go();"));
        assert_eq!(doc.find_tags("p").len(), 1);
        assert_eq!(doc.to_html(), input);
    }

    #[test]
    fn slash_closed_script_still_has_raw_body() {
        let input = "<script src=\"./a.js\"/><p>inside</p></script><div>out</div>";
        let doc = Document::parse(input);
        let script = doc.find_tags("script")[0];
        assert_eq!(doc.inner_text(script), Some("<p>inside</p>"));
        assert!(doc.find_tags("p").is_empty());
        assert_eq!(doc.find_tags("div").len(), 1);
        assert_eq!(doc.to_html(), input);
    }
}
