// Text-content view over a fetched page.
//
// The parser only needs three questions answered: which nodes contain a
// string, what text a node holds, and what its parent is. Keeping that
// behind a trait lets the parser run against real markup, a raw-text scan,
// or a hand-built fixture tree alike.

use std::collections::HashSet;

use ego_tree::NodeId;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use scraper::{ElementRef, Html};

use crate::error::MonitorError;

pub trait StructuredDocument {
    type Node: Copy;

    // Innermost nodes whose text contains `needle`
    fn nodes_containing(&self, needle: &str) -> Vec<Self::Node>;

    fn text(&self, node: Self::Node) -> String;

    fn parent(&self, node: Self::Node) -> Option<Self::Node>;
}

// Parsed page. Element text is collected on demand, only for the elements
// the parser actually asks about.
#[derive(Debug)]
pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    pub fn len(&self) -> usize {
        self.html
            .tree
            .nodes()
            .filter(|node| node.value().is_element())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StructuredDocument for HtmlDocument {
    type Node = NodeId;

    // Elements directly holding a text node that contains the needle, in
    // document order. A date split across inline tags is not a match.
    fn nodes_containing(&self, needle: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for node in self.html.tree.nodes() {
            let holds_needle = node
                .value()
                .as_text()
                .map_or(false, |text| text.contains(needle));
            if !holds_needle {
                continue;
            }
            if let Some(el) = node.ancestors().find_map(ElementRef::wrap) {
                if seen.insert(el.id()) {
                    found.push(el.id());
                }
            }
        }
        found
    }

    fn text(&self, node: NodeId) -> String {
        self.element(node)
            .map(|el| el.text().collect())
            .unwrap_or_default()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.element(node)?
            .ancestors()
            .find_map(ElementRef::wrap)
            .map(|el| el.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatNode {
    // A single occurrence, as byte offsets into the page text
    Match { start: usize, end: usize },
    // The context span around the occurrence starting at `start`
    Window { start: usize, end: usize },
}

// No-structure scan over raw page text. A match's parent is the window of
// `radius_chars` characters on each side, or the whole page when no radius
// is set.
#[derive(Debug, Clone)]
pub struct FlatDocument {
    text: String,
    radius_chars: Option<usize>,
}

impl FlatDocument {
    pub fn windowed(text: impl Into<String>, radius_chars: usize) -> Self {
        Self {
            text: text.into(),
            radius_chars: Some(radius_chars),
        }
    }

    pub fn whole_page(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            radius_chars: None,
        }
    }

    fn window_around(&self, start: usize, end: usize) -> (usize, usize) {
        let Some(radius) = self.radius_chars else {
            return (0, self.text.len());
        };
        let from = if radius == 0 {
            start
        } else {
            self.text[..start]
                .char_indices()
                .rev()
                .nth(radius - 1)
                .map(|(i, _)| i)
                .unwrap_or(0)
        };
        let to = self.text[end..]
            .char_indices()
            .nth(radius)
            .map(|(i, _)| end + i)
            .unwrap_or(self.text.len());
        (from, to)
    }
}

impl StructuredDocument for FlatDocument {
    type Node = FlatNode;

    fn nodes_containing(&self, needle: &str) -> Vec<FlatNode> {
        if needle.is_empty() {
            return Vec::new();
        }
        self.text
            .match_indices(needle)
            .map(|(start, m)| FlatNode::Match {
                start,
                end: start + m.len(),
            })
            .collect()
    }

    fn text(&self, node: FlatNode) -> String {
        let (FlatNode::Match { start, end } | FlatNode::Window { start, end }) = node;
        self.text.get(start..end).unwrap_or_default().to_string()
    }

    fn parent(&self, node: FlatNode) -> Option<FlatNode> {
        match node {
            FlatNode::Match { start, end } => {
                let (start, end) = self.window_around(start, end);
                Some(FlatNode::Window { start, end })
            }
            FlatNode::Window { .. } => None,
        }
    }
}

// Media types that can carry a listing page
fn is_textual(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || media_type == "application/xhtml+xml"
        || media_type == "application/xml"
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

// Looks for `charset=` inside a <meta> tag near the top of the page
fn sniff_meta_charset(head: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let mut rest = head.as_str();
    while let Some(pos) = rest.find("<meta") {
        rest = &rest[pos..];
        let tag_end = rest.find('>').unwrap_or(rest.len());
        let tag = &rest[..tag_end];
        if let Some(cs) = tag.find("charset=") {
            let value: String = tag[cs + "charset=".len()..]
                .trim_start_matches(&['"', '\''][..])
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            // A page that can declare its charset in ASCII is not UTF-16
            if let Some(enc) = Encoding::for_label(value.as_bytes()) {
                return Some(enc.output_encoding());
            }
        }
        rest = &rest[tag_end..];
    }
    None
}

// Turns a fetched body into text. Only content that is plainly not text is
// an error; an empty or tag-soup body decodes fine and simply yields no matches.
pub fn decode_page(body: &[u8], content_type: Option<&str>) -> Result<String, MonitorError> {
    let media_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|mt| !mt.is_empty());

    if let Some(mt) = media_type.as_deref() {
        if !is_textual(mt) {
            return Err(MonitorError::Parse(format!(
                "expected an HTML page, got content type {mt:?}"
            )));
        }
    }

    // Byte order mark first, then the header, then <meta>
    let encoding = match Encoding::for_bom(body) {
        Some((encoding, _)) => encoding,
        None => content_type
            .and_then(charset_param)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .or_else(|| sniff_meta_charset(&body[..body.len().min(1024)]))
            .unwrap_or(UTF_8),
    };

    // UTF-16 legitimately contains zero bytes; everything else that does is binary
    if encoding != UTF_16LE && encoding != UTF_16BE && body.contains(&0) {
        return Err(MonitorError::Parse(
            "page body contains NUL bytes and is not text".to_string(),
        ));
    }

    let (text, _, _) = encoding.decode(body);
    Ok(text.into_owned())
}
