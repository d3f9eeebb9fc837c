//! Namespace-agnostic extraction helpers for ONVIF responses.
//!
//! Devices disagree on namespace prefixes (`tt:`, `tds:`, `ns2:`, none), so
//! elements are matched on their local name only.

use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use std::borrow::Cow;

/// An element found in a document: its opening tag text and inner content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    /// Everything between `<` and `>` of the opening tag.
    pub tag: &'a str,
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    pub fn attribute(&self, name: &str) -> Option<String> {
        attribute(self.tag, name)
    }

    pub fn text(&self, local_name: &str) -> Option<String> {
        text(self.inner, local_name)
    }

    pub fn child(&self, local_name: &str) -> Option<Element<'a>> {
        elements(self.inner, local_name).into_iter().next()
    }
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

/// Offset of the `<` that opens the markup ending just before `end`.
fn markup_start(xml: &str, end: usize) -> usize {
    xml.get(..end).and_then(|head| head.rfind('<')).unwrap_or(0)
}

/// Text between `<` and `>` of the tag that ends at `end`.
fn tag_text(xml: &str, end: usize) -> &str {
    xml.get(markup_start(xml, end) + 1..end.saturating_sub(1))
        .unwrap_or("")
}

fn is_named(start: &BytesStart<'_>, local_name: &str) -> bool {
    start.local_name().as_ref() == local_name.as_bytes()
}

/// Outermost elements with the given local name, in document order.
/// Scanning stops at the first malformed construct.
pub fn elements<'a>(xml: &'a str, local_name: &str) -> Vec<Element<'a>> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();
    // (depth, opening tag, offset where the content starts)
    let mut open: Option<(usize, &'a str, usize)> = None;
    let mut depth = 0usize;

    loop {
        let Ok(event) = reader.read_event() else {
            break;
        };
        let after = position(&reader);

        match event {
            Event::Start(start) => {
                depth += 1;
                if open.is_none() && is_named(&start, local_name) {
                    open = Some((depth, tag_text(xml, after), after));
                }
            }
            Event::Empty(start) => {
                if open.is_none() && is_named(&start, local_name) {
                    found.push(Element {
                        tag: tag_text(xml, after),
                        inner: "",
                    });
                }
            }
            Event::End(_) => {
                if let Some((open_depth, tag, content_start)) = open
                    && open_depth == depth
                {
                    found.push(Element {
                        tag,
                        inner: xml
                            .get(content_start..markup_start(xml, after))
                            .unwrap_or(""),
                    });
                    open = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found
}

/// Opening tags with the given local name, including nested ones.
pub fn opening_tags<'a>(xml: &'a str, local_name: &str) -> Vec<&'a str> {
    let mut reader = Reader::from_str(xml);
    let mut found = Vec::new();

    loop {
        let Ok(event) = reader.read_event() else {
            break;
        };
        let after = position(&reader);

        match event {
            Event::Start(start) | Event::Empty(start) if is_named(&start, local_name) => {
                found.push(tag_text(xml, after));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found
}

/// Attribute value from an opening tag, matched on its local name and
/// unescaped.
pub fn attribute(tag: &str, name: &str) -> Option<String> {
    let content = tag.trim_end().trim_end_matches('/');
    let name_len = content
        .find(|c: char| c.is_whitespace())
        .unwrap_or(content.len());
    let start = BytesStart::from_content(content, name_len);

    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(Cow::into_owned))
}

/// Trimmed text content of the first element with the given local name.
pub fn text(xml: &str, local_name: &str) -> Option<String> {
    elements(xml, local_name)
        .into_iter()
        .map(|e| e.inner.trim())
        .find(|t| !t.is_empty())
        .map(unescape_text)
}

fn unescape_text(raw: &str) -> String {
    unescape(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

/// Escape a caller-supplied value for embedding in a SOAP body.
pub fn escape_text(value: &str) -> Cow<'_, str> {
    escape(value)
}
