//! Lenient XML element trees (Helios slice-and-view and Phenom
//! footers).
//!
//! Only elements, text and the `unit` attribute matter here.
//! The document element is dropped: its children become the
//! top level of the view. Unbalanced closing tags are
//! tolerated, and elements left open at the end of the input
//! are closed implicitly.
use lazy_static::lazy_static;
use regex::Regex;

use super::{Entry, MetadataView};
use crate::error::{Error, Result};

struct Node {
    name: String,
    unit: Option<String>,
    children: MetadataView,
    text: String,
}

impl Node {
    fn finish(self) -> (String, Entry) {
        let entry = if self.children.is_empty() {
            Entry::text(decode_entities(self.text.trim()))
        } else {
            Entry::section(self.children)
        };
        (self.name, entry.with_unit(self.unit))
    }
}

pub(super) fn parse(text: &str) -> Result<MetadataView> {
    lazy_static! {
        static ref TOKEN: Regex = Regex::new(
            r#"(?s)<!--.*?-->|<\?.*?\?>|<![^>]*>|<(/?)([A-Za-z_][\w:.\-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#
        )
        .unwrap();
        static ref UNIT: Regex = Regex::new(r#"\bunit\s*=\s*["']([^"']*)["']"#).unwrap();
    }

    let mut top = MetadataView::new();
    let mut stack: Vec<Node> = vec![];
    let mut last = 0;

    fn attach(stack: &mut Vec<Node>, top: &mut MetadataView, (name, entry): (String, Entry)) {
        match stack.last_mut() {
            Some(parent) => parent.children.insert(name, entry),
            None => top.insert(name, entry),
        };
    }

    for caps in TOKEN.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((last, last));
        if let Some(node) = stack.last_mut() {
            node.text.push_str(&text[last..whole.0]);
        }
        last = whole.1;

        let name = match caps.get(2) {
            Some(name) => name.as_str(),
            // comment, declaration or doctype
            None => continue,
        };
        let closing = caps.get(1).map_or(false, |m| !m.as_str().is_empty());
        let self_closing = caps.get(4).map_or(false, |m| !m.as_str().is_empty());
        let unit = caps
            .get(3)
            .and_then(|attrs| UNIT.captures(attrs.as_str()))
            .map(|c| decode_entities(&c[1]));

        if closing {
            if let Some(depth) = stack.iter().rposition(|n| n.name == name) {
                while stack.len() > depth {
                    let node = stack.pop().unwrap_or_else(|| unreachable!());
                    attach(&mut stack, &mut top, node.finish());
                }
            }
        } else {
            let node = Node {
                name: name.to_string(),
                unit,
                children: MetadataView::new(),
                text: String::new(),
            };
            if self_closing {
                attach(&mut stack, &mut top, node.finish());
            } else {
                stack.push(node);
            }
        }
    }

    while let Some(node) = stack.pop() {
        attach(&mut stack, &mut top, node.finish());
    }

    if top.is_empty() {
        return Err(Error::MetadataNotFound("XML"));
    }

    // drop the document element
    if top.len() == 1 {
        if let Some((_, entry)) = top.iter().next() {
            if let Some(children) = entry.as_section() {
                return Ok(children.clone());
            }
        }
    }
    Ok(top)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
