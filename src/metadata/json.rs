//! NUL padded JSON blobs (Velox EMD metadata).
//!
//! The container reserves a fixed size block per frame and
//! pads the JSON document with NUL bytes.
use serde_json::Value as Json;

use super::{Entry, MetadataView};
use crate::error::{Error, Result};

pub(super) fn parse(raw: &[u8]) -> Result<MetadataView> {
    let end = raw
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    let raw = &raw[..end];
    if raw.is_empty() {
        return Err(Error::MetadataNotFound("JSON"));
    }

    match serde_json::from_slice(raw)? {
        Json::Object(map) => Ok(object_view(map)),
        other => Err(Error::MalformedMetadata(format!(
            "expected a JSON object, found {}",
            kind_name(&other)
        ))),
    }
}

fn object_view(map: serde_json::Map<String, Json>) -> MetadataView {
    let mut view = MetadataView::new();
    for (key, value) in map {
        view.insert(key, entry(value));
    }
    view
}

fn entry(value: Json) -> Entry {
    match value {
        Json::Object(map) => Entry::section(object_view(map)),
        Json::Array(items) => {
            let mut view = MetadataView::new();
            for (idx, item) in items.into_iter().enumerate() {
                view.insert(idx.to_string(), entry(item));
            }
            Entry::section(view)
        }
        Json::String(s) => Entry::text(s),
        Json::Number(n) => match n.as_f64() {
            Some(f) => Entry::number(f),
            None => Entry::text(n.to_string()),
        },
        Json::Bool(b) => Entry::text(b.to_string()),
        Json::Null => Entry::text(""),
    }
}

fn kind_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
