//! `[Section]` / `key=value` text blocks (Helios, XL30).
use super::{Entry, MetadataView, Value};
use crate::error::{Error, Result};

pub(super) fn parse(text: &str) -> Result<MetadataView> {
    let mut view = MetadataView::new();
    let mut current: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            current = Some(view.insert(name, Entry::section(MetadataView::new())));
            continue;
        }

        let (key, value) = match line.split_once('=') {
            Some(kv) => kv,
            None => {
                log::debug!("ignoring metadata line {}: {:?}", lineno + 1, line);
                continue;
            }
        };

        let parent = current.as_deref().ok_or_else(|| {
            Error::MalformedMetadata(format!(
                "line {}: `{}` appears before any [section] header",
                lineno + 1,
                line
            ))
        })?;
        if let Some(Entry {
            value: Value::Section(section),
            ..
        }) = view.get_mut(parent)
        {
            section.insert(key.trim(), Entry::text(value.trim()));
        }
    }

    if view.is_empty() {
        return Err(Error::MetadataNotFound("sectioned text"));
    }
    Ok(view)
}
