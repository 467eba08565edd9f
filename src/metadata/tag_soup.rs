//! TIA `<Data>` blocks.
//!
//! ```text
//! <Data><Label>High tension</Label><Value>120</Value><Unit>kV</Unit></Data>
//! ```
use lazy_static::lazy_static;
use regex::Regex;

use super::{Entry, MetadataView};
use crate::error::{Error, Result};

pub(super) fn parse(text: &str) -> Result<MetadataView> {
    lazy_static! {
        static ref DATA: Regex = Regex::new(r"(?s)<Data>(.*?)</Data>").unwrap();
        static ref LABEL: Regex = Regex::new(r"(?s)<Label>(.*?)</Label>").unwrap();
        static ref UNIT: Regex = Regex::new(r"(?s)<Unit>(.*?)</Unit>").unwrap();
        static ref VALUE: Regex = Regex::new(r"(?s)<Value>(.*?)</Value>").unwrap();
    }

    let first = |re: &Regex, item: &str| -> Option<String> {
        re.captures(item)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    };

    let mut view = MetadataView::new();
    for item in DATA.captures_iter(text) {
        let item = &item[1];
        let label = match first(&LABEL, item) {
            Some(label) => label,
            None => {
                log::debug!("skipping <Data> block without label");
                continue;
            }
        };
        let value = first(&VALUE, item).unwrap_or_default();
        view.insert(label, Entry::text(value).with_unit(first(&UNIT, item)));
    }

    if view.is_empty() {
        return Err(Error::MetadataNotFound("tag soup"));
    }
    Ok(view)
}
