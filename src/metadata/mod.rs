//! Normalised views of vendor metadata.
//!
//! Every vendor stores its metadata differently: a TIA
//! `<Data>` tag soup, Helios/XL30 `[Section]` text blocks,
//! XML footers, TIFF resolution tags or a JSON blob inside
//! an HDF5 container. [`parse`] turns each of them into a
//! [`MetadataView`], an ordered label → value mapping with
//! optional units and nested sections.
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

mod json;
mod resolution;
mod sectioned;
mod tag_soup;
mod xml;

pub use resolution::{encode_tag_tuple, meters_per_pixel, ResolutionUnit, TagTuple};

/// Encodings understood by [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// Repeated `<Data><Label/><Unit/><Value/></Data>` blocks.
    TagSoup,
    /// `[Section]` headers followed by `key=value` lines.
    SectionedText,
    /// A plain XML element tree; `unit="…"` attributes
    /// become entry units.
    Xml,
    /// TIFF resolution tags, see [`encode_tag_tuple`].
    StructuredTagTuple,
    /// NUL padded JSON.
    JsonBlob,
}

/// Parse a raw metadata block.
pub fn parse(raw: &[u8], kind: FormatKind) -> Result<MetadataView> {
    match kind {
        FormatKind::TagSoup => tag_soup::parse(&String::from_utf8_lossy(raw)),
        FormatKind::SectionedText => sectioned::parse(&String::from_utf8_lossy(raw)),
        FormatKind::Xml => xml::parse(&String::from_utf8_lossy(raw)),
        FormatKind::StructuredTagTuple => resolution::parse(raw),
        FormatKind::JsonBlob => json::parse(raw),
    }
}

/// Where a block ends, see [`locate`].
#[derive(Debug, Clone, Copy)]
pub enum BlockEnd {
    /// Up to and including the given closing text.
    Tag(&'static str),
    /// Up to the end of the line containing the given text.
    Line(&'static str),
    /// Up to the next NUL byte.
    Nul,
}

/// Text delimiting a metadata block inside a file.
#[derive(Debug, Clone, Copy)]
pub struct Marker {
    pub start: &'static str,
    pub end: BlockEnd,
}

/// Find a metadata block in the raw bytes of a file.
///
/// The block starts at the first occurrence of
/// `marker.start`. A missing `Tag` end is an incomplete
/// block; missing `Line`/`Nul` ends run to the end of the
/// data.
pub fn locate(raw: &[u8], marker: &Marker) -> Option<String> {
    let start = find(raw, marker.start.as_bytes(), 0)?;
    let end = match marker.end {
        BlockEnd::Tag(tag) => find(raw, tag.as_bytes(), start)? + tag.len(),
        BlockEnd::Line(text) => match find(raw, text.as_bytes(), start) {
            Some(pos) => find(raw, b"\n", pos).map(|nl| nl + 1).unwrap_or(raw.len()),
            None => raw.len(),
        },
        BlockEnd::Nul => find(raw, b"\0", start).unwrap_or(raw.len()),
    };
    Some(String::from_utf8_lossy(&raw[start..end]).into_owned())
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Section(MetadataView),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub unit: Option<String>,
}

impl Entry {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Entry {
            value: Value::Text(text.into()),
            unit: None,
        }
    }

    pub fn number(value: f64) -> Self {
        Entry {
            value: Value::Number(value),
            unit: None,
        }
    }

    pub fn section(view: MetadataView) -> Self {
        Entry {
            value: Value::Section(view),
            unit: None,
        }
    }

    pub fn with_unit<S: Into<String>>(mut self, unit: Option<S>) -> Self {
        self.unit = unit.map(Into::into).filter(|u: &String| !u.is_empty());
        self
    }

    /// Numeric value of the entry. Text values are parsed
    /// leniently: the leading float is used and any suffix
    /// is ignored.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => Some(*n),
            Value::Text(s) => leading_float(s),
            Value::Section(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_section(&self) -> Option<&MetadataView> {
        match &self.value {
            Value::Section(v) => Some(v),
            _ => None,
        }
    }
}

fn leading_float(s: &str) -> Option<f64> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap();
    }
    let s = s.trim();
    s.parse()
        .ok()
        .or_else(|| RE.find(s).and_then(|m| m.as_str().parse().ok()))
}

/// Ordered label → [`Entry`] mapping.
///
/// Labels are unique: inserting an existing label stores the
/// entry under `label_01`, `label_02`, … instead.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataView {
    entries: Vec<(String, Entry)>,
}

impl MetadataView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry and return the label it was stored
    /// under.
    pub fn insert<S: Into<String>>(&mut self, label: S, entry: Entry) -> String {
        let label = label.into();
        let label = if self.get(&label).is_none() {
            label
        } else {
            (1..)
                .map(|n| format!("{}_{:02}", label, n))
                .find(|l| self.get(l).is_none())
                .unwrap_or_else(|| unreachable!())
        };
        self.entries.push((label.clone(), entry));
        label
    }

    pub fn get(&self, label: &str) -> Option<&Entry> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, e)| e)
    }

    pub(crate) fn get_mut(&mut self, label: &str) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|(l, _)| l == label)
            .map(|(_, e)| e)
    }

    /// Follow `path` through nested sections.
    pub fn get_path(&self, path: &[&str]) -> Option<&Entry> {
        let (last, parents) = path.split_last()?;
        let mut view = self;
        for label in parents {
            view = view.get(label)?.as_section()?;
        }
        view.get(last)
    }

    pub fn number(&self, path: &[&str]) -> Option<f64> {
        self.get_path(path)?.as_f64()
    }

    pub fn text(&self, path: &[&str]) -> Option<&str> {
        self.get_path(path)?.as_str()
    }

    pub fn section(&self, path: &[&str]) -> Option<&MetadataView> {
        self.get_path(path)?.as_section()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(l, e)| (l.as_str(), e))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    fn write_entries(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        for (label, entry) in self.iter() {
            match &entry.value {
                Value::Section(view) => {
                    writeln!(f, "{}{}:", prefix, label)?;
                    view.write_entries(f, &format!("{}   ", prefix))?;
                }
                Value::Text(s) => write_leaf(f, prefix, label, s, entry.unit.as_deref())?,
                Value::Number(n) => write_leaf(f, prefix, label, n, entry.unit.as_deref())?,
            }
        }
        Ok(())
    }
}

fn write_leaf<V: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    prefix: &str,
    label: &str,
    value: V,
    unit: Option<&str>,
) -> fmt::Result {
    match unit {
        Some(unit) => writeln!(f, "{}{} = {} {}", prefix, label, value, unit),
        None => writeln!(f, "{}{} = {}", prefix, label, value),
    }
}

const RULE: &str = "-----------------------------------------------------";

impl fmt::Display for MetadataView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "METADATA")?;
        writeln!(f, "{}", RULE)?;
        self.write_entries(f, "")?;
        writeln!(f, "{}", RULE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_labels_get_suffix() {
        let mut view = MetadataView::new();
        assert_eq!(view.insert("Mode", Entry::text("a")), "Mode");
        assert_eq!(view.insert("Mode", Entry::text("b")), "Mode_01");
        assert_eq!(view.insert("Mode", Entry::text("c")), "Mode_02");
        assert_eq!(view.len(), 3);
        assert_eq!(view.text(&["Mode"]), Some("a"));
        assert_eq!(view.text(&["Mode_02"]), Some("c"));
    }

    #[test]
    fn lenient_numbers() {
        assert_eq!(Entry::text(" 1.5e-9 ").as_f64(), Some(1.5e-9));
        assert_eq!(Entry::text("20.00 kV").as_f64(), Some(20.0));
        assert_eq!(Entry::text(".5").as_f64(), Some(0.5));
        assert_eq!(Entry::text("n/a").as_f64(), None);
    }

    #[test]
    fn nested_paths() {
        let mut inner = MetadataView::new();
        inner.insert("PixelWidth", Entry::text("2e-9"));
        let mut view = MetadataView::new();
        view.insert("Scan", Entry::section(inner));
        assert_eq!(view.number(&["Scan", "PixelWidth"]), Some(2e-9));
        assert!(view.get_path(&["Scan", "PixelHeight"]).is_none());
        assert!(view.get_path(&["PixelWidth", "Scan"]).is_none());
        assert!(view.get_path(&[]).is_none());
    }

    #[test]
    fn locate_blocks() {
        let raw = b"\x00\x01junk<Root><a/></Root>tail[User]\r\nDate=1\r\n\x00more";
        let root = Marker {
            start: "<Root",
            end: BlockEnd::Tag("</Root>"),
        };
        assert_eq!(locate(raw, &root).as_deref(), Some("<Root><a/></Root>"));
        let user = Marker {
            start: "[User]",
            end: BlockEnd::Nul,
        };
        assert_eq!(locate(raw, &user).as_deref(), Some("[User]\r\nDate=1\r\n"));
        let missing = Marker {
            start: "<?xml",
            end: BlockEnd::Tag("</Metadata>"),
        };
        assert!(locate(raw, &missing).is_none());
    }

    #[test]
    fn locate_line_end() {
        let raw = b"[DatabarData]\nflMagn=0.5\nIonBright3=7\nrest";
        let marker = Marker {
            start: "[DatabarData]",
            end: BlockEnd::Line("IonBright3"),
        };
        assert_eq!(
            locate(raw, &marker).as_deref(),
            Some("[DatabarData]\nflMagn=0.5\nIonBright3=7\n")
        );
    }

    #[test]
    fn display_lists_sections() {
        let mut stage = MetadataView::new();
        stage.insert("X", Entry::text("1.0").with_unit(Some("mm")));
        let mut view = MetadataView::new();
        view.insert("Stage", Entry::section(stage));
        let printed = view.to_string();
        assert!(printed.contains("METADATA"));
        assert!(printed.contains("Stage:\n   X = 1.0 mm\n"));
    }
}
