//! TIFF resolution tags as a pixel size.
//!
//! `XResolution` is a rational `numerator / denominator`
//! giving pixels per `ResolutionUnit`, so one pixel spans
//! `unit_length * denominator / numerator`.
//!
//! As a raw blob the tuple is stored the way a TIFF stores
//! it: a byte order mark (`II` or `MM`), the two `u32`s of
//! the rational and the `u16` resolution unit.
use std::io::Cursor;

use byteordered::{ByteOrdered, Endianness};

use super::{Entry, MetadataView};
use crate::error::{Error, Result};

/// Values of the TIFF `ResolutionUnit` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionUnit {
    None,
    Inch,
    Centimeter,
}

impl ResolutionUnit {
    pub fn from_tag(value: u64) -> Option<Self> {
        match value {
            1 => Some(ResolutionUnit::None),
            2 => Some(ResolutionUnit::Inch),
            3 => Some(ResolutionUnit::Centimeter),
            _ => None,
        }
    }

    pub fn tag(self) -> u16 {
        match self {
            ResolutionUnit::None => 1,
            ResolutionUnit::Inch => 2,
            ResolutionUnit::Centimeter => 3,
        }
    }

    /// Length of the unit in meters; `None` for unitless
    /// resolutions.
    pub fn meters(self) -> Option<f64> {
        match self {
            ResolutionUnit::None => None,
            ResolutionUnit::Inch => Some(0.0254),
            ResolutionUnit::Centimeter => Some(0.01),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagTuple {
    pub numerator: u32,
    pub denominator: u32,
    pub unit: ResolutionUnit,
}

/// Meters per pixel for a resolution tag. `None` when the
/// resolution carries no physical unit or is degenerate.
pub fn meters_per_pixel(tuple: &TagTuple) -> Option<f64> {
    let base = tuple.unit.meters()?;
    if tuple.numerator == 0 || tuple.denominator == 0 {
        return None;
    }
    Some(base * tuple.denominator as f64 / tuple.numerator as f64)
}

/// Encode a tuple as a little endian blob for [`parse`](super::parse).
pub fn encode_tag_tuple(tuple: &TagTuple) -> Vec<u8> {
    let mut out = b"II".to_vec();
    out.extend_from_slice(&tuple.numerator.to_le_bytes());
    out.extend_from_slice(&tuple.denominator.to_le_bytes());
    out.extend_from_slice(&tuple.unit.tag().to_le_bytes());
    out
}

fn decode(raw: &[u8]) -> Result<TagTuple> {
    let endianness = match raw.get(..2) {
        Some(b"II") => Endianness::Little,
        Some(b"MM") => Endianness::Big,
        _ => return Err(Error::MetadataNotFound("TIFF resolution")),
    };
    if raw.len() < 12 {
        return Err(Error::MalformedMetadata(format!(
            "resolution tuple too short: expected 12 bytes, found {}",
            raw.len()
        )));
    }

    let mut rdr = ByteOrdered::runtime(Cursor::new(&raw[2..]), endianness);
    let numerator = rdr.read_u32()?;
    let denominator = rdr.read_u32()?;
    let unit = rdr.read_u16()?;
    let unit = ResolutionUnit::from_tag(unit as u64).ok_or_else(|| {
        Error::MalformedMetadata(format!("unknown resolution unit {}", unit))
    })?;
    Ok(TagTuple {
        numerator,
        denominator,
        unit,
    })
}

pub(super) fn parse(raw: &[u8]) -> Result<MetadataView> {
    let tuple = decode(raw)?;
    let mut view = MetadataView::new();
    view.insert(
        "Resolution",
        Entry::text(format!("{}/{}", tuple.numerator, tuple.denominator)),
    );
    if let Some(size) = meters_per_pixel(&tuple) {
        view.insert("PixelSize", Entry::number(size).with_unit(Some("m")));
    }
    Ok(view)
}
