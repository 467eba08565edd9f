//! Reading pixel data, TIFF tags and raw bytes from files.
//!
//! Decoding is delegated to an [`ImageLoader`]; the crate
//! ships [`TiffLoader`], built on the `tiff` crate. Vendor
//! footers are located later in [`LoadedImage::raw`], so the
//! loader keeps the file bytes around.
use std::{
    collections::BTreeMap,
    fs::read,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array2, Array3, Axis};
use tiff::{
    decoder::{ifd::Value, Decoder, DecodingResult},
    tags::Tag,
    ColorType,
};

use crate::{
    error::Error,
    metadata::{ResolutionUnit, TagTuple},
};

pub const IMAGE_DESCRIPTION: u16 = 270;
pub const X_RESOLUTION: u16 = 282;
pub const Y_RESOLUTION: u16 = 283;
pub const RESOLUTION_UNIT: u16 = 296;
/// FEI/Philips XL30 metadata text.
pub const FEI_SFEG: u16 = 34680;
/// FEI Helios metadata text.
pub const FEI_HELIOS: u16 = 34682;

const COLLECTED_TAGS: [u16; 6] = [
    IMAGE_DESCRIPTION,
    X_RESOLUTION,
    Y_RESOLUTION,
    RESOLUTION_UNIT,
    FEI_SFEG,
    FEI_HELIOS,
];

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Rational(u32, u32),
    Integer(u64),
    Float(f64),
    Text(String),
}

/// The subset of low-level tags the resolvers look at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagTable {
    entries: BTreeMap<u16, TagValue>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: u16, value: TagValue) {
        self.entries.insert(tag, value);
    }

    pub fn get(&self, tag: u16) -> Option<&TagValue> {
        self.entries.get(&tag)
    }

    pub fn text(&self, tag: u16) -> Option<&str> {
        match self.get(tag)? {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, tag: u16) -> Option<u64> {
        match self.get(tag)? {
            TagValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The resolution rational of `tag` together with the
    /// `ResolutionUnit` (TIFF default: inch).
    pub fn resolution(&self, tag: u16) -> Option<TagTuple> {
        let (numerator, denominator) = match self.get(tag)? {
            TagValue::Rational(n, d) => (*n, *d),
            TagValue::Integer(n) => (u32::try_from(*n).ok()?, 1),
            _ => return None,
        };
        let unit = match self.integer(RESOLUTION_UNIT) {
            Some(v) => ResolutionUnit::from_tag(v)?,
            None => ResolutionUnit::Inch,
        };
        Some(TagTuple {
            numerator,
            denominator,
            unit,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of an [`ImageLoader`].
pub struct LoadedImage {
    /// frame × height × width; single images have one frame.
    pub frames: Array3<f64>,
    pub tags: TagTable,
    /// The complete file, for locating metadata footers.
    pub raw: Vec<u8>,
}

pub trait ImageLoader {
    fn load(&self, path: &Path) -> Result<LoadedImage>;
}

/// Find the file for `path`, appending `.tif` when the bare
/// name does not exist.
pub fn resolve_path(path: &Path) -> Result<PathBuf, Error> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let mut with_ext = path.as_os_str().to_owned();
    with_ext.push(".tif");
    let with_ext = PathBuf::from(with_ext);
    if with_ext.exists() {
        return Ok(with_ext);
    }
    Err(Error::FileNotFound(path.to_path_buf()))
}

/// Reads (multi-page) greyscale or colour TIFF files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffLoader;

impl ImageLoader for TiffLoader {
    fn load(&self, path: &Path) -> Result<LoadedImage> {
        let path = resolve_path(path)?;
        let raw = read(&path).with_context(|| format!("reading {}", path.display()))?;
        let (frames, tags) =
            decode_tiff(&raw).with_context(|| format!("decoding {}", path.display()))?;
        Ok(LoadedImage { frames, tags, raw })
    }
}

/// Decode every page of the same size as the first one.
pub fn decode_tiff(raw: &[u8]) -> Result<(Array3<f64>, TagTable)> {
    let mut decoder = Decoder::new(Cursor::new(raw))?;
    let tags = collect_tags(&mut decoder)?;
    let (width, height) = decoder.dimensions()?;

    let mut pages = vec![decode_page(&mut decoder)?];
    while decoder.more_images() {
        decoder.next_image()?;
        if decoder.dimensions()? != (width, height) {
            log::debug!("skipping TIFF page with different dimensions");
            continue;
        }
        pages.push(decode_page(&mut decoder)?);
    }

    let views: Vec<_> = pages.iter().map(|p| p.view()).collect();
    let frames = ndarray::stack(Axis(0), &views)?;
    Ok((frames, tags))
}

fn collect_tags<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<TagTable> {
    let mut table = TagTable::new();
    for &code in COLLECTED_TAGS.iter() {
        if let Some(value) = decoder.find_tag(Tag::from_u16_exhaustive(code))? {
            if let Some(value) = tag_value(value) {
                table.insert(code, value);
            }
        }
    }
    Ok(table)
}

fn tag_value(value: Value) -> Option<TagValue> {
    Some(match value {
        Value::Byte(v) => TagValue::Integer(v as u64),
        Value::Short(v) => TagValue::Integer(v as u64),
        Value::Unsigned(v) => TagValue::Integer(v as u64),
        Value::UnsignedBig(v) => TagValue::Integer(v),
        Value::Float(v) => TagValue::Float(v as f64),
        Value::Double(v) => TagValue::Float(v),
        Value::Rational(n, d) => TagValue::Rational(n, d),
        Value::Ascii(s) => TagValue::Text(s),
        Value::List(values) => {
            // vendor text tags are sometimes stored as byte lists
            let bytes: Option<Vec<u8>> = values
                .into_iter()
                .map(|v| match v {
                    Value::Byte(b) => Some(b),
                    _ => None,
                })
                .collect();
            TagValue::Text(String::from_utf8_lossy(&bytes?).into_owned())
        }
        _ => return None,
    })
}

fn decode_page<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Array2<f64>> {
    let (width, height) = decoder.dimensions()?;
    let width = width as usize;
    let height = height as usize;
    let channels = match decoder.colortype()? {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => bail!("unsupported color type: {:?}", other),
    };

    // unsigned samples deeper than 8 bits are reduced to 0-255
    let samples: Vec<f64> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => scaled(v.into_iter().map(f64::from), u16::MAX as f64),
        DecodingResult::U32(v) => scaled(v.into_iter().map(f64::from), u32::MAX as f64),
        DecodingResult::U64(v) => scaled(v.into_iter().map(|x| x as f64), u64::MAX as f64),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => bail!("unsupported sample format"),
    };
    ensure!(
        samples.len() == width * height * channels,
        "pixel data size mismatch: expected {} samples, found {}",
        width * height * channels,
        samples.len()
    );

    let page = Array3::from_shape_vec((height, width, channels), samples)?;
    Ok(to_grey(page))
}

fn scaled<I: Iterator<Item = f64>>(samples: I, max: f64) -> Vec<f64> {
    samples.map(|v| v * 255. / max).collect()
}

/// Collapse a height × width × channels array to grey by
/// averaging the colour channels (alpha is ignored).
pub(crate) fn to_grey(page: Array3<f64>) -> Array2<f64> {
    let channels = page.len_of(Axis(2));
    let colour = match channels {
        2 => 1,
        4 => 3,
        n => n,
    };
    page.slice_axis(Axis(2), (0..colour).into())
        .mean_axis(Axis(2))
        .unwrap_or_else(|| page.index_axis(Axis(2), 0).to_owned())
}
