//! Turning a loaded image into a calibrated pixel size.
//!
//! An instrument lists the ways its files may carry the
//! calibration as a chain of [`Strategy`] values. [`resolve`]
//! tries them in order: a strategy that does not apply
//! returns `Ok(None)` and the next one is tried, while errors
//! abort the chain. Chains end in [`Strategy::Manual`], which
//! always produces a value.
use std::fmt;

use anyhow::Result;
use image::{imageops, GrayImage, Luma};
use imageproc::{
    contrast::{otsu_level, threshold, ThresholdType},
    distance_transform::Norm,
    morphology::erode,
};
use log::{info, warn};
use ndarray::{s, ArrayView2};
use serde_derive::*;

use crate::{
    contour::find_contours,
    error::Error,
    loader::{TagTable, X_RESOLUTION, Y_RESOLUTION},
    metadata::{meters_per_pixel, MetadataView},
    ocr::{parse_reading, OcrError, TextRecognizer, SCALE_BAR_WHITELIST},
    prompt::{ask_number, ask_unit, Prompt},
    units::{convert, PhysicalLength, ThresholdScheme, Unit},
};

/// Physical size of one pixel, possibly different along x
/// and y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
    pub unit: Unit,
}

impl PixelSize {
    pub fn isotropic(value: f64, unit: Unit) -> Self {
        PixelSize {
            x: value,
            y: value,
            unit,
        }
    }

    /// From sizes in meters, in the unit `scheme` picks for
    /// the x size.
    pub fn from_meters(x: f64, y: f64, scheme: ThresholdScheme) -> Self {
        PixelSize {
            x,
            y,
            unit: Unit::Meter,
        }
        .to(scheme.choose_unit(x))
    }

    pub fn is_isotropic(&self) -> bool {
        self.x == self.y
    }

    pub fn to(self, unit: Unit) -> Self {
        PixelSize {
            x: convert(self.x, self.unit, unit),
            y: convert(self.y, self.unit, unit),
            unit,
        }
    }

    pub fn x_length(&self) -> PhysicalLength {
        PhysicalLength::new(self.x, self.unit)
    }
}

impl fmt::Display for PixelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_isotropic() {
            write!(f, "{:.5} {}", self.x, self.unit)
        } else {
            write!(f, "{:.6} × {:.6} {}", self.x, self.y, self.unit)
        }
    }
}

/// Where a structured pixel size gets its unit from.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitSource {
    /// Values are in meters; the instrument's threshold scheme
    /// picks the unit.
    Meters,
    Fixed(Unit),
    /// The `unit` attribute of the value entries.
    Attribute,
    /// Companion fields holding the unit symbol of x and y.
    /// The values are converted to meters and rescaled like
    /// [`UnitSource::Meters`].
    Field {
        x: &'static [&'static str],
        y: &'static [&'static str],
    },
}

/// Location of a pixel size pair in a [`MetadataView`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPath {
    pub x: &'static [&'static str],
    pub y: &'static [&'static str],
    pub unit: UnitSource,
}

/// Which tick corners of a burned-in scale bar delimit its
/// length. Older and newer databars draw the ticks
/// differently, and the choices give different results on
/// the same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BarMeasurement {
    /// Corners 1 and 7 of the bar outline.
    Legacy,
    /// Corners 1 and 9.
    Standard,
    /// Corners 1 and 10.
    Extended,
}

impl BarMeasurement {
    pub fn corners(self) -> (usize, usize) {
        match self {
            BarMeasurement::Legacy => (1, 7),
            BarMeasurement::Standard => (1, 9),
            BarMeasurement::Extended => (1, 10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// TIFF `XResolution`/`YResolution` with `ResolutionUnit`.
    DirectTag,
    /// Known metadata fields, tried in order.
    Structured(Vec<SchemaPath>),
    /// Measure the scale bar burned into the databar.
    ScaleBar(BarMeasurement),
    /// Ask for the pixel size in the given unit.
    Manual(Unit),
}

/// The scale bar found in a databar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBarReading {
    pub length: PhysicalLength,
    pub length_px: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub pixel_size: PixelSize,
    pub scale_bar: Option<ScaleBarReading>,
}

impl From<PixelSize> for Resolution {
    fn from(pixel_size: PixelSize) -> Self {
        Resolution {
            pixel_size,
            scale_bar: None,
        }
    }
}

/// Everything a strategy may look at. The prompt is borrowed
/// separately so a caller can keep it after resolving.
pub struct Context<'a, 'p> {
    pub tags: &'a TagTable,
    pub metadata: Option<&'a MetadataView>,
    pub databar: Option<ArrayView2<'a, f64>>,
    /// Width of the full image, which sets the scale of the
    /// databar.
    pub width: usize,
    pub scheme: ThresholdScheme,
    pub prompt: &'p mut dyn Prompt,
    pub recognizer: &'a dyn TextRecognizer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Express the result in this unit instead of the one the
    /// strategy picked.
    pub unit: Option<Unit>,
}

/// Run `strategies` in order and return the first pixel size
/// found.
pub fn resolve(
    ctx: &mut Context,
    strategies: &[Strategy],
    opts: &ResolveOptions,
) -> Result<Resolution> {
    for strategy in strategies {
        let found = match strategy {
            Strategy::DirectTag => Ok(direct_tag(ctx).map(Resolution::from)),
            Strategy::Structured(paths) => Ok(structured(ctx, paths).map(Resolution::from)),
            Strategy::ScaleBar(measurement) => scale_bar(ctx, *measurement),
            Strategy::Manual(unit) => manual(ctx, *unit).map(|size| Some(size.into())),
        }?;
        if let Some(mut resolution) = found {
            if let Some(unit) = opts.unit {
                resolution.pixel_size = resolution.pixel_size.to(unit);
            }
            let size = &resolution.pixel_size;
            info!("Pixel size x: {:.6} {}", size.x, size.unit);
            info!("Pixel size y: {:.6} {}", size.y, size.unit);
            return Ok(resolution);
        }
        log::debug!("{:?} does not apply", strategy);
    }
    Err(Error::MetadataNotFound("pixel size").into())
}

fn direct_tag(ctx: &Context) -> Option<PixelSize> {
    let x = meters_per_pixel(&ctx.tags.resolution(X_RESOLUTION)?)?;
    let y = ctx
        .tags
        .resolution(Y_RESOLUTION)
        .and_then(|tuple| meters_per_pixel(&tuple))
        .unwrap_or(x);
    Some(PixelSize::from_meters(x, y, ctx.scheme))
}

fn structured(ctx: &Context, paths: &[SchemaPath]) -> Option<PixelSize> {
    let metadata = ctx.metadata?;
    paths
        .iter()
        .find_map(|path| lookup(metadata, path, ctx.scheme))
}

fn lookup(metadata: &MetadataView, path: &SchemaPath, scheme: ThresholdScheme) -> Option<PixelSize> {
    let x_entry = metadata.get_path(path.x)?;
    let y_entry = metadata.get_path(path.y)?;
    let x = x_entry.as_f64()?;
    let y = y_entry.as_f64()?;

    let parse_pair = |x_unit: Option<&str>, y_unit: Option<&str>| -> Option<Unit> {
        let unit = Unit::parse(x_unit?).ok()?;
        if y_unit.map(Unit::parse).and_then(|u| u.ok()) != Some(unit) {
            warn!("units for x and y are not the same, using the x unit");
        }
        Some(unit)
    };

    Some(match &path.unit {
        UnitSource::Meters => PixelSize::from_meters(x, y, scheme),
        UnitSource::Fixed(unit) => PixelSize { x, y, unit: *unit },
        UnitSource::Attribute => {
            let unit = parse_pair(x_entry.unit.as_deref(), y_entry.unit.as_deref())?;
            PixelSize { x, y, unit }
        }
        UnitSource::Field {
            x: x_field,
            y: y_field,
        } => {
            let unit = parse_pair(metadata.text(x_field), metadata.text(y_field))?;
            PixelSize::from_meters(
                convert(x, unit, Unit::Meter),
                convert(y, unit, Unit::Meter),
                scheme,
            )
        }
    })
}

fn manual(ctx: &mut Context, unit: Unit) -> Result<PixelSize> {
    let value = ask_number(ctx.prompt, &format!("Please give pixel size in {}: ", unit))?;
    Ok(PixelSize::isotropic(value, unit))
}

fn scale_bar(ctx: &mut Context, measurement: BarMeasurement) -> Result<Option<Resolution>> {
    let databar = match ctx.databar {
        Some(databar) if !databar.is_empty() => databar,
        _ => {
            warn!("original scale bar not found");
            return Ok(Some(manual(ctx, Unit::Nanometer)?.into()));
        }
    };

    let contours = find_contours(databar);
    let (a, b) = measurement.corners();
    let bar = match contours.first() {
        Some(bar) => bar,
        None => {
            warn!("databar is empty, cannot measure the scale bar");
            return Ok(None);
        }
    };
    let length_px = match (bar.points.get(a), bar.points.get(b)) {
        (Some(pa), Some(pb)) if pb.0 > pa.0 => (pb.0 - pa.0) as f64,
        _ => {
            warn!(
                "scale bar outline has no usable corners {} and {} ({} corners found)",
                a,
                b,
                bar.points.len()
            );
            return Ok(None);
        }
    };
    log::debug!("scale bar is {} pixels long", length_px);

    let text = if contours.len() > 1 {
        let pad = 6 * ctx.width / 1024;
        let x0 = contours[1].min_x().saturating_sub(pad);
        let x1 = contours[contours.len() - 1].max_x() + pad + 1;
        let x1 = x1.min(databar.ncols());
        let image = prepare_for_ocr(databar.slice(s![.., x0..x1]), ctx.width);
        ctx.recognizer
            .recognize(&image, SCALE_BAR_WHITELIST)
            .and_then(|text| parse_reading(&text))
    } else {
        Err(OcrError::Unreadable("no text next to the scale bar".into()))
    };

    let (value, unit) = match text {
        Ok(reading) => reading,
        Err(e) => {
            match &e {
                OcrError::NotInstalled => {
                    warn!("no text recognizer available to read the scale bar")
                }
                OcrError::EngineNotFound(name) => warn!(
                    "text recognition engine `{}` is not installed or not on the PATH",
                    name
                ),
                OcrError::Unreadable(text) => warn!("could not read scale bar text {}", text),
            }
            let unit = ask_unit(ctx.prompt, "give scale bar unit: ")?;
            let value = ask_number(ctx.prompt, &format!("give scale bar size in {}: ", unit))?;
            (value, unit)
        }
    };

    info!("Original scale bar: {} {}", value, unit);
    Ok(Some(Resolution {
        pixel_size: PixelSize::isotropic(value / length_px, unit),
        scale_bar: Some(ScaleBarReading {
            length: PhysicalLength::new(value, unit),
            length_px,
        }),
    }))
}

/// Enlarge, binarise and thicken small databar text so the
/// recognizer can read it.
fn prepare_for_ocr(region: ArrayView2<f64>, width: usize) -> GrayImage {
    let (h, w) = region.dim();
    let image = GrayImage::from_fn(w as u32, h as u32, |x, y| {
        Luma([region[(y as usize, x as usize)].round().clamp(0., 255.) as u8])
    });
    let factor = match width {
        w if w < 2048 => 4,
        w if w < 4096 => 2,
        _ => return image,
    };
    let image = imageops::resize(
        &image,
        factor * w as u32,
        factor * h as u32,
        imageops::FilterType::CatmullRom,
    );
    let image = threshold(&image, otsu_level(&image), ThresholdType::Binary);
    erode(&image, Norm::LInf, 2)
}
