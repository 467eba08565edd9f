//! Exporting an image with a scale bar.
//!
//! [`export`] runs a fixed pipeline: preprocessing, colour
//! collapse, crop, intensity mapping, resizing, then the box,
//! bar and label. The raster is complete in memory before
//! anything is written, and writing over the source file is
//! refused before any work is done.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use image::{imageops, GrayImage, Luma};
use itertools::iproduct;
use log::{info, warn};
use ndarray::{s, Array2, ArrayD, ArrayView2, ArrayViewD, Ix2, Ix3};
use serde_derive::*;

use crate::{
    error::Error,
    font::Font,
    layout::{layout, LayoutOptions, ScaleBarLayout},
    loader::to_grey,
    units::PhysicalLength,
};

/// Region of the image to keep. Negative coordinates count
/// from the right or bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Crop {
    Corners { x0: i64, y0: i64, x1: i64, y1: i64 },
    Rect { x: i64, y: i64, width: i64, height: i64 },
}

impl Crop {
    /// `(x0, y0, x1, y1)` within a `width` × `height` image.
    fn bounds(&self, width: usize, height: usize) -> Result<(usize, usize, usize, usize), Error> {
        fn coord(c: i64, n: usize) -> usize {
            let c = if c < 0 { n as i64 + c } else { c };
            c.clamp(0, n as i64) as usize
        }
        let (x0, y0, x1, y1) = match *self {
            Crop::Corners { x0, y0, x1, y1 } => {
                (coord(x0, width), coord(y0, height), coord(x1, width), coord(y1, height))
            }
            Crop::Rect {
                x,
                y,
                width: w,
                height: h,
            } => {
                if w <= 0 || h <= 0 {
                    return Err(Error::InvalidArgument(format!(
                        "crop size must be positive, got {} × {}",
                        w, h
                    )));
                }
                let (x0, y0) = (coord(x, width), coord(y, height));
                (x0, y0, (x0 + w as usize).min(width), (y0 + h as usize).min(height))
            }
        };
        if x1 <= x0 || y1 <= y0 {
            return Err(Error::InvalidArgument(format!("{:?} leaves an empty image", self)));
        }
        Ok((x0, y0, x1, y1))
    }
}

/// How pixel values are mapped to 0–255.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intensity {
    /// Values are clipped to 0–255.
    Unchanged,
    /// Stretch from the minimum to the maximum.
    MinMax,
    /// Stretch between the 0.01 and 99.99 percentiles.
    Automatic,
    Range(f64, f64),
}

impl Default for Intensity {
    fn default() -> Self {
        Intensity::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    #[serde(flatten)]
    pub layout: LayoutOptions,
    pub crop: Option<Crop>,
    pub intensity: Intensity,
    pub draw_bar: bool,
    pub draw_text: bool,
    /// Output path; `<source stem>_scalebar.png` when absent.
    pub filename: Option<PathBuf>,
    pub save: bool,
    /// Also write every option to `<stem>_settings.txt`.
    pub store_settings: bool,
    /// TrueType font for the label; a built-in bitmap font is
    /// used otherwise.
    pub font: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            layout: LayoutOptions::default(),
            crop: None,
            intensity: Intensity::Unchanged,
            draw_bar: true,
            draw_text: true,
            filename: None,
            save: true,
            store_settings: false,
            font: None,
        }
    }
}

impl ExportOptions {
    /// Read options from a JSON file. Missing keys keep their
    /// defaults.
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let opts = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing export options in {}", path.display()))?;
        Ok(opts)
    }
}

pub struct Exported {
    pub image: GrayImage,
    pub layout: ScaleBarLayout,
    /// Where the image was written, if it was saved.
    pub path: Option<PathBuf>,
    pub settings: Option<PathBuf>,
}

/// A caller supplied transformation of the raw pixels. It
/// must not change their shape.
pub type Preprocess<'a> = &'a dyn Fn(ArrayViewD<f64>) -> ArrayD<f64>;

/// Fail if `opts` would write over `source`.
pub fn check_overwrite(opts: &ExportOptions, source: Option<&Path>) -> Result<(), Error> {
    if let (Some(target), Some(source)) = (&opts.filename, source) {
        let same = target == source
            || match (target.canonicalize(), source.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
        if same {
            return Err(Error::Overwrite(target.clone()));
        }
    }
    Ok(())
}

pub fn export(
    pixels: ArrayViewD<f64>,
    pixel_size: PhysicalLength,
    opts: &ExportOptions,
    source: Option<&Path>,
) -> Result<Exported> {
    export_with(pixels, pixel_size, opts, source, None)
}

pub fn export_with(
    pixels: ArrayViewD<f64>,
    pixel_size: PhysicalLength,
    opts: &ExportOptions,
    source: Option<&Path>,
    preprocess: Option<Preprocess>,
) -> Result<Exported> {
    check_overwrite(opts, source)?;
    let output = if opts.save {
        Some(output_path(opts, source)?)
    } else {
        None
    };

    let pixels = match preprocess {
        Some(f) => {
            let processed = f(pixels.view());
            if processed.shape() != pixels.shape() {
                return Err(Error::InvalidArgument(format!(
                    "preprocessing changed the image shape from {:?} to {:?}",
                    pixels.shape(),
                    processed.shape()
                ))
                .into());
            }
            processed
        }
        None => pixels.to_owned(),
    };
    let grey = single_channel(pixels)?;

    let grey = match &opts.crop {
        Some(crop) => {
            let (height, width) = grey.dim();
            let (x0, y0, x1, y1) = crop.bounds(width, height)?;
            let cropped = grey.slice(s![y0..y1, x0..x1]).to_owned();
            let (h, w) = cropped.dim();
            info!(
                "cropped to {} × {} pixels, {:.4} × {:.4} {}",
                h,
                w,
                h as f64 * pixel_size.value,
                w as f64 * pixel_size.value,
                pixel_size.unit
            );
            cropped
        }
        None => grey,
    };

    let (height, width) = grey.dim();
    let font = match &opts.font {
        Some(path) => Font::from_path(path)?,
        None => Font::Builtin,
    };
    let geometry = layout(pixel_size, width, height, &opts.layout, &font)?;

    let mut canvas = to_image(map_intensity(grey.view(), opts.intensity)?.view());
    if (geometry.width, geometry.height) != canvas.dimensions() {
        canvas = imageops::resize(
            &canvas,
            geometry.width,
            geometry.height,
            imageops::FilterType::Triangle,
        );
    }

    if opts.layout.draw_box {
        blend_box(&mut canvas, &geometry, opts.layout.box_alpha, opts.layout.invert);
    }
    if opts.draw_bar {
        let bar = geometry.bar_rect;
        fill_rect(
            &mut canvas,
            (bar.x as i64, bar.y as i64),
            ((bar.x + bar.w) as i64, (bar.y + bar.h) as i64),
            geometry.color,
        );
    }
    if opts.draw_text {
        font.draw(
            &mut canvas,
            &geometry.text,
            geometry.text_pos.0 as i32,
            geometry.text_pos.1 as i32,
            geometry.font_size,
            geometry.color,
        );
    }

    let mut settings = None;
    if let Some(path) = &output {
        write_png(path, &canvas)?;
        info!("scale bar image written to {}", path.display());
        if opts.store_settings {
            let sidecar = settings_path(path, source);
            write_settings(&sidecar, opts, pixel_size)?;
            settings = Some(sidecar);
        }
    }

    Ok(Exported {
        image: canvas,
        layout: geometry,
        path: output,
        settings,
    })
}

fn output_path(opts: &ExportOptions, source: Option<&Path>) -> Result<PathBuf, Error> {
    if let Some(filename) = &opts.filename {
        return Ok(filename.clone());
    }
    let source = source.ok_or_else(|| {
        Error::InvalidArgument("a filename is needed to save an image without a source file".into())
    })?;
    let name = match source.file_stem() {
        Some(stem) => format!("{}_scalebar.png", stem.to_string_lossy()),
        None => "scalebar.png".to_string(),
    };
    Ok(source.with_file_name(name))
}

fn settings_path(output: &Path, source: Option<&Path>) -> PathBuf {
    let name = match source.and_then(|s| s.file_stem()).or_else(|| output.file_stem()) {
        Some(stem) => format!("{}_settings.txt", stem.to_string_lossy()),
        None => "scalebar_settings.txt".to_string(),
    };
    output.with_file_name(name)
}

/// Collapse trailing colour channels to grey.
fn single_channel(pixels: ArrayD<f64>) -> Result<Array2<f64>> {
    let shape = pixels.shape().to_vec();
    match shape.as_slice() {
        [_, _] => Ok(pixels.into_dimensionality::<Ix2>()?),
        [_, _, 3] | [_, _, 4] => {
            warn!("colour image converted to greyscale by averaging the channels");
            Ok(to_grey(pixels.into_dimensionality::<Ix3>()?))
        }
        shape => Err(Error::InvalidArgument(format!(
            "expected a single greyscale or colour image, got shape {:?}",
            shape
        ))
        .into()),
    }
}

/// Linear interpolation between closest ranks of sorted data.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q / 100. * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn map_intensity(image: ArrayView2<f64>, intensity: Intensity) -> Result<Array2<f64>, Error> {
    let range = match intensity {
        Intensity::Unchanged => None,
        Intensity::MinMax => {
            let min = image.iter().copied().fold(f64::INFINITY, f64::min);
            let max = image.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Some((min, max))
        }
        Intensity::Automatic => {
            let mut sorted: Vec<f64> = image.iter().copied().filter(|v| !v.is_nan()).collect();
            if sorted.is_empty() {
                None
            } else {
                sorted.sort_by(|a, b| a.total_cmp(b));
                Some((percentile(&sorted, 0.01), percentile(&sorted, 99.99)))
            }
        }
        Intensity::Range(lo, hi) => {
            if !(hi > lo) {
                return Err(Error::InvalidArgument(format!(
                    "intensity range must be increasing, got ({}, {})",
                    lo, hi
                )));
            }
            Some((lo, hi))
        }
    };

    Ok(match range {
        Some((lo, hi)) if hi > lo => image.mapv(|v| ((v - lo) / (hi - lo) * 255.).clamp(0., 255.)),
        Some(_) => {
            warn!("image has a single intensity, leaving values unscaled");
            image.mapv(|v| v.clamp(0., 255.))
        }
        None => image.mapv(|v| v.clamp(0., 255.)),
    })
}

fn to_image(image: ArrayView2<f64>) -> GrayImage {
    let (height, width) = image.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([image[(y as usize, x as usize)].round() as u8])
    })
}

/// Blend a white box (dark when inverted) over the image.
fn blend_box(canvas: &mut GrayImage, geometry: &ScaleBarLayout, alpha: f64, invert: bool) {
    let r = geometry.box_rect;
    let (width, height) = canvas.dimensions();
    let x0 = (r.x as i64).clamp(0, width as i64) as u32;
    let y0 = (r.y as i64).clamp(0, height as i64) as u32;
    let x1 = ((r.x + r.w) as i64).clamp(0, width as i64) as u32;
    let y1 = ((r.y + r.h) as i64).clamp(0, height as i64) as u32;
    let overlay = if invert { -255. * alpha } else { 255. * alpha };
    for (y, x) in iproduct!(y0..y1, x0..x1) {
        let p = canvas.get_pixel_mut(x, y);
        let v = p[0] as f64 * (1. - alpha) + overlay + 1.;
        p[0] = v.round().clamp(0., 255.) as u8;
    }
}

/// Fill the rectangle between two corners, both included.
fn fill_rect(canvas: &mut GrayImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: u8) {
    let (width, height) = canvas.dimensions();
    let rows = y0.max(0)..=y1.min(height as i64 - 1);
    let cols = x0.max(0)..=x1.min(width as i64 - 1);
    for (y, x) in iproduct!(rows, cols) {
        canvas.put_pixel(x as u32, y as u32, Luma([color]));
    }
}

fn write_png(path: &Path, image: &GrayImage) -> Result<()> {
    let writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    let mut encoder = png::Encoder::new(writer, image.width(), image.height());
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(image.as_raw())?;
    writer.finish()?;
    Ok(())
}

fn write_settings(path: &Path, opts: &ExportOptions, pixel_size: PhysicalLength) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    writeln!(out, "pixel_size = {}", pixel_size)?;
    if let serde_json::Value::Object(map) = serde_json::to_value(opts)? {
        for (key, value) in map {
            writeln!(out, "{} = {}", key, value)?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use ndarray::{Array3, IxDyn};
    use std::ffi::OsStr;
    use tempfile::tempdir;

    fn grey(width: usize, height: usize, value: f64) -> ArrayD<f64> {
        ArrayD::from_elem(IxDyn(&[height, width]), value)
    }

    fn nm(value: f64) -> PhysicalLength {
        PhysicalLength::new(value, Unit::Nanometer)
    }

    fn in_memory() -> ExportOptions {
        ExportOptions {
            save: false,
            ..Default::default()
        }
    }

    #[test]
    fn refuses_to_overwrite_source() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("image.tif");
        for save in [true, false] {
            for store_settings in [true, false] {
                let opts = ExportOptions {
                    filename: Some(source.clone()),
                    save,
                    store_settings,
                    ..Default::default()
                };
                let err = export(grey(64, 64, 100.).view(), nm(1.), &opts, Some(&source))
                    .err()
                    .unwrap();
                assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Overwrite(_))));
            }
        }
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn draws_box_bar_and_text() -> Result<()> {
        let out = export(grey(1024, 1024, 100.).view(), nm(2.), &in_memory(), None)?;
        assert_eq!(out.image.dimensions(), (1024, 1024));
        assert!(out.path.is_none());

        let l = &out.layout;
        assert_eq!(l.bar_px, 150.);
        // bar, inclusive corners
        let (bx, by) = (l.bar_rect.x as u32, l.bar_rect.y as u32);
        assert_eq!(out.image.get_pixel(bx, by)[0], 0);
        assert_eq!(out.image.get_pixel(bx + 150, by + 16)[0], 0);
        // box: 100 * 0.4 + 153 + 1
        let (x, y) = (l.box_rect.x as u32 + 1, l.box_rect.y as u32 + 1);
        assert_eq!(out.image.get_pixel(x, y)[0], 194);
        // outside
        assert_eq!(out.image.get_pixel(500, 500)[0], 100);
        // label
        let (tx, ty) = (l.text_pos.0 as u32, l.text_pos.1 as u32);
        let label_dark = (ty..ty + l.text_size.1 as u32)
            .flat_map(|y| (tx..tx + l.text_size.0 as u32).map(move |x| (x, y)))
            .any(|(x, y)| out.image.get_pixel(x, y)[0] == 0);
        assert!(label_dark);
        Ok(())
    }

    #[test]
    fn toggles() -> Result<()> {
        let opts = ExportOptions {
            draw_bar: false,
            draw_text: false,
            layout: LayoutOptions {
                draw_box: false,
                ..Default::default()
            },
            ..in_memory()
        };
        let out = export(grey(256, 256, 77.).view(), nm(2.), &opts, None)?;
        assert!(out.image.pixels().all(|p| p[0] == 77));
        Ok(())
    }

    #[test]
    fn inverted_box_is_dark() -> Result<()> {
        let opts = ExportOptions {
            layout: LayoutOptions {
                invert: true,
                ..Default::default()
            },
            ..in_memory()
        };
        let out = export(grey(512, 512, 200.).view(), nm(2.), &opts, None)?;
        let r = out.layout.box_rect;
        // 200 * 0.4 - 153 + 1 saturates at 0
        assert_eq!(out.image.get_pixel(r.x as u32 + 1, r.y as u32 + 1)[0], 0);
        assert_eq!(out.layout.color, 255);
        Ok(())
    }

    #[test]
    fn crop_forms() {
        let rect = Crop::Rect {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        };
        assert_eq!(rect.bounds(100, 100).unwrap(), (10, 20, 40, 60));
        let corners = Crop::Corners {
            x0: -30,
            y0: 0,
            x1: -10,
            y1: 50,
        };
        assert_eq!(corners.bounds(100, 80).unwrap(), (70, 0, 90, 50));
        let empty = Crop::Corners {
            x0: 50,
            y0: 0,
            x1: 10,
            y1: 10,
        };
        assert!(empty.bounds(100, 100).is_err());
    }

    #[test]
    fn crop_then_resize() -> Result<()> {
        let opts = ExportOptions {
            crop: Some(Crop::Rect {
                x: 0,
                y: 0,
                width: 400,
                height: 200,
            }),
            layout: LayoutOptions {
                resolution: Some(800),
                ..Default::default()
            },
            ..in_memory()
        };
        let out = export(grey(1024, 1024, 10.).view(), nm(1.), &opts, None)?;
        assert_eq!(out.image.dimensions(), (800, 400));
        // 0.15 * 400 nm -> 50 nm -> 50 px at the source size
        assert_eq!(out.layout.bar_size, nm(50.));
        assert_eq!(out.layout.bar_px, 100.);
        Ok(())
    }

    #[test]
    fn intensity_mapping() -> Result<()> {
        let image = ndarray::arr2(&[[10., 20.], [30., 50.]]);
        let minmax = map_intensity(image.view(), Intensity::MinMax)?;
        assert_eq!(minmax[(0, 0)], 0.);
        assert_eq!(minmax[(1, 1)], 255.);
        let range = map_intensity(image.view(), Intensity::Range(20., 30.))?;
        assert_eq!(range, ndarray::arr2(&[[0., 0.], [255., 255.]]));
        let clipped = map_intensity(ndarray::arr2(&[[-5., 300.]]).view(), Intensity::Unchanged)?;
        assert_eq!(clipped, ndarray::arr2(&[[0., 255.]]));
        assert!(map_intensity(image.view(), Intensity::Range(5., 5.)).is_err());
        Ok(())
    }

    #[test]
    fn automatic_percentiles() -> Result<()> {
        let values: Vec<f64> = (0..=10000).map(f64::from).collect();
        let image = Array2::from_shape_vec((1, values.len()), values)?;
        let mapped = map_intensity(image.view(), Intensity::Automatic)?;
        // 0.01 % and 99.99 % of 0..=10000 are 1 and 9999
        assert_eq!(mapped[(0, 0)], 0.);
        assert!(mapped[(0, 1)] < 1e-6);
        assert!(mapped[(0, 9999)] > 255. - 1e-6);
        assert_eq!(mapped[(0, 10000)], 255.);
        assert!((mapped[(0, 5000)] - 127.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn colour_input() -> Result<()> {
        let rgb = Array3::from_elem((64, 64, 3), 90.).into_dyn();
        let opts = ExportOptions {
            draw_bar: false,
            draw_text: false,
            layout: LayoutOptions {
                draw_box: false,
                ..Default::default()
            },
            ..in_memory()
        };
        let out = export(rgb.view(), nm(1.), &opts, None)?;
        assert_eq!(out.image.get_pixel(3, 3)[0], 90);

        let stack = Array3::<f64>::zeros((2, 64, 64)).into_dyn();
        assert!(export(stack.view(), nm(1.), &opts, None).is_err());
        Ok(())
    }

    #[test]
    fn preprocessing_must_keep_shape() -> Result<()> {
        let image = grey(64, 64, 10.);
        fn double(a: ArrayViewD<f64>) -> ArrayD<f64> {
            a.mapv(|v| v * 2.)
        }
        fn shrink(_: ArrayViewD<f64>) -> ArrayD<f64> {
            ArrayD::zeros(IxDyn(&[10, 10]))
        }
        let opts = ExportOptions {
            draw_bar: false,
            draw_text: false,
            layout: LayoutOptions {
                draw_box: false,
                ..Default::default()
            },
            ..in_memory()
        };
        let out = export_with(image.view(), nm(1.), &opts, None, Some(&double))?;
        assert_eq!(out.image.get_pixel(0, 0)[0], 20);
        assert!(export_with(image.view(), nm(1.), &opts, None, Some(&shrink)).is_err());
        Ok(())
    }

    #[test]
    fn saves_png_and_settings() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("sample.tif");
        let opts = ExportOptions {
            store_settings: true,
            ..Default::default()
        };
        let out = export(grey(128, 96, 50.).view(), nm(3.), &opts, Some(&source))?;
        let path = out.path.unwrap();
        assert_eq!(path, dir.path().join("sample_scalebar.png"));

        let decoded = image::open(&path)?.to_luma8();
        assert_eq!(decoded, out.image);

        let settings = std::fs::read_to_string(out.settings.unwrap())?;
        assert!(settings.contains("pixel_size = 3 nm"));
        assert!(settings.contains("loc = 2"));
        assert!(settings.contains("store_settings = true"));
        Ok(())
    }

    #[test]
    fn saving_needs_a_name() {
        let err = export(grey(64, 64, 0.).view(), nm(1.), &ExportOptions::default(), None)
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn nameless_source_gets_plain_names() -> Result<()> {
        let source = Path::new("dir/..");
        let out = output_path(&ExportOptions::default(), Some(source))?;
        assert_eq!(out.file_name(), Some(OsStr::new("scalebar.png")));
        let sidecar = settings_path(Path::new("/"), None);
        assert_eq!(sidecar.file_name(), Some(OsStr::new("scalebar_settings.txt")));
        Ok(())
    }

    #[test]
    fn options_from_partial_json() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("opts.json");
        std::fs::write(
            &path,
            r#"{"loc": 3, "unit": "um", "intensity": "automatic", "crop": {"rect": {"x": 0, "y": 0, "width": 10, "height": 10}}}"#,
        )?;
        let opts = ExportOptions::from_json_path(&path)?;
        assert_eq!(opts.layout.loc, 3);
        assert_eq!(opts.layout.unit, Some(Unit::Micrometer));
        assert_eq!(opts.intensity, Intensity::Automatic);
        assert!(opts.crop.is_some());
        assert!(opts.draw_bar);
        assert_eq!(opts.layout.box_alpha, 0.6);
        Ok(())
    }
}
