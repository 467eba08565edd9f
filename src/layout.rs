//! Scale bar geometry.
//!
//! All sizes are proportional to the output width relative to
//! a 1024 pixel reference image, so exports at different
//! resolutions look alike. The box holds the label on top and
//! the bar below it, both centred horizontally.
use std::borrow::Cow;

use serde_derive::*;

use crate::{
    error::{Error, Result},
    font::Font,
    units::{PhysicalLength, Unit},
};

const REFERENCE_WIDTH: f64 = 1024.;
const BAR_HEIGHT: f64 = 16.;
const BOX_PAD: f64 = 10.;
const BAR_PAD: f64 = 10.;
const TEXT_PAD: f64 = 2.;
const FONT_SIZE: f64 = 32.;
/// Lowering of the label height for the µ descender.
const MICRO_BASELINE: f64 = 6.;

const STANDARD: [f64; 32] = [
    0.1, 0.2, 0.3, 0.4, 0.5, 1., 2., 2.5, 3., 4., 5., 10., 20., 25., 30., 40., 50., 100., 200., 250.,
    300., 400., 500., 1000., 2000., 2500., 3000., 4000., 5000., 6000., 8000., 10000.,
];
const FINE: [f64; 38] = [
    0.01, 0.02, 0.025, 0.03, 0.04, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 1., 2., 2.5, 3., 4., 5., 10.,
    20., 25., 30., 40., 50., 100., 200., 250., 300., 400., 500., 1000., 2000., 2500., 3000.,
    4000., 5000., 6000., 8000., 10000.,
];

/// Candidate bar lengths, in the unit of the pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NiceValues {
    /// 0.1 to 10000.
    Standard,
    /// [`NiceValues::Standard`] extended down to 0.01.
    Fine,
    Custom(Vec<f64>),
}

impl NiceValues {
    pub fn values(&self) -> Cow<'_, [f64]> {
        match self {
            NiceValues::Standard => Cow::Borrowed(&STANDARD[..]),
            NiceValues::Fine => Cow::Borrowed(&FINE[..]),
            NiceValues::Custom(values) => Cow::Borrowed(values),
        }
    }
}

/// The value of `list` closest to `target`; the first one
/// wins a tie.
pub fn snap_nice(target: f64, list: &[f64]) -> Option<f64> {
    list.iter().copied().fold(None, |best, v| match best {
        Some(b) if (b - target).abs() <= (v - target).abs() => Some(b),
        _ => Some(v),
    })
}

/// Label for a bar of `value`: as an integer when possible,
/// else with the fewest decimals (up to three) that represent
/// it exactly.
pub fn format_bar_label(value: f64, unit: Unit) -> String {
    if value.round() == value {
        return format!("{} {}", value as i64, unit);
    }
    for decimals in 1..=3 {
        let factor = 10f64.powi(decimals);
        if (value * factor).round() / factor == value {
            return format!("{:.*} {}", decimals as usize, value, unit);
        }
    }
    format!("{:.3} {}", value, unit)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Bar length in the (possibly overridden) unit; chosen
    /// from the nice values when absent.
    pub bar_size: Option<f64>,
    /// Overall size of box, bar and label.
    pub scale: f64,
    /// Corner: 0 top left, 1 top right, 2 bottom left,
    /// 3 bottom right.
    pub loc: usize,
    /// Output width in pixels; the source width when absent.
    pub resolution: Option<u32>,
    pub draw_box: bool,
    pub box_alpha: f64,
    /// White bar and label on a darkened box.
    pub invert: bool,
    /// Express the pixel size (and bar) in this unit.
    pub unit: Option<Unit>,
    /// Target bar length as a fraction of the image width.
    pub fraction: f64,
    pub nice_values: Option<NiceValues>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            bar_size: None,
            scale: 1.,
            loc: 2,
            resolution: None,
            draw_box: true,
            box_alpha: 0.6,
            invert: false,
            unit: None,
            fraction: 0.15,
            nice_values: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBarLayout {
    pub bar_size: PhysicalLength,
    /// Bar length in output pixels.
    pub bar_px: f64,
    /// Output image size.
    pub width: u32,
    pub height: u32,
    pub box_rect: Rect,
    pub bar_rect: Rect,
    /// Top-left corner of the label.
    pub text_pos: (f64, f64),
    pub text_size: (f64, f64),
    pub font_size: f64,
    pub text: String,
    pub color: u8,
}

/// Place the scale bar on a `width` × `height` image with the
/// given pixel size.
pub fn layout(
    pixel_size: PhysicalLength,
    width: usize,
    height: usize,
    opts: &LayoutOptions,
    font: &Font,
) -> Result<ScaleBarLayout> {
    if !(pixel_size.value.is_finite() && pixel_size.value > 0.) {
        return Err(Error::InvalidArgument(format!(
            "pixel size must be positive, got {}",
            pixel_size
        )));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidArgument("cannot lay out an empty image".into()));
    }
    if !(opts.scale > 0.) {
        return Err(Error::InvalidArgument(format!(
            "scale must be positive, got {}",
            opts.scale
        )));
    }
    let pixel_size = match opts.unit {
        Some(unit) => pixel_size.to(unit),
        None => pixel_size,
    };

    let bar_size = match opts.bar_size {
        Some(size) if !(size.is_finite() && size > 0.) => {
            return Err(Error::InvalidArgument(format!(
                "bar size must be positive, got {}",
                size
            )))
        }
        Some(size) => size,
        None => {
            let target = opts.scale * opts.fraction * width as f64 * pixel_size.value;
            let nice = opts.nice_values.clone().unwrap_or(NiceValues::Standard);
            snap_nice(target, &nice.values())
                .ok_or_else(|| Error::InvalidArgument("the list of nice values is empty".into()))?
        }
    };
    let mut bar_px = bar_size / pixel_size.value;

    let (nx, ny, resolution) = match opts.resolution {
        None => (width as f64, height as f64, width as f64),
        Some(0) => return Err(Error::InvalidArgument("resolution must be at least 1".into())),
        Some(res) => {
            let res = res as f64;
            bar_px = bar_px / width as f64 * res;
            (res, (height as f64 / width as f64 * res).trunc(), res)
        }
    };
    if ny < 1. {
        return Err(Error::InvalidArgument(format!(
            "resolution {} leaves no rows of a {}x{} image",
            nx, width, height
        )));
    }
    let s = opts.scale * resolution / REFERENCE_WIDTH;

    let bar_height = BAR_HEIGHT * s;
    let box_pad = BOX_PAD * s;
    let bar_pad = BAR_PAD * s;
    let text_pad = TEXT_PAD * s;
    let font_size = FONT_SIZE * s;

    let text = format_bar_label(bar_size, pixel_size.unit);
    let (text_w, mut text_h) = font.text_size(&text, font_size);
    if font.is_truetype() && pixel_size.unit == Unit::Micrometer {
        text_h -= MICRO_BASELINE * s;
    }

    let inner = bar_px.max(text_w);
    let box_w = 2. * bar_pad + inner;
    let box_h = bar_pad + bar_height + 2. * text_pad + text_h;
    let (x, y) = match opts.loc {
        0 => (box_pad, box_pad),
        1 => (nx - box_pad - box_w, box_pad),
        2 => (box_pad, ny - box_pad - box_h),
        3 => (nx - box_pad - box_w, ny - box_pad - box_h),
        loc => {
            return Err(Error::InvalidArgument(format!(
                "loc must be 0, 1, 2 or 3 for top left, top right, bottom left or bottom right, got {}",
                loc
            )))
        }
    };

    let centre = x + bar_pad + inner / 2.;
    Ok(ScaleBarLayout {
        bar_size: PhysicalLength::new(bar_size, pixel_size.unit),
        bar_px,
        width: nx as u32,
        height: ny as u32,
        box_rect: Rect {
            x,
            y,
            w: box_w,
            h: box_h,
        },
        bar_rect: Rect {
            x: centre - bar_px / 2.,
            y: y + box_h - bar_pad - bar_height,
            w: bar_px,
            h: bar_height,
        },
        text_pos: (centre - text_w / 2., y + text_pad),
        text_size: (text_w, text_h),
        font_size,
        text,
        color: if opts.invert { 255 } else { 0 },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nm(value: f64) -> PhysicalLength {
        PhysicalLength::new(value, Unit::Nanometer)
    }

    #[test]
    fn snapping() {
        let list = NiceValues::Standard.values();
        assert_eq!(snap_nice(13.4, &list), Some(10.));
        assert_eq!(snap_nice(307.2, &list), Some(300.));
        assert_eq!(snap_nice(1e9, &list), Some(10000.));
        assert_eq!(snap_nice(0.03, &NiceValues::Fine.values()), Some(0.03));
        assert_eq!(snap_nice(1., &[]), None);
        // tie between 2 and 3
        assert_eq!(snap_nice(2.5, &[2., 3.]), Some(2.));
    }

    #[test]
    fn snapping_is_idempotent_and_nearest() {
        for list in [NiceValues::Standard.values(), NiceValues::Fine.values()] {
            for &v in list.iter() {
                assert_eq!(snap_nice(v, &list), Some(v));
            }
            for target in [0.004, 0.7, 7.7, 33., 149.9, 777., 5500., 7100.] {
                let best = snap_nice(target, &list).unwrap();
                assert!(list
                    .iter()
                    .all(|v| (v - target).abs() >= (best - target).abs()));
            }
        }
    }

    #[test]
    fn labels() {
        assert_eq!(format_bar_label(300., Unit::Nanometer), "300 nm");
        assert_eq!(format_bar_label(2.5, Unit::Micrometer), "2.5 µm");
        assert_eq!(format_bar_label(0.025, Unit::Millimeter), "0.025 mm");
        assert_eq!(format_bar_label(0.12345, Unit::Meter), "0.123 m");
    }

    #[test]
    fn reference_image() -> Result<()> {
        let l = layout(nm(2.), 1024, 1024, &LayoutOptions::default(), &Font::Builtin)?;
        assert_eq!(l.bar_size, nm(300.));
        assert_eq!(l.bar_px, 150.);
        assert_eq!(l.text, "300 nm");
        assert_eq!(l.text_size, (140., 28.));
        // bottom left
        assert_eq!(l.box_rect.x, 10.);
        assert_eq!(l.box_rect.w, 170.);
        assert_eq!(l.box_rect.h, 10. + 16. + 4. + 28.);
        assert_eq!(l.box_rect.y + l.box_rect.h, 1014.);
        assert_eq!(l.bar_rect.x, 20.);
        assert_eq!(l.bar_rect.y, 1014. - 10. - 16.);
        assert_eq!(l.text_pos, (25., l.box_rect.y + 2.));
        assert_eq!(l.color, 0);
        Ok(())
    }

    #[test]
    fn boxes_stay_inside() -> Result<()> {
        for loc in 0..4 {
            for &(w, h) in &[(1024, 1024), (2048, 1536), (512, 700)] {
                let opts = LayoutOptions {
                    loc,
                    ..Default::default()
                };
                let l = layout(nm(1.3), w, h, &opts, &Font::Builtin)?;
                let b = l.box_rect;
                assert!(b.x >= 0. && b.y >= 0., "{:?}", b);
                assert!(b.x + b.w <= w as f64 && b.y + b.h <= h as f64, "{:?}", b);
                assert!(b.w >= l.bar_px.max(l.text_size.0));
                assert!(l.bar_rect.x >= b.x && l.bar_rect.x + l.bar_rect.w <= b.x + b.w);
            }
        }
        Ok(())
    }

    #[test]
    fn invalid_corner() {
        let opts = LayoutOptions {
            loc: 4,
            ..Default::default()
        };
        let err = layout(nm(2.), 1024, 1024, &opts, &Font::Builtin).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn degenerate_output_size() {
        let zero = LayoutOptions {
            resolution: Some(0),
            ..Default::default()
        };
        let err = layout(nm(2.), 1024, 1024, &zero, &Font::Builtin).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        // 10 px wide leaves 1000x1 with no rows
        let flat = LayoutOptions {
            resolution: Some(10),
            ..Default::default()
        };
        let err = layout(nm(2.), 1000, 1, &flat, &Font::Builtin).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn bar_size_must_be_positive() {
        for size in [0., -5., f64::NAN] {
            let opts = LayoutOptions {
                bar_size: Some(size),
                ..Default::default()
            };
            let err = layout(nm(2.), 1024, 1024, &opts, &Font::Builtin).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{}", size);
        }
    }

    #[test]
    fn resolution_and_unit() -> Result<()> {
        let opts = LayoutOptions {
            resolution: Some(512),
            unit: Some(Unit::Micrometer),
            ..Default::default()
        };
        let l = layout(nm(20.), 1024, 800, &opts, &Font::Builtin)?;
        // 0.15 * 1024 * 0.02 µm = 3.07 µm -> 3 µm = 150 source px
        assert_eq!(l.bar_size, PhysicalLength::new(3., Unit::Micrometer));
        assert!((l.bar_px - 75.).abs() < 1e-9);
        assert_eq!((l.width, l.height), (512, 400));
        assert_eq!(l.font_size, 16.);
        Ok(())
    }

    #[test]
    fn explicit_bar_and_invert() -> Result<()> {
        let opts = LayoutOptions {
            bar_size: Some(50.),
            invert: true,
            loc: 1,
            ..Default::default()
        };
        let l = layout(nm(1.), 1000, 1000, &opts, &Font::Builtin)?;
        assert_eq!(l.bar_px, 50.);
        assert_eq!(l.color, 255);
        // label is wider than the bar
        let s = 1000. / 1024.;
        assert_eq!(l.box_rect.w, 2. * 10. * s + l.text_size.0);
        assert_eq!(l.box_rect.x + l.box_rect.w, 1000. - 10. * 1000. / 1024.);
        Ok(())
    }
}
