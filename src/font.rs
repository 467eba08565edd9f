//! Fonts for the scale bar label.
//!
//! [`Font::Builtin`] is a 5×7 bitmap font covering digits,
//! the decimal point and the unit symbols, so labels can be
//! drawn without any font file. TrueType fonts are loaded with
//! `ab_glyph` and drawn with `imageproc`.
use std::{fmt, fs::read, path::Path};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_text_mut, text_size};

pub enum Font {
    Builtin,
    TrueType(FontVec),
}

impl Default for Font {
    fn default() -> Self {
        Font::Builtin
    }
}

impl fmt::Debug for Font {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Font::Builtin => f.write_str("Builtin"),
            Font::TrueType(_) => f.write_str("TrueType"),
        }
    }
}

impl Font {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = read(path).with_context(|| format!("reading font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("{} is not a TrueType font", path.display()))?;
        Ok(Font::TrueType(font))
    }

    pub fn is_truetype(&self) -> bool {
        matches!(self, Font::TrueType(_))
    }

    /// Width and height of `text` at `size` pixels.
    pub fn text_size(&self, text: &str, size: f64) -> (f64, f64) {
        match self {
            Font::Builtin => {
                let dot = dot_size(size) as f64;
                let n = text.chars().count();
                if n == 0 {
                    return (0., 0.);
                }
                ((n * (GLYPH_WIDTH + 1) - 1) as f64 * dot, GLYPH_HEIGHT as f64 * dot)
            }
            Font::TrueType(font) => {
                let (w, h) = text_size(PxScale::from(size as f32), font, text);
                (w as f64, h as f64)
            }
        }
    }

    /// Draw `text` with its top-left corner at `(x, y)`.
    pub fn draw(&self, canvas: &mut GrayImage, text: &str, x: i32, y: i32, size: f64, color: u8) {
        match self {
            Font::Builtin => draw_bitmap(canvas, text, x, y, dot_size(size), color),
            Font::TrueType(font) => draw_text_mut(
                canvas,
                Luma([color]),
                x,
                y,
                PxScale::from(size as f32),
                font,
                text,
            ),
        }
    }
}

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;

/// Edge length of one bitmap dot for a nominal font size.
fn dot_size(size: f64) -> u32 {
    ((size / 8.).round() as u32).max(1)
}

fn draw_bitmap(canvas: &mut GrayImage, text: &str, x: i32, y: i32, dot: u32, color: u8) {
    let (width, height) = canvas.dimensions();
    let dot = dot as i64;
    for (i, ch) in text.chars().enumerate() {
        let rows = glyph(ch);
        for (r, bits) in rows.iter().enumerate() {
            for c in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - c)) == 0 {
                    continue;
                }
                let x0 = x as i64 + ((i * (GLYPH_WIDTH + 1) + c) as i64) * dot;
                let y0 = y as i64 + r as i64 * dot;
                for py in y0.max(0)..(y0 + dot).min(height as i64) {
                    for px in x0.max(0)..(x0 + dot).min(width as i64) {
                        canvas.put_pixel(px as u32, py as u32, Luma([color]));
                    }
                }
            }
        }
    }
}

/// Rows of a glyph, most significant bit on the left.
/// Unknown characters are blank.
fn glyph(ch: char) -> [u8; GLYPH_HEIGHT] {
    match ch {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        'a' => [0, 0, 0b01110, 0b00001, 0b01111, 0b10001, 0b01111],
        'c' => [0, 0, 0b01110, 0b10000, 0b10000, 0b10001, 0b01110],
        'd' => [0b00001, 0b00001, 0b01101, 0b10011, 0b10001, 0b10001, 0b01111],
        'f' => [0b00110, 0b01001, 0b01000, 0b11100, 0b01000, 0b01000, 0b01000],
        'h' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'k' => [0b10000, 0b10000, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010],
        'm' => [0, 0, 0b11010, 0b10101, 0b10101, 0b10001, 0b10001],
        'n' => [0, 0, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'p' => [0, 0, 0b11110, 0b10001, 0b11110, 0b10000, 0b10000],
        'u' => [0, 0, 0b10001, 0b10001, 0b10001, 0b10011, 0b01101],
        // micro sign and greek mu
        '\u{b5}' | '\u{3bc}' => [0, 0, 0b10001, 0b10001, 0b10011, 0b11101, 0b10000],
        // angstrom, both code points
        '\u{c5}' | '\u{212b}' => [0b00100, 0, 0b01110, 0b10001, 0b11111, 0b10001, 0b10001],
        _ => [0; GLYPH_HEIGHT],
    }
}
