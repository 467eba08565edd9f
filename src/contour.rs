//! Outer contours of the shapes in a databar.
//!
//! Borders are traced with `imageproc` (Suzuki-Abe border
//! following, 8-connected), counter-clockwise as seen on
//! screen from the first pixel of each shape in raster order.
//! Only the pixels where the direction of travel changes are
//! kept, so a filled rectangle gives its top-left,
//! bottom-left, bottom-right and top-right pixels, in that
//! order.
use image::{GrayImage, Luma};
use imageproc::contours::{self, BorderType};
use ndarray::ArrayView2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    /// `(x, y)` vertices.
    pub points: Vec<(usize, usize)>,
}

impl Contour {
    pub fn min_x(&self) -> usize {
        self.points.iter().map(|p| p.0).min().unwrap_or(0)
    }

    pub fn max_x(&self) -> usize {
        self.points.iter().map(|p| p.0).max().unwrap_or(0)
    }
}

/// Outer contours of all shapes, sorted left to right by
/// their bounding boxes. Any non-zero pixel is foreground.
pub fn find_contours(image: ArrayView2<f64>) -> Vec<Contour> {
    let (height, width) = image.dim();
    let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([if image[(y as usize, x as usize)] != 0. { 255 } else { 0 }])
    });

    let mut found: Vec<Contour> = contours::find_contours::<u32>(&mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(|c| {
            let chain: Vec<_> = c.points.iter().map(|p| (p.x as usize, p.y as usize)).collect();
            Contour {
                points: simplify(&chain),
            }
        })
        .collect();
    found.sort_by_key(|c| c.min_x());
    found
}

fn step(from: (usize, usize), to: (usize, usize)) -> (isize, isize) {
    (
        (to.0 as isize - from.0 as isize).signum(),
        (to.1 as isize - from.1 as isize).signum(),
    )
}

/// Drop the vertices that continue in the direction of travel.
fn simplify(chain: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let n = chain.len();
    if n < 3 {
        return chain.to_vec();
    }
    (0..n)
        .filter(|&k| {
            let before = chain[(k + n - 1) % n];
            let after = chain[(k + 1) % n];
            step(before, chain[k]) != step(chain[k], after)
        })
        .map(|k| chain[k])
        .collect()
}
