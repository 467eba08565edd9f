//! Library to calibrate electron microscope images and export
//! them with a scale bar.
//!
//! This crate provides two functionalities:
//!
//! 1. Find the [pixel size](resolver::PixelSize) of an image.
//! Depending on the [instrument](microscope::Microscope), it
//! is read from TIFF resolution tags, from vendor metadata
//! blocks (tag soup, INI style text, XML or JSON), measured
//! from the scale bar burned into the databar below the image,
//! or as a last resort asked from the user.
//!
//! 2. [Export](render::export) the image with a new scale bar
//! of a "nice" length, optionally cropped, contrast
//! stretched and resized.
//!
//! # Usage
//!
//! [`CalibratedImage::open`] reads a TIFF file and detects the
//! instrument that wrote it. The pixel size is resolved on
//! first use and cached.
//!
//! ```rust
//! # fn test_compile() -> anyhow::Result<()> {
//! use electron_microscopes::CalibratedImage;
//! let mut image = CalibratedImage::open("image.tif")?;
//! let size = image.pixel_size()?;
//! println!("{}", size);
//! # Ok(())
//! # }
//! ```
//!
//! Exporting takes an [`ExportOptions`], which can also be read
//! from a (partial) JSON file. The result is written next to the
//! source as `<name>_scalebar.png`; the source itself is never
//! overwritten.
//!
//! ```rust
//! # fn test_compile() -> anyhow::Result<()> {
//! use electron_microscopes::{CalibratedImage, ExportOptions, Intensity};
//!
//! let mut image = CalibratedImage::open("image.tif")?;
//! let opts = ExportOptions {
//!     intensity: Intensity::Automatic,
//!     ..Default::default()
//! };
//! image.export_with_scalebar(&opts)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Units
//!
//! Lengths are [`PhysicalLength`]s in one of the SI
//! [`Unit`]s from femtometer to kilometer, plus the ångström.
//! [`convert`] moves values between them.

pub mod error;
pub mod units;

pub mod metadata;
pub mod loader;

pub mod contour;
pub mod ocr;
pub mod prompt;
pub mod resolver;
pub mod microscope;

pub mod container;
pub mod image;

pub mod font;
pub mod layout;
pub mod render;

pub use crate::error::Error;
pub use crate::image::CalibratedImage;
pub use crate::render::{Crop, ExportOptions, Intensity};
pub use crate::resolver::PixelSize;
pub use crate::units::{convert, PhysicalLength, Unit};
