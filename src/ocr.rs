//! Reading the burned-in scale bar label.
//!
//! Only the legacy TIA calibration needs this. Recognition is
//! unreliable, so every failure is reported with its own
//! cause and resolution falls back to manual input.
use std::{
    io::{Cursor, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
};

use image::{GrayImage, ImageFormat};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::units::Unit;

/// Characters that can appear in a scale bar label.
pub const SCALE_BAR_WHITELIST: &str = "0123456789pnuµm";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("no text recognition engine is installed")]
    NotInstalled,
    #[error("text recognition engine `{0}` could not be found")]
    EngineNotFound(String),
    #[error("could not read scale bar text: {0}")]
    Unreadable(String),
}

pub trait TextRecognizer {
    /// Recognise a single line of text in `image`, limited to
    /// the characters in `whitelist`.
    fn recognize(&self, image: &GrayImage, whitelist: &str) -> Result<String, OcrError>;
}

/// The recognizer used when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecognizer;

impl TextRecognizer for NoRecognizer {
    fn recognize(&self, _: &GrayImage, _: &str) -> Result<String, OcrError> {
        Err(OcrError::NotInstalled)
    }
}

/// Runs the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct Tesseract {
    pub binary: PathBuf,
}

impl Default for Tesseract {
    fn default() -> Self {
        Tesseract {
            binary: "tesseract".into(),
        }
    }
}

impl TextRecognizer for Tesseract {
    fn recognize(&self, image: &GrayImage, whitelist: &str) -> Result<String, OcrError> {
        let mut png = Cursor::new(vec![]);
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| OcrError::Unreadable(e.to_string()))?;

        // oem 0 is the legacy engine, the only one honouring the
        // whitelist; psm 7 is a single line of text
        let child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--oem", "0", "--psm", "7", "-c"])
            .arg(format!("tessedit_char_whitelist={}", whitelist))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OcrError::EngineNotFound(self.binary.display().to_string()))
            }
            Err(e) => return Err(OcrError::Unreadable(e.to_string())),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(png.get_ref())
                .map_err(|e| OcrError::Unreadable(e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Unreadable(e.to_string()))?;
        if !output.status.success() {
            return Err(OcrError::Unreadable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Split recognised text such as `"200 nm"` into value and unit.
pub fn parse_reading(text: &str) -> Result<(f64, Unit), OcrError> {
    lazy_static! {
        static ref VALUE: Regex = Regex::new(r"\d+").unwrap();
        static ref UNIT: Regex = Regex::new(r"[a-zµμ]+").unwrap();
    }
    let unreadable = || OcrError::Unreadable(format!("{:?}", text.trim()));

    let value: f64 = VALUE
        .find(text)
        .ok_or_else(unreadable)?
        .as_str()
        .parse()
        .map_err(|_| unreadable())?;
    if value <= 0. {
        return Err(unreadable());
    }
    let unit = UNIT.find(text).ok_or_else(unreadable)?.as_str();
    let unit = Unit::parse(unit).map_err(|_| unreadable())?;
    Ok((value, unit))
}
