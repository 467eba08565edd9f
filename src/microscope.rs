//! Per-instrument knowledge: where the databar starts, where
//! the metadata lives and how the pixel size is found.
use std::fmt;

use log::warn;

use crate::{
    error::{Error, Result},
    layout::NiceValues,
    loader::{TagTable, X_RESOLUTION},
    metadata::{self, encode_tag_tuple, locate, BlockEnd, Entry, FormatKind, Marker, MetadataView},
    resolver::{BarMeasurement, Resolution, SchemaPath, Strategy, UnitSource},
    units::{ThresholdScheme, Unit},
};

pub trait Microscope: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Image height as a fraction of the width; rows below it
    /// form the databar. `None` when files have no databar.
    fn split_ratio(&self) -> Option<f64>;

    /// Parse the metadata of a file. Fails with
    /// [`Error::MetadataNotFound`] when the file carries none.
    fn metadata(&self, raw: &[u8], tags: &TagTable) -> Result<MetadataView>;

    fn strategies(&self) -> Vec<Strategy>;

    fn threshold_scheme(&self) -> ThresholdScheme {
        ThresholdScheme::FourTier
    }

    fn nice_values(&self) -> NiceValues {
        NiceValues::Standard
    }

    /// Add calibration results to a metadata view.
    fn annotate(&self, _view: &mut MetadataView, _resolution: &Resolution) {}
}

/// Number of image rows for a `width` wide file.
pub fn image_rows(microscope: &dyn Microscope, width: usize, height: usize) -> usize {
    match microscope.split_ratio() {
        Some(ratio) => ((width as f64 / ratio) as usize).min(height),
        None => height,
    }
}

/// Guess the instrument from the raw bytes of a file.
pub fn detect(raw: &[u8]) -> Box<dyn Microscope> {
    let has = |needle: &str| {
        raw.windows(needle.len())
            .any(|window| window == needle.as_bytes())
    };
    if has("<Root") && has("<Data>") {
        Box::new(Tia::default())
    } else if has("</FeiImage>") {
        Box::new(Phenom)
    } else if has("[DatabarData]") {
        Box::new(Xl30Sfeg)
    } else if has("</Metadata>") || has("[User]") {
        Box::new(Helios)
    } else {
        Box::new(GenericTiff)
    }
}

fn block(raw: &[u8], marker: Marker, kind: FormatKind, what: &'static str) -> Result<MetadataView> {
    let text = locate(raw, &marker).ok_or(Error::MetadataNotFound(what))?;
    metadata::parse(text.as_bytes(), kind)
}

/// FEI Tecnai and Talos TEMs writing through TIA.
///
/// The calibration is only available as the scale bar burned
/// into the databar below the square image.
#[derive(Debug, Clone, Copy)]
pub struct Tia {
    pub measurement: BarMeasurement,
}

impl Default for Tia {
    fn default() -> Self {
        Tia {
            measurement: BarMeasurement::Legacy,
        }
    }
}

impl Microscope for Tia {
    fn name(&self) -> &'static str {
        "TIA"
    }

    fn split_ratio(&self) -> Option<f64> {
        Some(1.)
    }

    fn metadata(&self, raw: &[u8], _: &TagTable) -> Result<MetadataView> {
        let marker = Marker {
            start: "<Root",
            end: BlockEnd::Tag("</Root>"),
        };
        block(raw, marker, FormatKind::TagSoup, "TIA")
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![
            Strategy::ScaleBar(self.measurement),
            Strategy::Manual(Unit::Nanometer),
        ]
    }

    fn annotate(&self, view: &mut MetadataView, resolution: &Resolution) {
        let size = &resolution.pixel_size;
        view.insert(
            "Pixel size",
            Entry::number(size.x).with_unit(Some(size.unit.symbol())),
        );
        if let Some(bar) = &resolution.scale_bar {
            view.insert(
                "Scale bar size",
                Entry::number(bar.length.value).with_unit(Some(bar.length.unit.symbol())),
            );
        }
    }
}

/// Old name of [`Tia`] for Tecnai microscopes.
#[deprecated(note = "use `Tia` instead")]
pub fn tecnai() -> Tia {
    warn!("`tecnai` is deprecated, use `Tia` instead");
    Tia::default()
}

/// Old name of [`Tia`] for Talos microscopes.
#[deprecated(note = "use `Tia` instead")]
pub fn talos() -> Tia {
    warn!("`talos` is deprecated, use `Tia` instead");
    Tia::default()
}

/// FEI Helios SEM/FIB. Slice-and-view images carry an XML
/// footer, regular images a `[User]` text block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Helios;

impl Microscope for Helios {
    fn name(&self) -> &'static str {
        "Helios"
    }

    fn split_ratio(&self) -> Option<f64> {
        Some(1.5)
    }

    fn metadata(&self, raw: &[u8], _: &TagTable) -> Result<MetadataView> {
        let xml = Marker {
            start: "<?xml",
            end: BlockEnd::Tag("</Metadata>"),
        };
        match block(raw, xml, FormatKind::Xml, "Helios XML") {
            Ok(view) => return Ok(view),
            Err(e) => log::debug!("no XML metadata ({}), trying the text block", e),
        }
        let text = Marker {
            start: "[User]",
            end: BlockEnd::Nul,
        };
        block(raw, text, FormatKind::SectionedText, "Helios")
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![
            Strategy::Structured(vec![
                SchemaPath {
                    x: &["Scan", "PixelWidth"],
                    y: &["Scan", "PixelHeight"],
                    unit: UnitSource::Meters,
                },
                SchemaPath {
                    x: &["BinaryResult", "PixelSize", "X"],
                    y: &["BinaryResult", "PixelSize", "Y"],
                    unit: UnitSource::Meters,
                },
            ]),
            Strategy::Manual(Unit::Nanometer),
        ]
    }
}

/// Phenom desktop SEMs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Phenom;

impl Microscope for Phenom {
    fn name(&self) -> &'static str {
        "Phenom"
    }

    fn split_ratio(&self) -> Option<f64> {
        Some(1.)
    }

    fn metadata(&self, raw: &[u8], _: &TagTable) -> Result<MetadataView> {
        let marker = Marker {
            start: "<?xml",
            end: BlockEnd::Tag("</FeiImage>"),
        };
        block(raw, marker, FormatKind::Xml, "Phenom")
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![
            Strategy::Structured(vec![SchemaPath {
                x: &["pixelWidth"],
                y: &["pixelHeight"],
                unit: UnitSource::Attribute,
            }]),
            Strategy::Manual(Unit::Nanometer),
        ]
    }
}

/// Philips/FEI XL30 SFEG SEM.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xl30Sfeg;

impl Microscope for Xl30Sfeg {
    fn name(&self) -> &'static str {
        "XL30 SFEG"
    }

    fn split_ratio(&self) -> Option<f64> {
        Some(1.330)
    }

    fn metadata(&self, raw: &[u8], _: &TagTable) -> Result<MetadataView> {
        let marker = Marker {
            start: "[DatabarData]",
            end: BlockEnd::Line("IonBright3"),
        };
        block(raw, marker, FormatKind::SectionedText, "XL30")
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![
            Strategy::Structured(vec![SchemaPath {
                x: &["DatabarData", "flMagn"],
                y: &["DatabarData", "flMagn"],
                unit: UnitSource::Fixed(Unit::Micrometer),
            }]),
            Strategy::Manual(Unit::Micrometer),
        ]
    }
}

/// Velox EMD datasets. The raw bytes are the JSON metadata
/// block of one frame, see [`crate::container`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Velox;

impl Microscope for Velox {
    fn name(&self) -> &'static str {
        "Velox"
    }

    fn split_ratio(&self) -> Option<f64> {
        None
    }

    fn metadata(&self, raw: &[u8], _: &TagTable) -> Result<MetadataView> {
        metadata::parse(raw, FormatKind::JsonBlob)
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![
            Strategy::Structured(vec![SchemaPath {
                x: &["BinaryResult", "PixelSize", "width"],
                y: &["BinaryResult", "PixelSize", "height"],
                unit: UnitSource::Field {
                    x: &["BinaryResult", "PixelUnitX"],
                    y: &["BinaryResult", "PixelUnitY"],
                },
            }]),
            Strategy::Manual(Unit::Nanometer),
        ]
    }

    fn threshold_scheme(&self) -> ThresholdScheme {
        ThresholdScheme::FiveTier
    }

    fn nice_values(&self) -> NiceValues {
        NiceValues::Fine
    }
}

/// Any TIFF with physical resolution tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericTiff;

impl Microscope for GenericTiff {
    fn name(&self) -> &'static str {
        "TIFF"
    }

    fn split_ratio(&self) -> Option<f64> {
        None
    }

    fn metadata(&self, _: &[u8], tags: &TagTable) -> Result<MetadataView> {
        let tuple = tags
            .resolution(X_RESOLUTION)
            .ok_or(Error::MetadataNotFound("TIFF resolution"))?;
        metadata::parse(&encode_tag_tuple(&tuple), FormatKind::StructuredTagTuple)
    }

    fn strategies(&self) -> Vec<Strategy> {
        vec![Strategy::DirectTag, Strategy::Manual(Unit::Nanometer)]
    }

    fn threshold_scheme(&self) -> ThresholdScheme {
        ThresholdScheme::FiveTier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        loader::{TagValue, RESOLUTION_UNIT},
        resolver::PixelSize,
    };

    const HELIOS_TEXT: &[u8] = b"\x49\x49\x2a\0junk[User]\r\nDate=12/03/2020\r\n[Scan]\r\nPixelWidth=1.5e-09\r\nPixelHeight=1.5e-09\r\n\r\n\0\0tail";
    const HELIOS_XML: &[u8] = b"junk<?xml version=\"1.0\"?>\n<Metadata><BinaryResult><PixelSize><X unit=\"m\">4e-9</X><Y unit=\"m\">5e-9</Y></PixelSize></BinaryResult></Metadata>\ntail";

    #[test]
    fn detection() {
        assert_eq!(detect(b"..<Root><Data><Label>a</Label></Data></Root>").name(), "TIA");
        assert_eq!(detect(HELIOS_TEXT).name(), "Helios");
        assert_eq!(detect(HELIOS_XML).name(), "Helios");
        assert_eq!(detect(b"<?xml?><FeiImage></FeiImage>").name(), "Phenom");
        assert_eq!(detect(b"[DatabarData]\nflMagn=1").name(), "XL30 SFEG");
        assert_eq!(detect(b"II*\0").name(), "TIFF");
    }

    #[test]
    fn image_split() {
        assert_eq!(image_rows(&Tia::default(), 1024, 1100), 1024);
        assert_eq!(image_rows(&Helios, 1536, 1100), 1024);
        assert_eq!(image_rows(&Xl30Sfeg, 712, 600), 535);
        assert_eq!(image_rows(&Phenom, 1024, 900), 900);
        assert_eq!(image_rows(&GenericTiff, 1024, 900), 900);
    }

    #[test]
    fn helios_text_and_xml() -> anyhow::Result<()> {
        let tags = TagTable::new();
        let view = Helios.metadata(HELIOS_TEXT, &tags)?;
        assert_eq!(view.text(&["User", "Date"]), Some("12/03/2020"));
        assert_eq!(view.number(&["Scan", "PixelWidth"]), Some(1.5e-9));

        let view = Helios.metadata(HELIOS_XML, &tags)?;
        assert_eq!(view.number(&["BinaryResult", "PixelSize", "Y"]), Some(5e-9));
        Ok(())
    }

    #[test]
    fn missing_metadata() {
        let err = Phenom.metadata(b"nothing here", &TagTable::new()).unwrap_err();
        assert!(matches!(err, Error::MetadataNotFound(_)));
        let err = GenericTiff.metadata(b"", &TagTable::new()).unwrap_err();
        assert!(matches!(err, Error::MetadataNotFound(_)));
    }

    #[test]
    fn generic_tiff_metadata() -> anyhow::Result<()> {
        let mut tags = TagTable::new();
        tags.insert(X_RESOLUTION, TagValue::Rational(1_000_000, 1));
        tags.insert(RESOLUTION_UNIT, TagValue::Integer(3));
        let view = GenericTiff.metadata(&[], &tags)?;
        assert_eq!(view.text(&["Resolution"]), Some("1000000/1"));
        assert!((view.number(&["PixelSize"]).unwrap() - 1e-8).abs() < 1e-20);
        Ok(())
    }

    #[test]
    fn tia_annotation() {
        let mut view = MetadataView::new();
        let resolution = Resolution::from(PixelSize::isotropic(0.5, Unit::Nanometer));
        Tia::default().annotate(&mut view, &resolution);
        let entry = view.get("Pixel size").unwrap();
        assert_eq!(entry.as_f64(), Some(0.5));
        assert_eq!(entry.unit.as_deref(), Some("nm"));
        assert!(view.get("Scale bar size").is_none());
    }

    #[test]
    #[allow(deprecated)]
    fn deprecated_aliases() {
        assert_eq!(tecnai().name(), "TIA");
        assert_eq!(talos().measurement, BarMeasurement::Legacy);
    }

    #[test]
    fn every_chain_ends_manually() {
        let all: Vec<Box<dyn Microscope>> = vec![
            Box::new(Tia::default()),
            Box::new(Helios),
            Box::new(Phenom),
            Box::new(Xl30Sfeg),
            Box::new(Velox),
            Box::new(GenericTiff),
        ];
        for m in all {
            assert!(
                matches!(m.strategies().last(), Some(Strategy::Manual(_))),
                "{}",
                m.name()
            );
        }
    }
}
