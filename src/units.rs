//! Length units from femtometers to kilometers.
//!
//! Conversion between units is an exact power of ten,
//! derived from the position of each unit in [`DECADES`]:
//! the table has one slot per decade, and slots without a
//! named unit are left empty. Moving one slot to the right
//! multiplies the unit size by ten, so
//! `convert(v, a, b) = v * 10^(index(a) - index(b))`.
use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_derive::*;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Femtometer,
    Picometer,
    Angstrom,
    Nanometer,
    Micrometer,
    Millimeter,
    Centimeter,
    Decimeter,
    Meter,
    Decameter,
    Hectometer,
    Kilometer,
}

use Unit::*;

/// One slot per power of ten, from 1e-15 m to 1e3 m.
pub const DECADES: [Option<Unit>; 19] = [
    Some(Femtometer), // 1e-15
    None,
    None,
    Some(Picometer), // 1e-12
    None,
    Some(Angstrom), // 1e-10
    Some(Nanometer),
    None,
    None,
    Some(Micrometer), // 1e-6
    None,
    None,
    Some(Millimeter), // 1e-3
    Some(Centimeter),
    Some(Decimeter),
    Some(Meter),
    Some(Decameter),
    Some(Hectometer),
    Some(Kilometer), // 1e3
];

/// Exponent of the first slot in [`DECADES`].
const FIRST_DECADE: i32 = -15;

impl Unit {
    pub const ALL: [Unit; 12] = [
        Femtometer, Picometer, Angstrom, Nanometer, Micrometer, Millimeter, Centimeter, Decimeter,
        Meter, Decameter, Hectometer, Kilometer,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Femtometer => "fm",
            Picometer => "pm",
            Angstrom => "Å",
            Nanometer => "nm",
            Micrometer => "µm",
            Millimeter => "mm",
            Centimeter => "cm",
            Decimeter => "dm",
            Meter => "m",
            Decameter => "dam",
            Hectometer => "hm",
            Kilometer => "km",
        }
    }

    /// Position of the unit in [`DECADES`].
    pub fn index(self) -> usize {
        DECADES
            .iter()
            .position(|slot| *slot == Some(self))
            .unwrap_or_else(|| unreachable!("{:?} missing from the decade table", self))
    }

    /// Power of ten of the unit, in meters.
    pub fn exponent(self) -> i32 {
        FIRST_DECADE + self.index() as i32
    }

    /// Parse a unit symbol, accepting the usual ASCII and
    /// unicode spellings (`um`, `μm`, `A`, `Å`).
    pub fn parse(symbol: &str) -> Result<Unit> {
        let unit = match symbol.trim() {
            "fm" => Femtometer,
            "pm" => Picometer,
            // U+00C5 and U+212B
            "\u{c5}" | "\u{212b}" | "A" | "angstrom" => Angstrom,
            "nm" => Nanometer,
            // micro sign and greek mu
            "\u{b5}m" | "\u{3bc}m" | "um" | "u" => Micrometer,
            "mm" => Millimeter,
            "cm" => Centimeter,
            "dm" => Decimeter,
            "m" => Meter,
            "dam" => Decameter,
            "hm" => Hectometer,
            "km" => Kilometer,
            other => return Err(Error::InvalidUnit(other.to_string())),
        };
        Ok(unit)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Unit::parse(s)
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let symbol = <String as Deserialize>::deserialize(de)?;
        Unit::parse(&symbol).map_err(D::Error::custom)
    }
}

/// Convert `value` expressed in `from` to `to`.
pub fn convert(value: f64, from: Unit, to: Unit) -> f64 {
    value * 10f64.powi(from.index() as i32 - to.index() as i32)
}

/// [`convert`] with unit symbols, failing on unknown symbols.
pub fn convert_str(value: f64, from: &str, to: &str) -> Result<f64> {
    Ok(convert(value, Unit::parse(from)?, Unit::parse(to)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalLength {
    pub value: f64,
    pub unit: Unit,
}

impl PhysicalLength {
    pub fn new(value: f64, unit: Unit) -> Self {
        PhysicalLength { value, unit }
    }

    pub fn to(self, unit: Unit) -> Self {
        PhysicalLength {
            value: convert(self.value, self.unit, unit),
            unit,
        }
    }

    pub fn meters(self) -> f64 {
        convert(self.value, self.unit, Meter)
    }
}

impl fmt::Display for PhysicalLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// How a length in meters is given a readable unit.
///
/// Instruments disagree on the thresholds, so both schemes
/// are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdScheme {
    /// m, mm, µm, nm; switches unit below 0.1 of the larger unit.
    FourTier,
    /// m, mm, µm, nm, pm; switches unit below 10 of the smaller unit.
    FiveTier,
}

impl ThresholdScheme {
    /// Pick the unit for a value given in meters.
    pub fn choose_unit(self, meters: f64) -> Unit {
        match self {
            ThresholdScheme::FourTier => {
                if meters >= 0.1 {
                    Meter
                } else if meters >= 0.1e-3 {
                    Millimeter
                } else if meters >= 0.1e-6 {
                    Micrometer
                } else {
                    Nanometer
                }
            }
            ThresholdScheme::FiveTier => {
                if meters >= 10e-3 {
                    Meter
                } else if meters >= 10e-6 {
                    Millimeter
                } else if meters >= 10e-9 {
                    Micrometer
                } else if meters >= 10e-12 {
                    Nanometer
                } else {
                    Picometer
                }
            }
        }
    }
}

/// Express a length in meters in the unit `scheme` picks.
pub fn choose_unit(meters: f64, scheme: ThresholdScheme) -> PhysicalLength {
    PhysicalLength::new(meters, Meter).to(scheme.choose_unit(meters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
    }

    #[test]
    fn decade_table_matches_si() {
        let expected = [-15, -12, -10, -9, -6, -3, -2, -1, 0, 1, 2, 3];
        for (unit, exp) in Unit::ALL.iter().zip(expected.iter()) {
            assert_eq!(unit.exponent(), *exp, "{}", unit);
        }
    }

    #[test]
    fn nm_to_um() -> Result<()> {
        assert!(close(convert_str(1.7, "nm", "µm")?, 0.0017));
        Ok(())
    }

    #[test]
    fn irregular_steps() {
        assert!(close(convert(500., Picometer, Angstrom), 5.));
        assert!(close(convert(1., Angstrom, Nanometer), 0.1));
        assert!(close(convert(3., Meter, Decimeter), 30.));
        assert!(close(convert(3., Decimeter, Centimeter), 30.));
    }

    #[test]
    fn round_trip_and_chain() {
        let values = [1.7, 0.003, 12345.678, 2.5e-4];
        for &v in &values {
            for &a in &Unit::ALL {
                for &b in &Unit::ALL {
                    assert!(close(convert(convert(v, a, b), b, a), v));
                    for &c in &Unit::ALL {
                        assert!(close(convert(v, a, c), convert(convert(v, a, b), b, c)));
                    }
                }
            }
        }
    }

    #[test]
    fn aliases() -> Result<()> {
        assert_eq!(Unit::parse("um")?, Micrometer);
        assert_eq!(Unit::parse("\u{3bc}m")?, Micrometer);
        assert_eq!(Unit::parse("A")?, Angstrom);
        assert_eq!(Unit::parse("\u{212b}")?, Angstrom);
        assert_eq!(" km ".parse::<Unit>()?, Kilometer);
        Ok(())
    }

    #[test]
    fn invalid_unit() {
        match Unit::parse("furlong") {
            Err(Error::InvalidUnit(s)) => assert_eq!(s, "furlong"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(convert_str(1., "nm", "parsec").is_err());
    }

    #[test]
    fn four_tier() {
        let s = ThresholdScheme::FourTier;
        assert_eq!(s.choose_unit(0.5), Meter);
        assert_eq!(s.choose_unit(0.05), Millimeter);
        assert_eq!(s.choose_unit(1e-4), Millimeter);
        assert_eq!(s.choose_unit(5e-5), Micrometer);
        assert_eq!(s.choose_unit(5e-8), Nanometer);
        let len = choose_unit(2.5e-9, s);
        assert_eq!(len.unit, Nanometer);
        assert!(close(len.value, 2.5));
    }

    #[test]
    fn five_tier() {
        let s = ThresholdScheme::FiveTier;
        assert_eq!(s.choose_unit(0.02), Meter);
        assert_eq!(s.choose_unit(0.005), Millimeter);
        assert_eq!(s.choose_unit(5e-6), Micrometer);
        assert_eq!(s.choose_unit(5e-9), Nanometer);
        assert_eq!(s.choose_unit(5e-12), Picometer);
        let len = choose_unit(1.2e-10, s);
        assert_eq!(len.unit, Nanometer);
        assert!(close(len.value, 0.12));
    }

    #[test]
    fn serde_symbols() -> anyhow::Result<()> {
        let unit: Unit = serde_json::from_str("\"um\"")?;
        assert_eq!(unit, Micrometer);
        assert_eq!(serde_json::to_string(&Angstrom)?, "\"Å\"");
        Ok(())
    }
}
