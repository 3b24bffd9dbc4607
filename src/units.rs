//! Physical units attached to catalog values.
//!
//! Only the units the halo catalog schema and the recorded halo lists need are
//! modelled. Every unit carries a dimension and a factor to CGS; `unitary` is
//! the one length whose factor depends on the dataset (its domain width).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HaloError, Result};

/// Solar mass in grams
pub const MSUN_GRAMS: f64 = 1.98841586e33;
/// Parsec in centimeters
pub const PARSEC_CM: f64 = 3.0856775809623245e18;
/// Kilometer in centimeters
pub const KM_CM: f64 = 1.0e5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Dimensionless,
    Mass,
    Length,
    Velocity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Dimensionless,
    Gram,
    Msun,
    Centimeter,
    Kilometer,
    Parsec,
    Kiloparsec,
    Megaparsec,
    /// Length as a fraction of the dataset's domain width
    Unitary,
    CentimeterPerSecond,
    KilometerPerSecond,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Dimensionless => "",
            Self::Gram => "g",
            Self::Msun => "Msun",
            Self::Centimeter => "cm",
            Self::Kilometer => "km",
            Self::Parsec => "pc",
            Self::Kiloparsec => "kpc",
            Self::Megaparsec => "Mpc",
            Self::Unitary => "unitary",
            Self::CentimeterPerSecond => "cm/s",
            Self::KilometerPerSecond => "km/s",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Self::Dimensionless => Dimension::Dimensionless,
            Self::Gram | Self::Msun => Dimension::Mass,
            Self::Centimeter
            | Self::Kilometer
            | Self::Parsec
            | Self::Kiloparsec
            | Self::Megaparsec
            | Self::Unitary => Dimension::Length,
            Self::CentimeterPerSecond | Self::KilometerPerSecond => Dimension::Velocity,
        }
    }

    /// Multiplier taking a value in this unit to CGS.
    fn cgs_factor(&self, system: &UnitSystem) -> Result<f64> {
        let factor = match self {
            Self::Dimensionless | Self::Gram | Self::Centimeter | Self::CentimeterPerSecond => 1.0,
            Self::Msun => MSUN_GRAMS,
            Self::Kilometer | Self::KilometerPerSecond => KM_CM,
            Self::Parsec => PARSEC_CM,
            Self::Kiloparsec => 1.0e3 * PARSEC_CM,
            Self::Megaparsec => 1.0e6 * PARSEC_CM,
            Self::Unitary => system.unitary_cm()?,
        };
        Ok(factor)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dimensionless => write!(f, "dimensionless"),
            other => write!(f, "{}", other.symbol()),
        }
    }
}

impl FromStr for Unit {
    type Err = HaloError;

    fn from_str(s: &str) -> Result<Self> {
        let unit = match s.trim() {
            "" | "dimensionless" | "1" => Self::Dimensionless,
            "g" => Self::Gram,
            "Msun" | "msun" => Self::Msun,
            "cm" => Self::Centimeter,
            "km" => Self::Kilometer,
            "pc" => Self::Parsec,
            "kpc" => Self::Kiloparsec,
            "Mpc" => Self::Megaparsec,
            "unitary" => Self::Unitary,
            "cm/s" => Self::CentimeterPerSecond,
            "km/s" => Self::KilometerPerSecond,
            other => return Err(HaloError::UnknownUnit(other.to_string())),
        };
        Ok(unit)
    }
}

impl TryFrom<String> for Unit {
    type Error = HaloError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol().to_string()
    }
}

/// Dataset-dependent context needed to resolve code-relative units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSystem {
    /// Width of the simulation domain in centimeters
    pub domain_width_cm: f64,
}

impl UnitSystem {
    pub fn new(domain_width_cm: f64) -> Self {
        Self { domain_width_cm }
    }

    fn unitary_cm(&self) -> Result<f64> {
        if self.domain_width_cm.is_finite() && self.domain_width_cm > 0.0 {
            Ok(self.domain_width_cm)
        } else {
            Err(HaloError::Config(format!(
                "unitary lengths need a positive domain width, got {} cm",
                self.domain_width_cm
            )))
        }
    }
}

/// A scalar value tagged with its unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self::new(value, Unit::Dimensionless)
    }

    /// Converts to `target`, failing when the dimensions differ.
    pub fn to(&self, target: Unit, system: &UnitSystem) -> Result<Quantity> {
        if self.unit == target {
            return Ok(*self);
        }
        if self.unit.dimension() != target.dimension() {
            return Err(HaloError::UnitConversion {
                from: self.unit.to_string(),
                to: target.to_string(),
            });
        }
        let cgs = self.value * self.unit.cgs_factor(system)?;
        Ok(Quantity::new(cgs / target.cgs_factor(system)?, target))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Dimensionless => write!(f, "{}", self.value),
            unit => write!(f, "{} {}", self.value, unit.symbol()),
        }
    }
}

/// A numeric array paired with the unit of every element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitArray {
    pub values: Vec<f64>,
    pub unit: Unit,
}

impl UnitArray {
    pub fn new(values: Vec<f64>, unit: Unit) -> Self {
        Self { values, unit }
    }

    /// Zero-filled array of `len` elements.
    pub fn zeros(len: usize, unit: Unit) -> Self {
        Self::new(vec![0.0; len], unit)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stores `quantity` at `index` after converting it to the array's unit.
    pub fn set(&mut self, index: usize, quantity: Quantity, system: &UnitSystem) -> Result<()> {
        let converted = quantity.to(self.unit, system)?;
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = converted.value;
                Ok(())
            }
            None => Err(HaloError::Config(format!(
                "index {} out of bounds for array of length {}",
                index,
                self.values.len()
            ))),
        }
    }

    pub fn get(&self, index: usize) -> Option<Quantity> {
        self.values.get(index).map(|v| Quantity::new(*v, self.unit))
    }
}
