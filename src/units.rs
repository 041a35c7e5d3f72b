// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Conversion of physical sizes (micrometers) to pixel counts for a given
//! objective magnification, microscope camera and sensor binning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Microscopes whose cameras we have calibration for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Microscope {
    Ixm,
    Flo,
    Flo2,
    Ds,
    Ds2,
    Ds3,
}

impl Microscope {
    /// Physical size of one (unbinned) camera pixel, in micrometers.
    pub fn sensor_pixel_um(self) -> f64 {
        match self {
            // Andor Zyla sCMOS.
            Microscope::Ixm => 6.5,
            // Hamamatsu ORCA-ER (ICX285).
            Microscope::Flo | Microscope::Flo2 => 6.45,
            Microscope::Ds | Microscope::Ds2 | Microscope::Ds3 => 6.5,
        }
    }
}

impl FromStr for Microscope {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ixm" => Ok(Microscope::Ixm),
            "flo" => Ok(Microscope::Flo),
            "flo2" => Ok(Microscope::Flo2),
            "ds" => Ok(Microscope::Ds),
            "ds2" => Ok(Microscope::Ds2),
            "ds3" => Ok(Microscope::Ds3),
            _ => Err(TrackError::InvalidConfig(
                format!("unknown microscope '{}'", s))),
        }
    }
}

impl TryFrom<String> for Microscope {
    type Error = TrackError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Microscope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Microscope::Ixm => "ixm",
            Microscope::Flo => "flo",
            Microscope::Flo2 => "flo2",
            Microscope::Ds => "ds",
            Microscope::Ds2 => "ds2",
            Microscope::Ds3 => "ds3",
        };
        f.write_str(name)
    }
}

impl From<Microscope> for String {
    fn from(m: Microscope) -> String {
        m.to_string()
    }
}

/// Sensor binning, written as e.g. "2x2".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Binning(u32);

impl Binning {
    pub fn factor(self) -> u32 {
        self.0
    }

    // Binned stacks skip the final 2x2 minimum filter during soma
    // segmentation.
    pub fn is_binned(self) -> bool {
        self.0 > 1
    }
}

impl FromStr for Binning {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TrackError::InvalidConfig(format!("invalid binning '{}'", s));
        let (a, b) = s.trim().split_once(|c: char| c == 'x' || c == 'X').ok_or_else(bad)?;
        let a: u32 = a.trim().parse().map_err(|_| bad())?;
        let b: u32 = b.trim().parse().map_err(|_| bad())?;
        if a != b || a == 0 || a > 4 {
            return Err(bad());
        }
        Ok(Binning(a))
    }
}

impl TryFrom<String> for Binning {
    type Error = TrackError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Binning> for String {
    fn from(b: Binning) -> String {
        format!("{}x{}", b.0, b.0)
    }
}

/// Converts `microns` to (fractional) pixels. The scale is linear and
/// monotonic in `microns`.
///
/// # Panics
/// If `microns` is negative or `magnification` is not positive.
pub fn to_pixels(microns: f64, magnification: f64, microscope: Microscope,
                 binning: Binning) -> f64 {
    assert!(microns >= 0.0, "negative length {}", microns);
    assert!(magnification > 0.0, "non-positive magnification {}", magnification);
    microns * magnification /
        (microscope.sensor_pixel_um() * binning.factor() as f64)
}

/// Fixed micrometer to pixel scale for one experiment.
#[derive(Copy, Clone, Debug)]
pub struct UnitConverter {
    px_per_um: f64,
}

impl UnitConverter {
    pub fn new(magnification: f64, microscope: Microscope, binning: Binning)
               -> UnitConverter {
        UnitConverter{px_per_um: to_pixels(1.0, magnification, microscope, binning)}
    }

    /// A converter with an explicit scale; mostly useful for synthetic data.
    pub fn from_px_per_um(px_per_um: f64) -> UnitConverter {
        assert!(px_per_um > 0.0);
        UnitConverter{px_per_um}
    }

    pub fn px_f64(&self, microns: f64) -> f64 {
        assert!(microns >= 0.0);
        microns * self.px_per_um
    }

    /// Rounded pixel count, never less than 1. Used for kernel sizes and
    /// margins.
    pub fn px(&self, microns: f64) -> u32 {
        (self.px_f64(microns).round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use super::*;

    #[test]
    fn test_to_pixels() {
        let bin1: Binning = "1x1".parse().unwrap();
        let bin2: Binning = "2x2".parse().unwrap();
        // 10x objective, 6.5um camera pixels: 0.65um per pixel.
        assert_abs_diff_eq!(to_pixels(6.5, 10.0, Microscope::Ixm, bin1),
                            10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(to_pixels(6.5, 10.0, Microscope::Ixm, bin2),
                            5.0, epsilon = 1e-9);
        assert!(to_pixels(3.0, 4.0, Microscope::Flo, bin1) <
                to_pixels(5.0, 4.0, Microscope::Flo, bin1));
    }

    #[test]
    #[should_panic]
    fn test_to_pixels_bad_magnification() {
        to_pixels(1.0, 0.0, Microscope::Ds, Binning(1));
    }

    #[test]
    fn test_parse() {
        assert_eq!("IXM".parse::<Microscope>().unwrap(), Microscope::Ixm);
        assert!("leica".parse::<Microscope>().is_err());
        assert_eq!("4x4".parse::<Binning>().unwrap().factor(), 4);
        assert!(!"1x1".parse::<Binning>().unwrap().is_binned());
        assert!("2x3".parse::<Binning>().is_err());
        assert!("banana".parse::<Binning>().is_err());
    }

    #[test]
    fn test_converter_px() {
        let conv = UnitConverter::from_px_per_um(0.5);
        assert_eq!(conv.px(10.0), 5);
        assert_eq!(conv.px(0.1), 1);
        assert_abs_diff_eq!(conv.px_f64(3.0), 1.5);
    }
}
