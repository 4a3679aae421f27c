//! Axis remapping between the IMU world frame and the globe frame
//!
//! A sensor strapped inside a globe rarely has its axes lined up with the
//! globe's polar axis. An [`AxisRemap`] is a signed permutation written as
//! three signed axis names, one per output axis.
//!
//! # Example
//! ```
//! use nalgebra::Vector3;
//! use globe_coords::AxisRemap;
//!
//! // Globe X = IMU Z, globe Y = -IMU X, globe Z = -IMU Y
//! let remap: AxisRemap = "+z-x-y".parse().unwrap();
//!
//! let globe = remap.apply(&Vector3::new(1.0, 2.0, 3.0));
//! assert_eq!(globe, Vector3::new(3.0, -1.0, -2.0));
//! ```

use core::fmt;
use core::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// One source axis with its sign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedAxis {
    /// Source component index: 0 = x, 1 = y, 2 = z
    index: usize,
    negated: bool,
}

impl SignedAxis {
    pub const POS_X: Self = Self::new(0, false);
    pub const POS_Y: Self = Self::new(1, false);
    pub const POS_Z: Self = Self::new(2, false);

    const fn new(index: usize, negated: bool) -> Self {
        Self { index, negated }
    }

    fn sign(&self) -> f64 {
        if self.negated { -1.0 } else { 1.0 }
    }
}

impl fmt::Display for SignedAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negated { '-' } else { '+' };
        let name = ['x', 'y', 'z'][self.index];
        write!(f, "{sign}{name}")
    }
}

/// Signed permutation of the three axes
///
/// Output axis `i` takes its value from `sources[i]`. Construction rejects
/// anything that is not a permutation, so the remap is always a proper or
/// improper rotation and always invertible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AxisRemap {
    sources: [SignedAxis; 3],
}

impl AxisRemap {
    /// `+x+y+z`
    pub const IDENTITY: Self = Self {
        sources: [SignedAxis::POS_X, SignedAxis::POS_Y, SignedAxis::POS_Z],
    };

    /// Builds a remap from per-output source axes
    pub fn new(x: SignedAxis, y: SignedAxis, z: SignedAxis) -> Result<Self, ConfigError> {
        let sources = [x, y, z];
        let mut seen = [false; 3];
        for axis in &sources {
            if seen[axis.index] {
                return Err(ConfigError::InvalidAxisRemap(format!(
                    "axis {} used more than once",
                    ['x', 'y', 'z'][axis.index]
                )));
            }
            seen[axis.index] = true;
        }
        Ok(Self { sources })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Maps an IMU-frame vector into the globe frame
    pub fn apply(&self, v: &Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|i, _| {
            let source = self.sources[i];
            source.sign() * v[source.index]
        })
    }

    /// Maps a globe-frame vector back into the IMU frame
    pub fn invert(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let mut out = Vector3::zeros();
        for (i, source) in self.sources.iter().enumerate() {
            out[source.index] = source.sign() * v[i];
        }
        out
    }
}

impl Default for AxisRemap {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for AxisRemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.sources;
        write!(f, "{x}{y}{z}")
    }
}

impl FromStr for AxisRemap {
    type Err = ConfigError;

    /// Parses strings such as `+z-x-y`; a missing sign means positive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAxisRemap(s.to_string());
        let mut axes = Vec::with_capacity(3);
        let mut negated = false;
        let mut pending_sign = false;

        for c in s.trim().chars() {
            match c.to_ascii_lowercase() {
                '+' | '-' if !pending_sign => {
                    negated = c == '-';
                    pending_sign = true;
                }
                name @ ('x' | 'y' | 'z') => {
                    let index = (name as u8 - b'x') as usize;
                    axes.push(SignedAxis::new(index, negated));
                    negated = false;
                    pending_sign = false;
                }
                _ => return Err(invalid()),
            }
        }

        match axes.as_slice() {
            [x, y, z] if !pending_sign => Self::new(*x, *y, *z),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for AxisRemap {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AxisRemap> for String {
    fn from(remap: AxisRemap) -> Self {
        remap.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_leaves_vectors_alone() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert_eq!(AxisRemap::IDENTITY.apply(&v), v);
        assert_eq!(AxisRemap::IDENTITY.invert(&v), v);
        assert!(AxisRemap::default().is_identity());
    }

    #[test]
    fn test_swap_and_negate() {
        let remap: AxisRemap = "+y-x+z".parse().unwrap();
        let body = remap.apply(&Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(body, Vector3::new(2.0, -1.0, 3.0));
    }

    #[test]
    fn test_invert_round_trips() {
        let remap: AxisRemap = "-z+x-y".parse().unwrap();
        let v = Vector3::new(0.3, -1.2, 4.5);
        assert_eq!(remap.invert(&remap.apply(&v)), v);
        assert_eq!(remap.apply(&remap.invert(&v)), v);
    }

    #[test]
    fn test_unsigned_axes_default_positive() {
        let remap: AxisRemap = "zxy".parse().unwrap();
        assert_eq!(remap.to_string(), "+z+x+y");
    }

    #[test]
    fn test_rejects_repeated_axis() {
        let err = "+x+x+z".parse::<AxisRemap>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAxisRemap(_)));
    }

    #[test]
    fn test_rejects_malformed_strings() {
        for bad in ["", "+x+y", "+x+y+z+x", "+x+y+", "+x+w+z", "--x+y+z"] {
            assert!(bad.parse::<AxisRemap>().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            remap: AxisRemap,
        }
        let parsed: Wrapper = toml::from_str("remap = \"+z-x-y\"").unwrap();
        assert_eq!(parsed.remap.to_string(), "+z-x-y");
    }
}
