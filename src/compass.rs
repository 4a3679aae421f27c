//! Tilt-compensated magnetic heading for the magnetic-heading projector

use nalgebra::{Matrix3, Vector3};

use crate::math::{RAD_TO_DEG, Vector3Ext};

/// Hard- and soft-iron correction for raw magnetometer readings
///
/// Corrected reading: `soft_iron * (raw - hard_iron)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnetometerCorrection {
    pub soft_iron: Matrix3<f64>,
    pub hard_iron: Vector3<f64>,
}

impl MagnetometerCorrection {
    pub fn new(soft_iron: Matrix3<f64>, hard_iron: Vector3<f64>) -> Self {
        Self {
            soft_iron,
            hard_iron,
        }
    }

    pub fn apply(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        self.soft_iron * (raw - self.hard_iron)
    }
}

impl Default for MagnetometerCorrection {
    fn default() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }
}

/// Heading of `forward` relative to magnetic north, in degrees
///
/// Positive angles turn counter-clockwise about `up`, from north toward west.
///
/// Builds a horizontal west/north pair from `up` and the magnetic field with
/// cross products, so the result does not depend on how far the sensor is
/// tilted. Returns `None` when the field is parallel to `up` or either input
/// is zero.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use globe_coords::compass::heading_degrees;
///
/// let up = Vector3::new(0.0, 0.0, 1.0);
/// // Field points to the sensor's right, so forward (+X) faces west
/// let field = Vector3::new(0.0, -1.0, -0.5);
/// let heading = heading_degrees(&up, &field, &Vector3::x()).unwrap();
/// assert!((heading - 90.0).abs() < 1e-9);
/// ```
pub fn heading_degrees(
    up: &Vector3<f64>,
    magnetic: &Vector3<f64>,
    forward: &Vector3<f64>,
) -> Option<f64> {
    let up = up.direction()?;
    let west = up.cross(magnetic).direction()?;
    let north = west.cross(&up).direction()?;

    let heading = forward.dot(&west).atan2(forward.dot(&north));
    Some(heading * RAD_TO_DEG)
}
