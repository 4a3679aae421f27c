//! Exponential orientation smoothing

use nalgebra::Quaternion;

use crate::math::QuaternionExt;

/// Slerp-based exponential moving average over corrected orientations
///
/// Each update moves the smoothed orientation `factor` of the way toward the
/// new one. While disabled, orientations pass through unchanged and nothing
/// is remembered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSmoother {
    factor: f64,
    enabled: bool,
    /// All-zero until the first update
    previous: Quaternion<f64>,
}

impl OrientationSmoother {
    pub fn new(factor: f64, enabled: bool) -> Self {
        Self {
            factor: factor.clamp(0.0, 1.0),
            enabled,
            previous: Quaternion::from_xyzw(0.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flips smoothing on or off and returns the new state
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.reset();
        self.enabled
    }

    /// Forgets the smoothed history
    pub fn reset(&mut self) {
        self.previous = Quaternion::from_xyzw(0.0, 0.0, 0.0, 0.0);
    }

    pub fn update(&mut self, orientation: &Quaternion<f64>) -> Quaternion<f64> {
        if !self.enabled {
            return *orientation;
        }
        self.previous = self.previous.slerp_toward(orientation, self.factor);
        self.previous
    }
}
