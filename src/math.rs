//! Quaternion algebra and nalgebra extensions for globe-coords
//!
//! Quaternions use nalgebra's storage, so `(x, y, z, w)` maps to
//! `(q.i, q.j, q.k, q.w)`. The all-zero quaternion is the "no data yet"
//! sentinel reported by a sensor that has not warmed up.

use nalgebra::{Quaternion, Vector3};

/// Mathematical constants
pub const DEG_TO_RAD: f64 = core::f64::consts::PI / 180.0;
pub const RAD_TO_DEG: f64 = 180.0 / core::f64::consts::PI;

/// Below this magnitude a vector or quaternion is treated as zero
pub const EPSILON: f64 = 1e-9;

/// Above this dot product slerp degrades to normalized linear interpolation
const SLERP_LINEAR_THRESHOLD: f64 = 0.9995;

/// Dot products closer than this to -1 are treated as antiparallel
const ANTIPARALLEL_TOLERANCE: f64 = 1e-6;

/// Extension trait for Vector3 operations
pub trait Vector3Ext: Sized {
    /// Unit vector in the same direction, or `None` for zero or non-finite input
    fn direction(&self) -> Option<Self>;

    /// Whether every component is finite
    fn is_finite_vector(&self) -> bool;
}

impl Vector3Ext for Vector3<f64> {
    fn direction(&self) -> Option<Self> {
        if !self.is_finite_vector() {
            return None;
        }
        self.try_normalize(EPSILON)
    }

    fn is_finite_vector(&self) -> bool {
        self.iter().all(|c| c.is_finite())
    }
}

/// Extension trait for rotation quaternions
pub trait QuaternionExt: Sized {
    /// Builds a quaternion from components in `(x, y, z, w)` order
    fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Self;

    /// Rotation of `angle` degrees about `axis`; identity for a zero axis
    fn from_axis_angle_degrees(axis: &Vector3<f64>, angle: f64) -> Self;

    /// Shortest-arc rotation carrying `from` onto `to`
    ///
    /// Returns `None` when either input has zero length. Antiparallel inputs
    /// produce a 180° turn about an axis orthogonal to `from`.
    fn from_two_vectors(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<Self>;

    /// Whether this is the all-zero "no data" sentinel
    fn is_unset(&self) -> bool;

    /// Whether every component is finite
    fn is_finite_quaternion(&self) -> bool;

    /// `q / |q|`, or identity when `|q| = 0`
    fn normalize_or_identity(&self) -> Self;

    /// Inverse of a unit quaternion, which equals its conjugate
    ///
    /// Inputs are assumed normalized; no general inverse is attempted.
    fn unit_inverse(&self) -> Self;

    /// Rotates `v` with the sandwich product `q (v, 0) q*`
    ///
    /// The scalar part of the product is discarded without checking it.
    fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64>;

    /// Spherical interpolation from `self` toward `target` by `t` in [0, 1]
    ///
    /// An unset `self` means "no previous value" and yields `target`.
    fn slerp_toward(&self, target: &Self, t: f64) -> Self;
}

impl QuaternionExt for Quaternion<f64> {
    fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Self {
        Quaternion::new(w, x, y, z)
    }

    fn from_axis_angle_degrees(axis: &Vector3<f64>, angle: f64) -> Self {
        let Some(axis) = axis.direction() else {
            return Quaternion::identity();
        };
        let half = 0.5 * angle * DEG_TO_RAD;
        Quaternion::from_parts(half.cos(), axis * half.sin())
    }

    fn from_two_vectors(from: &Vector3<f64>, to: &Vector3<f64>) -> Option<Self> {
        let from = from.direction()?;
        let to = to.direction()?;
        let dot = from.dot(&to);

        if dot < -1.0 + ANTIPARALLEL_TOLERANCE {
            // The cross product vanishes, so pick any axis orthogonal to `from`
            let axis = from
                .cross(&Vector3::x())
                .direction()
                .or_else(|| from.cross(&Vector3::y()).direction())?;
            return Some(Quaternion::from_parts(0.0, axis));
        }

        Some(Quaternion::from_parts(1.0 + dot, from.cross(&to)).normalize_or_identity())
    }

    fn is_unset(&self) -> bool {
        self.coords.iter().all(|c| *c == 0.0)
    }

    fn is_finite_quaternion(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    fn normalize_or_identity(&self) -> Self {
        let norm = self.norm();
        if norm > 0.0 && norm.is_finite() {
            *self / norm
        } else {
            Quaternion::identity()
        }
    }

    fn unit_inverse(&self) -> Self {
        self.conjugate()
    }

    fn rotate_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let rotated = *self * Quaternion::from_imag(*v) * self.conjugate();
        rotated.imag()
    }

    fn slerp_toward(&self, target: &Self, t: f64) -> Self {
        if self.is_unset() {
            return target.normalize_or_identity();
        }

        let start = self.normalize_or_identity();
        let mut end = target.normalize_or_identity();
        let mut dot = start.dot(&end);

        // q and -q encode the same rotation; take the shorter way round
        if dot < 0.0 {
            end = -end;
            dot = -dot;
        }

        if dot > SLERP_LINEAR_THRESHOLD {
            let blended = start.coords * (1.0 - t) + end.coords * t;
            return Quaternion::from(blended).normalize_or_identity();
        }

        let theta_0 = dot.acos();
        let theta = theta_0 * t;
        let sin_theta_0 = theta_0.sin();
        let s0 = (theta_0 - theta).sin() / sin_theta_0;
        let s1 = theta.sin() / sin_theta_0;

        Quaternion::from(start.coords * s0 + end.coords * s1).normalize_or_identity()
    }
}

/// Wraps a longitude into (-180, 180] with `((lon + 180) mod 360) - 180`
///
/// Values already inside the range are returned untouched so the law is
/// exactly idempotent. Non-finite input is returned as-is.
pub fn wrap_longitude(longitude: f64) -> f64 {
    if !longitude.is_finite() || (longitude > -180.0 && longitude <= 180.0) {
        return longitude;
    }
    let wrapped = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 { wrapped + 360.0 } else { wrapped }
}

/// `asin` in degrees with the argument clamped into [-1, 1]
pub fn asin_degrees(value: f64) -> f64 {
    value.clamp(-1.0, 1.0).asin() * RAD_TO_DEG
}
