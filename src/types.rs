//! Core types and settings for globe-coords

use std::time::Duration;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::axes::AxisRemap;
use crate::math::{wrap_longitude, DEG_TO_RAD};

/// Geographic position in degrees
///
/// Latitude lies in [-90, 90] and longitude in (-180, 180]. Use
/// [`GeoCoordinate::new`] to clamp and wrap arbitrary input.
///
/// # Example
/// ```
/// use globe_coords::GeoCoordinate;
///
/// let spot = GeoCoordinate::new(95.0, 190.0);
/// assert_eq!(spot.latitude, 90.0);
/// assert!((spot.longitude - -170.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoCoordinate {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
}

impl GeoCoordinate {
    /// 0° latitude, 0° longitude
    pub const NULL_ISLAND: Self = Self {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub const NORTH_POLE: Self = Self {
        latitude: 90.0,
        longitude: 0.0,
    };

    /// Builds a coordinate, clamping latitude and wrapping longitude
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: latitude.clamp(-90.0, 90.0),
            longitude: wrap_longitude(longitude),
        }
    }

    /// Adds scalar offsets, keeping the result inside the valid ranges
    pub fn offset_by(self, latitude: f64, longitude: f64) -> Self {
        Self::new(self.latitude + latitude, self.longitude + longitude)
    }

    /// Unit vector for this location with N=+Z, E=+Y and the prime meridian on +X
    pub fn to_unit_vector(&self) -> Vector3<f64> {
        let lat = self.latitude * DEG_TO_RAD;
        let lon = self.longitude * DEG_TO_RAD;
        Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }
}

/// Result of projecting an orientation onto the globe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// The input vectors had no usable direction (sensor still warming up)
    Undefined,
    Defined {
        coordinate: GeoCoordinate,
        /// Set near the poles where longitude is numerically unstable
        ambiguous_longitude: bool,
    },
}

impl Projection {
    pub fn coordinate(&self) -> Option<GeoCoordinate> {
        match self {
            Projection::Undefined => None,
            Projection::Defined { coordinate, .. } => Some(*coordinate),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Projection::Defined {
                ambiguous_longitude: true,
                ..
            }
        )
    }
}

/// How orientation data is turned into latitude and longitude
///
/// - **SingleVector**: latitude and longitude of the world-space forward axis
/// - **DualVector**: latitude from the up axis, longitude from the forward
///   axis measured in the local east/north plane
/// - **GravityAnchored**: the inverted gravity vector treated as the pointing
///   direction
/// - **MagneticHeading**: latitude from gravity, longitude from the
///   tilt-compensated magnetic heading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    #[default]
    SingleVector,
    DualVector,
    GravityAnchored,
    MagneticHeading,
}

/// Projector settings
///
/// # Example
/// ```
/// use globe_coords::{ProjectionMode, ProjectorSettings};
/// use nalgebra::Vector3;
///
/// let settings = ProjectorSettings {
///     mode: ProjectionMode::DualVector,
///     forward_axis: Vector3::new(0.0, 0.0, 1.0),
///     up_axis: Vector3::new(1.0, 0.0, 0.0),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectorSettings {
    pub mode: ProjectionMode,
    /// Sensor-local pointing axis
    pub forward_axis: Vector3<f64>,
    /// Sensor-local top axis, used by the dual-vector mode
    pub up_axis: Vector3<f64>,
    /// Remaps IMU world axes onto the globe's axes before projecting
    pub remap: AxisRemap,
    /// Longitude is flagged ambiguous once |vertical| exceeds `1 - pole_threshold`
    pub pole_threshold: f64,
    /// Magnetometer hard-iron offset, subtracted before heading computation
    pub hard_iron_offset: Vector3<f64>,
    /// Magnetometer soft-iron correction matrix
    pub soft_iron_matrix: Matrix3<f64>,
}

impl Default for ProjectorSettings {
    fn default() -> Self {
        Self {
            mode: ProjectionMode::default(),
            forward_axis: Vector3::x(),
            up_axis: Vector3::z(),
            remap: AxisRemap::IDENTITY,
            pole_threshold: 1e-3,
            hard_iron_offset: Vector3::zeros(),
            soft_iron_matrix: Matrix3::identity(),
        }
    }
}

/// Calibration strategy, selected once per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStrategy {
    /// The captured pose becomes the origin
    #[default]
    ZeroPoint,
    /// The captured pose is mapped onto a named target location
    TargetMapping,
    /// Only the captured longitude is zeroed, by a turn about the polar axis;
    /// latitude is left alone
    LongitudeZero,
    /// A sequence of known reference poses defines the globe frame
    Guided,
}

/// A known location the operator points at during guided calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub name: String,
    pub location: GeoCoordinate,
}

impl ReferencePoint {
    pub fn new(name: impl Into<String>, location: GeoCoordinate) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// Calibration engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub strategy: CalibrationStrategy,
    /// Location the target-mapping strategy maps the captured pose onto
    pub target: GeoCoordinate,
    /// Reference poses for the guided strategy, captured in order
    pub reference_points: Vec<ReferencePoint>,
    /// How long a guided step waits for a capture before it is skipped
    pub step_timeout_ms: u64,
}

impl CalibrationSettings {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            strategy: CalibrationStrategy::default(),
            target: GeoCoordinate::NULL_ISLAND,
            reference_points: vec![
                ReferencePoint::new("North Pole", GeoCoordinate::NORTH_POLE),
                ReferencePoint::new("Null Island", GeoCoordinate::NULL_ISLAND),
            ],
            step_timeout_ms: 30_000,
        }
    }
}

/// Coordinate stream driver settings
///
/// All intervals are in milliseconds so the struct maps directly onto the
/// TOML configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Pause after each emitted coordinate; sets the output rate
    pub emit_interval_ms: u64,
    /// Pause before retrying after a no-data sample
    pub retry_interval_ms: u64,
    /// Upper bound on a single transport send
    pub send_timeout_ms: u64,
    /// Pause after an unexpected iteration failure
    pub error_backoff_ms: u64,
    /// Sensor reinitialization attempts after a transient failure
    pub reinit_attempts: u32,
    /// Pause between reinitialization attempts
    pub reinit_backoff_ms: u64,
    /// Repeat the last good longitude while the projector flags ambiguity
    pub hold_longitude_near_pole: bool,
    /// Start with orientation smoothing enabled
    pub smoothing_enabled: bool,
    /// Slerp factor for smoothing, in (0, 1]
    pub smoothing_factor: f64,
    /// How close, in degrees, a coordinate must be to count as over a landmark
    pub landmark_tolerance_deg: f64,
}

impl DriverSettings {
    pub fn emit_interval(&self) -> Duration {
        Duration::from_millis(self.emit_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn reinit_backoff(&self) -> Duration {
        Duration::from_millis(self.reinit_backoff_ms)
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            emit_interval_ms: 100,
            retry_interval_ms: 10,
            send_timeout_ms: 500,
            error_backoff_ms: 200,
            reinit_attempts: 3,
            reinit_backoff_ms: 200,
            hold_longitude_near_pole: true,
            smoothing_enabled: false,
            smoothing_factor: 0.25,
            landmark_tolerance_deg: 1.0,
        }
    }
}
