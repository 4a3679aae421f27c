//! Geo-projection of world-space vectors onto latitude and longitude

use nalgebra::{Matrix3, Quaternion, Vector3};

use crate::axes::AxisRemap;
use crate::compass::{MagnetometerCorrection, heading_degrees};
use crate::config::ConfigError;
use crate::math::{EPSILON, QuaternionExt, RAD_TO_DEG, Vector3Ext, asin_degrees, wrap_longitude};
use crate::sensor::{Capabilities, Sample};
use crate::types::{GeoCoordinate, Projection, ProjectionMode, ProjectorSettings};

/// Orthonormal globe frame that latitude and longitude are measured against
///
/// Latitude is `asin(v · north)` and longitude is
/// `atan2(v · east, v · reference)`. The canonical frame puts north on +Z,
/// east on +Y and the prime meridian on +X.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFrame {
    pub north: Vector3<f64>,
    pub east: Vector3<f64>,
    pub reference: Vector3<f64>,
}

impl GeoFrame {
    pub fn canonical() -> Self {
        Self {
            north: Vector3::z(),
            east: Vector3::y(),
            reference: Vector3::x(),
        }
    }

    /// Frame obtained by rotating the canonical axes with `rotation`
    pub fn from_rotation(rotation: &Matrix3<f64>) -> Self {
        Self {
            north: rotation * Vector3::z(),
            east: rotation * Vector3::y(),
            reference: rotation * Vector3::x(),
        }
    }

    /// Unit vector of a location expressed in this frame
    pub fn location_vector(&self, coordinate: &GeoCoordinate) -> Vector3<f64> {
        let local = coordinate.to_unit_vector();
        self.reference * local.x + self.east * local.y + self.north * local.z
    }
}

impl Default for GeoFrame {
    fn default() -> Self {
        Self::canonical()
    }
}

fn is_near_pole(vertical: f64, pole_threshold: f64) -> bool {
    vertical.abs() > 1.0 - pole_threshold
}

/// Projects a single pointing vector onto the globe
///
/// Returns [`Projection::Undefined`] for a zero-length or non-finite vector.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use globe_coords::{GeoFrame, projector::project_single};
///
/// let p = project_single(&Vector3::new(0.0, 1.0, 0.0), &GeoFrame::canonical(), 1e-3);
/// let c = p.coordinate().unwrap();
/// assert!(c.latitude.abs() < 1e-9);
/// assert!((c.longitude - 90.0).abs() < 1e-9);
/// ```
pub fn project_single(vector: &Vector3<f64>, frame: &GeoFrame, pole_threshold: f64) -> Projection {
    let Some(v) = vector.direction() else {
        return Projection::Undefined;
    };

    let vertical = v.dot(&frame.north);
    let longitude = v.dot(&frame.east).atan2(v.dot(&frame.reference)) * RAD_TO_DEG;

    Projection::Defined {
        coordinate: GeoCoordinate {
            latitude: asin_degrees(vertical),
            longitude: wrap_longitude(longitude),
        },
        ambiguous_longitude: is_near_pole(vertical, pole_threshold),
    }
}

/// Projects an up/forward vector pair onto the globe
///
/// Latitude comes from the up vector's component along the frame's north
/// axis. Longitude is the direction of the forward vector once projected onto
/// the plane orthogonal to up, measured in a local east/north basis built
/// from cross products with the north axis.
pub fn project_dual(
    up: &Vector3<f64>,
    forward: &Vector3<f64>,
    frame: &GeoFrame,
    pole_threshold: f64,
) -> Projection {
    let (Some(u), Some(f)) = (up.direction(), forward.direction()) else {
        return Projection::Undefined;
    };

    let vertical = u.dot(&frame.north);

    // Exactly at a pole the local east is undefined; borrow the frame's east
    let local_east = frame
        .north
        .cross(&u)
        .direction()
        .unwrap_or(frame.east);
    let local_north = u.cross(&local_east);

    let horizontal = f - u * f.dot(&u);
    if horizontal.norm() < EPSILON {
        return Projection::Undefined;
    }

    let longitude =
        horizontal.dot(&local_east).atan2(horizontal.dot(&local_north)) * RAD_TO_DEG;

    Projection::Defined {
        coordinate: GeoCoordinate {
            latitude: asin_degrees(vertical),
            longitude: wrap_longitude(longitude),
        },
        ambiguous_longitude: is_near_pole(vertical, pole_threshold),
    }
}

/// Latitude from `up`, longitude from the tilt-compensated magnetic heading
pub fn project_magnetic(
    up: &Vector3<f64>,
    magnetic: &Vector3<f64>,
    forward: &Vector3<f64>,
    frame: &GeoFrame,
    pole_threshold: f64,
) -> Projection {
    let Some(u) = up.direction() else {
        return Projection::Undefined;
    };
    let Some(heading) = heading_degrees(&u, magnetic, forward) else {
        return Projection::Undefined;
    };

    let vertical = u.dot(&frame.north);
    Projection::Defined {
        coordinate: GeoCoordinate {
            latitude: asin_degrees(vertical),
            longitude: wrap_longitude(heading),
        },
        ambiguous_longitude: is_near_pole(vertical, pole_threshold),
    }
}

/// What the calibration engine needs to know about a raw sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Capture {
    /// Raw orientation, when the projector uses one
    pub orientation: Option<Quaternion<f64>>,
    /// Pointing vector in the IMU world frame, before any axis remap
    pub pointing: Option<Vector3<f64>>,
    /// Uncalibrated coordinate of the sample
    pub coordinate: Option<GeoCoordinate>,
}

/// Geo-projector configured for one mounting and projection mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projector {
    mode: ProjectionMode,
    forward_axis: Vector3<f64>,
    up_axis: Vector3<f64>,
    remap: AxisRemap,
    pole_threshold: f64,
    magnetometer: MagnetometerCorrection,
}

impl ProjectionMode {
    /// Sensor readings this projection mode needs
    pub fn required_capabilities(&self) -> Capabilities {
        match self {
            ProjectionMode::SingleVector | ProjectionMode::DualVector => {
                Capabilities::ORIENTATION
            }
            ProjectionMode::GravityAnchored => Capabilities::GRAVITY,
            ProjectionMode::MagneticHeading => Capabilities::GRAVITY | Capabilities::MAGNETIC,
        }
    }

    pub fn uses_orientation(&self) -> bool {
        self.required_capabilities()
            .contains(Capabilities::ORIENTATION)
    }
}

impl Projector {
    /// Builds a projector, checking it against the sensor's capabilities
    ///
    /// # Example
    /// ```
    /// use globe_coords::{Capabilities, ProjectionMode, Projector, ProjectorSettings};
    ///
    /// let settings = ProjectorSettings {
    ///     mode: ProjectionMode::MagneticHeading,
    ///     ..Default::default()
    /// };
    /// assert!(Projector::new(&settings, Capabilities::ORIENTATION).is_err());
    /// assert!(Projector::new(&settings, Capabilities::all()).is_ok());
    /// ```
    pub fn new(settings: &ProjectorSettings, available: Capabilities) -> Result<Self, ConfigError> {
        let required = settings.mode.required_capabilities();
        if !available.contains(required) {
            return Err(ConfigError::MissingCapability {
                mode: settings.mode,
                missing: required.difference(available),
            });
        }

        let forward_axis = settings
            .forward_axis
            .direction()
            .ok_or(ConfigError::InvalidAxis("forward_axis"))?;
        let up_axis = settings
            .up_axis
            .direction()
            .ok_or(ConfigError::InvalidAxis("up_axis"))?;

        if settings.mode == ProjectionMode::DualVector
            && forward_axis.cross(&up_axis).norm() < 1e-6
        {
            return Err(ConfigError::InvalidAxis("forward_axis is parallel to up_axis"));
        }

        if !(settings.pole_threshold > 0.0 && settings.pole_threshold < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "pole_threshold",
                value: settings.pole_threshold,
            });
        }

        Ok(Self {
            mode: settings.mode,
            forward_axis,
            up_axis,
            remap: settings.remap,
            pole_threshold: settings.pole_threshold,
            magnetometer: MagnetometerCorrection::new(
                settings.soft_iron_matrix,
                settings.hard_iron_offset,
            ),
        })
    }

    pub fn mode(&self) -> ProjectionMode {
        self.mode
    }

    pub fn remap(&self) -> AxisRemap {
        self.remap
    }

    pub fn forward_axis(&self) -> Vector3<f64> {
        self.forward_axis
    }

    pub fn required_capabilities(&self) -> Capabilities {
        self.mode.required_capabilities()
    }

    /// Pointing vector of a sample in the IMU world frame
    ///
    /// Orientation modes rotate the forward axis; gravity modes use the
    /// inverted gravity vector.
    pub fn pointing_vector(&self, sample: &Sample) -> Option<Vector3<f64>> {
        if self.mode.uses_orientation() {
            let q = sample.orientation?;
            if q.is_unset() || !q.is_finite_quaternion() {
                return None;
            }
            Some(q.normalize_or_identity().rotate_vector(&self.forward_axis))
        } else {
            sample.gravity.filter(|g| g.is_finite_vector()).map(|g| -g)
        }
    }

    /// Projects a sample whose orientation has already been corrected
    pub fn project(&self, sample: &Sample, frame: &GeoFrame) -> Projection {
        match self.mode {
            ProjectionMode::SingleVector | ProjectionMode::GravityAnchored => {
                match self.pointing_vector(sample) {
                    Some(v) => project_single(&self.remap.apply(&v), frame, self.pole_threshold),
                    None => Projection::Undefined,
                }
            }
            ProjectionMode::DualVector => {
                let Some(q) = sample
                    .orientation
                    .filter(|q| !q.is_unset() && q.is_finite_quaternion())
                else {
                    return Projection::Undefined;
                };
                let q = q.normalize_or_identity();
                let up = self.remap.apply(&q.rotate_vector(&self.up_axis));
                let forward = self.remap.apply(&q.rotate_vector(&self.forward_axis));
                project_dual(&up, &forward, frame, self.pole_threshold)
            }
            ProjectionMode::MagneticHeading => {
                let (Some(gravity), Some(magnetic)) = (sample.gravity, sample.magnetic) else {
                    return Projection::Undefined;
                };
                if !gravity.is_finite_vector() || !magnetic.is_finite_vector() {
                    return Projection::Undefined;
                }
                let up = self.remap.apply(&-gravity);
                let magnetic = self.remap.apply(&self.magnetometer.apply(&magnetic));
                let forward = self.remap.apply(&self.forward_axis);
                project_magnetic(&up, &magnetic, &forward, frame, self.pole_threshold)
            }
        }
    }

    /// Summarizes a raw sample for the calibration engine
    pub fn capture(&self, sample: &Sample) -> Capture {
        Capture {
            orientation: sample.orientation,
            pointing: self.pointing_vector(sample),
            coordinate: self.project(sample, &GeoFrame::canonical()).coordinate(),
        }
    }

    /// Unit vector in the IMU world frame of a location given in `frame`
    pub fn target_vector(&self, coordinate: &GeoCoordinate, frame: &GeoFrame) -> Vector3<f64> {
        self.remap.invert(&frame.location_vector(coordinate))
    }
}
