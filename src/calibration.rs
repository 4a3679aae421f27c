//! Calibration engine
//!
//! [`CalibrationState`] maps raw sensor orientation onto the globe. Four
//! strategies are supported:
//!
//! - **Zero-point**: the captured pose becomes the origin. With an
//!   orientation-based projector this stores the inverse of the captured
//!   quaternion. Vector-only projectors zero scalar latitude/longitude
//!   offsets instead.
//! - **Target-mapping**: the shortest-arc rotation that carries the captured
//!   pointing direction onto a target location, or target-minus-captured
//!   offsets for vector-only projectors.
//! - **Longitude-zero**: a turn about the polar axis that moves the
//!   captured pointing direction onto the prime meridian without changing
//!   its latitude, or a longitude-only offset for vector-only projectors.
//! - **Guided**: the operator points at a list of known reference locations
//!   in turn. The captures are fitted to a [`GeoFrame`] with TRIAD (two
//!   points) or an SVD best fit (three or more).
//!
//! # Example
//! ```
//! use nalgebra::{Quaternion, Vector3};
//! use globe_coords::{
//!     Capabilities, CalibrationSettings, CalibrationState, Projector, ProjectorSettings, Sample,
//!     math::QuaternionExt,
//! };
//!
//! let projector = Projector::new(&ProjectorSettings::default(), Capabilities::ORIENTATION).unwrap();
//! let mut calibration = CalibrationState::new(CalibrationSettings::default(), &projector);
//!
//! let pose = Quaternion::from_axis_angle_degrees(&Vector3::z(), 40.0);
//! calibration.calibrate(&projector.capture(&Sample::from_orientation(pose)), None).unwrap();
//!
//! let corrected = calibration.apply(&pose);
//! assert!((corrected.w - 1.0).abs() < 1e-9);
//! ```

use nalgebra::{Matrix3, Quaternion, Vector3};
use thiserror::Error;
use tracing::debug;

use crate::axes::AxisRemap;
use crate::math::{EPSILON, QuaternionExt, RAD_TO_DEG, Vector3Ext};
use crate::projector::{Capture, GeoFrame, Projector};
use crate::types::{CalibrationSettings, CalibrationStrategy, GeoCoordinate, ReferencePoint};

/// Singular values below this mark a rank-deficient fit
const RANK_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Capture has no usable reading")]
    ZeroSample,
    #[error("Capture contains non-finite components")]
    Malformed,
    #[error("Strategy needs an orientation but the capture has none")]
    MissingOrientation,
    #[error("Degenerate calibration geometry: {0}")]
    Degenerate(&'static str),
}

/// Where the calibration sequence stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Uncalibrated,
    /// Guided sequence waiting for the capture of reference point `i`
    AwaitingPoint(usize),
    Calibrated,
}

/// A guided capture: where the operator was told to point, and where the
/// sensor said it pointed
#[derive(Debug, Clone, Copy, PartialEq)]
struct PointPair {
    known: Vector3<f64>,
    measured: Vector3<f64>,
}

/// Calibration transform owned by the stream driver
#[derive(Debug, Clone)]
pub struct CalibrationState {
    settings: CalibrationSettings,
    remap: AxisRemap,
    uses_orientation: bool,
    phase: CalibrationPhase,
    quaternion: Quaternion<f64>,
    latitude_offset: f64,
    longitude_offset: f64,
    frame: GeoFrame,
    pairs: Vec<PointPair>,
    degraded: bool,
}

impl CalibrationState {
    pub fn new(settings: CalibrationSettings, projector: &Projector) -> Self {
        let mut state = Self {
            settings,
            remap: projector.remap(),
            uses_orientation: projector.mode().uses_orientation(),
            phase: CalibrationPhase::Uncalibrated,
            quaternion: Quaternion::identity(),
            latitude_offset: 0.0,
            longitude_offset: 0.0,
            frame: GeoFrame::canonical(),
            pairs: Vec::new(),
            degraded: false,
        };
        state.reset();
        state
    }

    pub fn strategy(&self) -> CalibrationStrategy {
        self.settings.strategy
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn quaternion(&self) -> Quaternion<f64> {
        self.quaternion
    }

    /// Scalar (latitude, longitude) offsets in degrees
    pub fn offsets(&self) -> (f64, f64) {
        (self.latitude_offset, self.longitude_offset)
    }

    pub fn frame(&self) -> &GeoFrame {
        &self.frame
    }

    /// Set when a guided sequence finished with skipped or missing points
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// False while a guided sequence is still collecting captures
    pub fn is_ready(&self) -> bool {
        !matches!(self.phase, CalibrationPhase::AwaitingPoint(_))
    }

    /// Reference point the operator should be pointing at, if any
    pub fn current_point(&self) -> Option<&ReferencePoint> {
        match self.phase {
            CalibrationPhase::AwaitingPoint(i) => self.settings.reference_points.get(i),
            _ => None,
        }
    }

    /// Returns the state to its initial phase
    ///
    /// A guided state restarts its sequence from the first reference point.
    pub fn reset(&mut self) {
        self.quaternion = Quaternion::identity();
        self.latitude_offset = 0.0;
        self.longitude_offset = 0.0;
        self.frame = GeoFrame::canonical();
        self.pairs.clear();
        self.degraded = false;
        self.phase = match self.settings.strategy {
            CalibrationStrategy::Guided if !self.settings.reference_points.is_empty() => {
                CalibrationPhase::AwaitingPoint(0)
            }
            CalibrationStrategy::Guided => {
                self.degraded = true;
                CalibrationPhase::Calibrated
            }
            _ => CalibrationPhase::Uncalibrated,
        };
    }

    /// Corrected orientation: `normalize(calibration ⊗ raw)`
    pub fn apply(&self, raw: &Quaternion<f64>) -> Quaternion<f64> {
        (self.quaternion * raw).normalize_or_identity()
    }

    /// Adds the scalar offsets, clamping latitude and wrapping longitude
    pub fn apply_offsets(&self, coordinate: GeoCoordinate) -> GeoCoordinate {
        coordinate.offset_by(self.latitude_offset, self.longitude_offset)
    }

    /// Feeds one capture into the active strategy
    ///
    /// `target` overrides the configured target of the target-mapping
    /// strategy; a zero-point state given a target maps onto it instead of
    /// zeroing. A rejected capture leaves the state unchanged.
    pub fn calibrate(
        &mut self,
        capture: &Capture,
        target: Option<GeoCoordinate>,
    ) -> Result<CalibrationPhase, CalibrationError> {
        match self.settings.strategy {
            CalibrationStrategy::Guided => self.capture_reference(capture),
            CalibrationStrategy::ZeroPoint if target.is_none() => self.zero(capture),
            CalibrationStrategy::LongitudeZero if target.is_none() => self.zero_longitude(capture),
            CalibrationStrategy::ZeroPoint
            | CalibrationStrategy::LongitudeZero
            | CalibrationStrategy::TargetMapping => {
                let target = target.unwrap_or(self.settings.target);
                self.map_to(capture, target)
            }
        }
    }

    /// Gives up on the current guided reference point
    pub fn skip_point(&mut self) -> Result<CalibrationPhase, CalibrationError> {
        let CalibrationPhase::AwaitingPoint(i) = self.phase else {
            return Ok(self.phase);
        };
        self.degraded = true;
        self.advance(i)
    }

    fn zero(&mut self, capture: &Capture) -> Result<CalibrationPhase, CalibrationError> {
        if self.uses_orientation {
            let q = checked_orientation(capture)?;
            self.quaternion = q.normalize_or_identity().unit_inverse();
            self.latitude_offset = 0.0;
            self.longitude_offset = 0.0;
        } else {
            let coordinate = checked_coordinate(capture)?;
            self.quaternion = Quaternion::identity();
            self.latitude_offset = -coordinate.latitude;
            self.longitude_offset = -coordinate.longitude;
        }
        self.phase = CalibrationPhase::Calibrated;
        Ok(self.phase)
    }

    fn zero_longitude(&mut self, capture: &Capture) -> Result<CalibrationPhase, CalibrationError> {
        if self.uses_orientation {
            checked_orientation(capture)?;
            let pointing = self.remap.apply(&checked_pointing(capture)?);
            if pointing.x.hypot(pointing.y) < EPSILON {
                return Err(CalibrationError::Degenerate("pointing along the polar axis"));
            }
            let longitude = pointing.y.atan2(pointing.x) * RAD_TO_DEG;

            // A mirroring remap reverses the sense of rotation about the axis
            let polar_axis = self.remap.invert(&Vector3::z());
            let handedness = self
                .remap
                .apply(&Vector3::x())
                .cross(&self.remap.apply(&Vector3::y()))
                .dot(&self.remap.apply(&Vector3::z()));
            self.quaternion =
                Quaternion::from_axis_angle_degrees(&polar_axis, -longitude * handedness.signum());
            self.latitude_offset = 0.0;
            self.longitude_offset = 0.0;
        } else {
            let coordinate = checked_coordinate(capture)?;
            self.quaternion = Quaternion::identity();
            self.latitude_offset = 0.0;
            self.longitude_offset = -coordinate.longitude;
        }
        debug!(offset = self.longitude_offset, "Longitude zeroed");
        self.phase = CalibrationPhase::Calibrated;
        Ok(self.phase)
    }

    fn map_to(
        &mut self,
        capture: &Capture,
        target: GeoCoordinate,
    ) -> Result<CalibrationPhase, CalibrationError> {
        if self.uses_orientation {
            checked_orientation(capture)?;
            let pointing = checked_pointing(capture)?;
            let target_imu = self.remap.invert(&target.to_unit_vector());
            self.quaternion = Quaternion::from_two_vectors(&pointing, &target_imu)
                .ok_or(CalibrationError::Degenerate("zero-length pointing vector"))?;
            self.latitude_offset = 0.0;
            self.longitude_offset = 0.0;
        } else {
            let coordinate = checked_coordinate(capture)?;
            self.quaternion = Quaternion::identity();
            self.latitude_offset = target.latitude - coordinate.latitude;
            self.longitude_offset = target.longitude - coordinate.longitude;
        }
        self.phase = CalibrationPhase::Calibrated;
        Ok(self.phase)
    }

    fn capture_reference(&mut self, capture: &Capture) -> Result<CalibrationPhase, CalibrationError> {
        let CalibrationPhase::AwaitingPoint(i) = self.phase else {
            // A completed sequence is restarted, not extended
            self.reset();
            return Ok(self.phase);
        };

        let measured = self.remap.apply(&checked_pointing(capture)?);
        let location = self.settings.reference_points[i].location;
        self.pairs.push(PointPair {
            known: location.to_unit_vector(),
            measured,
        });
        self.advance(i)
    }

    fn advance(&mut self, i: usize) -> Result<CalibrationPhase, CalibrationError> {
        if i + 1 < self.settings.reference_points.len() {
            self.phase = CalibrationPhase::AwaitingPoint(i + 1);
            return Ok(self.phase);
        }

        match fit_frame(&self.pairs) {
            Ok((frame, exact)) => {
                self.frame = frame;
                self.degraded |= !exact;
                self.pairs.clear();
                self.phase = CalibrationPhase::Calibrated;
                Ok(self.phase)
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }
}

fn checked_orientation(capture: &Capture) -> Result<Quaternion<f64>, CalibrationError> {
    match capture.orientation {
        Some(q) if !q.is_finite_quaternion() => Err(CalibrationError::Malformed),
        Some(q) if q.is_unset() => Err(CalibrationError::ZeroSample),
        Some(q) => Ok(q),
        None if capture.pointing.is_none() && capture.coordinate.is_none() => {
            Err(CalibrationError::ZeroSample)
        }
        None => Err(CalibrationError::MissingOrientation),
    }
}

fn checked_pointing(capture: &Capture) -> Result<Vector3<f64>, CalibrationError> {
    let pointing = capture.pointing.ok_or(CalibrationError::ZeroSample)?;
    if !pointing.is_finite_vector() {
        return Err(CalibrationError::Malformed);
    }
    pointing.direction().ok_or(CalibrationError::ZeroSample)
}

fn checked_coordinate(capture: &Capture) -> Result<GeoCoordinate, CalibrationError> {
    let coordinate = capture.coordinate.ok_or(CalibrationError::ZeroSample)?;
    if coordinate.latitude.is_finite() && coordinate.longitude.is_finite() {
        Ok(coordinate)
    } else {
        Err(CalibrationError::Malformed)
    }
}

/// Fits a globe frame to the guided captures
///
/// The flag is false when the fit is underdetermined (fewer than two
/// captures).
fn fit_frame(pairs: &[PointPair]) -> Result<(GeoFrame, bool), CalibrationError> {
    let rotation = match pairs {
        [] => return Ok((GeoFrame::canonical(), false)),
        [only] => {
            let q = Quaternion::from_two_vectors(&only.known, &only.measured)
                .ok_or(CalibrationError::Degenerate("zero-length reference vector"))?;
            let rotation = Matrix3::from_columns(&[
                q.rotate_vector(&Vector3::x()),
                q.rotate_vector(&Vector3::y()),
                q.rotate_vector(&Vector3::z()),
            ]);
            return Ok((GeoFrame::from_rotation(&rotation), false));
        }
        [first, second] => triad(first, second)?,
        _ => kabsch(pairs)?,
    };

    let residual = pairs
        .iter()
        .map(|p| (rotation * p.known - p.measured).norm_squared())
        .sum::<f64>()
        / pairs.len() as f64;
    debug!(points = pairs.len(), rms_residual = residual.sqrt(), "Fitted guided frame");

    Ok((GeoFrame::from_rotation(&rotation), true))
}

/// Rotation taking each known vector onto its measured one, from two pairs
///
/// The first pair is matched exactly and the second only fixes the roll
/// about it.
pub(crate) fn triad_rotation(
    known: [Vector3<f64>; 2],
    measured: [Vector3<f64>; 2],
) -> Option<Matrix3<f64>> {
    let basis = |a: &Vector3<f64>, b: &Vector3<f64>| -> Option<Matrix3<f64>> {
        let t1 = a.direction()?;
        let t2 = a.cross(b).direction()?;
        let t3 = t1.cross(&t2);
        Some(Matrix3::from_columns(&[t1, t2, t3]))
    };

    let reference = basis(&known[0], &known[1])?;
    let observed = basis(&measured[0], &measured[1])?;
    Some(observed * reference.transpose())
}

fn triad(first: &PointPair, second: &PointPair) -> Result<Matrix3<f64>, CalibrationError> {
    triad_rotation(
        [first.known, second.known],
        [first.measured, second.measured],
    )
    .ok_or(CalibrationError::Degenerate("reference captures are collinear"))
}

/// Least-squares rotation over all pairs (Kabsch)
fn kabsch(pairs: &[PointPair]) -> Result<Matrix3<f64>, CalibrationError> {
    let covariance = pairs.iter().fold(Matrix3::zeros(), |acc, p| {
        acc + p.known * p.measured.transpose()
    });

    let svd = covariance.svd(true, true);
    let rank = svd
        .singular_values
        .iter()
        .filter(|s| **s > RANK_TOLERANCE)
        .count();
    if rank < 2 {
        return Err(CalibrationError::Degenerate("reference captures are collinear"));
    }

    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::Degenerate("decomposition failed"));
    };
    let v = v_t.transpose();

    // Reflection guard
    let d = (v * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    Ok(v * correction * u.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Capabilities, Sample};
    use crate::types::{ProjectionMode, ProjectorSettings};
    use crate::projector::project_single;

    const TOLERANCE: f64 = 1e-6;

    fn orientation_projector() -> Projector {
        Projector::new(&ProjectorSettings::default(), Capabilities::ORIENTATION).unwrap()
    }

    fn gravity_projector() -> Projector {
        let settings = ProjectorSettings {
            mode: ProjectionMode::GravityAnchored,
            ..Default::default()
        };
        Projector::new(&settings, Capabilities::GRAVITY).unwrap()
    }

    fn settings(strategy: CalibrationStrategy) -> CalibrationSettings {
        CalibrationSettings {
            strategy,
            ..Default::default()
        }
    }

    fn project(projector: &Projector, state: &CalibrationState, raw: Quaternion<f64>) -> GeoCoordinate {
        let sample = Sample::from_orientation(state.apply(&raw));
        let coordinate = projector.project(&sample, state.frame()).coordinate().unwrap();
        state.apply_offsets(coordinate)
    }

    fn capture_vector(projector: &Projector, v: Vector3<f64>) -> Capture {
        let q = Quaternion::from_two_vectors(&Vector3::x(), &v).unwrap();
        projector.capture(&Sample::from_orientation(q))
    }

    fn pose_at(projector: &Projector, location: GeoCoordinate) -> Quaternion<f64> {
        let pointing = projector.target_vector(&location, &GeoFrame::canonical());
        Quaternion::from_two_vectors(&projector.forward_axis(), &pointing).unwrap()
    }

    #[test]
    fn test_longitude_zero_keeps_latitude() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::LongitudeZero), &projector);

        let captured = pose_at(&projector, GeoCoordinate::new(30.0, 70.0));
        let phase = state
            .calibrate(&projector.capture(&Sample::from_orientation(captured)), None)
            .unwrap();
        assert_eq!(phase, CalibrationPhase::Calibrated);

        let c = project(&projector, &state, captured);
        assert!((c.latitude - 30.0).abs() < TOLERANCE, "{c:?}");
        assert!(c.longitude.abs() < TOLERANCE, "{c:?}");

        // Everything else moves west by the same 70°
        let c = project(&projector, &state, pose_at(&projector, GeoCoordinate::new(-10.0, 100.0)));
        assert!((c.latitude + 10.0).abs() < TOLERANCE, "{c:?}");
        assert!((c.longitude - 30.0).abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_longitude_zero_with_mirroring_remap() {
        let settings_with_remap = ProjectorSettings {
            remap: "+y+x+z".parse().unwrap(),
            ..Default::default()
        };
        let projector = Projector::new(&settings_with_remap, Capabilities::ORIENTATION).unwrap();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::LongitudeZero), &projector);

        let captured = pose_at(&projector, GeoCoordinate::new(-45.0, -120.0));
        state
            .calibrate(&projector.capture(&Sample::from_orientation(captured)), None)
            .unwrap();

        let c = project(&projector, &state, captured);
        assert!((c.latitude + 45.0).abs() < TOLERANCE, "{c:?}");
        assert!(c.longitude.abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_longitude_zero_rejects_pole() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::LongitudeZero), &projector);
        let err = state
            .calibrate(&capture_vector(&projector, Vector3::z()), None)
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Degenerate(_)));
        assert_eq!(state.phase(), CalibrationPhase::Uncalibrated);
    }

    #[test]
    fn test_longitude_zero_offsets_for_vector_modes() {
        let projector = gravity_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::LongitudeZero), &projector);
        let up = GeoCoordinate::new(20.0, -60.0).to_unit_vector();
        let sample = Sample {
            gravity: Some(-up * 9.81),
            ..Default::default()
        };
        state.calibrate(&projector.capture(&sample), None).unwrap();

        assert_eq!(state.quaternion(), Quaternion::identity());
        let (latitude_offset, longitude_offset) = state.offsets();
        assert_eq!(latitude_offset, 0.0);
        assert!((longitude_offset - 60.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_new_state_is_identity() {
        let projector = orientation_projector();
        let state = CalibrationState::new(CalibrationSettings::default(), &projector);
        assert_eq!(state.phase(), CalibrationPhase::Uncalibrated);
        assert_eq!(state.quaternion(), Quaternion::identity());
        assert!(state.is_ready());

        let raw = Quaternion::from_axis_angle_degrees(&Vector3::z(), 30.0);
        assert!((state.apply(&raw).coords - raw.coords).norm() < 1e-12);
    }

    #[test]
    fn test_zero_point_maps_capture_to_origin() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);

        let pose = Quaternion::from_axis_angle_degrees(&Vector3::new(1.0, 2.0, 0.5), 73.0);
        let phase = state.calibrate(&projector.capture(&Sample::from_orientation(pose)), None).unwrap();
        assert_eq!(phase, CalibrationPhase::Calibrated);

        let c = project(&projector, &state, pose);
        assert!(c.latitude.abs() < TOLERANCE && c.longitude.abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_zero_point_is_reenterable() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);

        let first = Quaternion::from_axis_angle_degrees(&Vector3::z(), 20.0);
        let second = Quaternion::from_axis_angle_degrees(&Vector3::z(), -50.0);
        state.calibrate(&projector.capture(&Sample::from_orientation(first)), None).unwrap();
        state.calibrate(&projector.capture(&Sample::from_orientation(second)), None).unwrap();

        let c = project(&projector, &state, second);
        assert!(c.longitude.abs() < TOLERANCE);
        let c = project(&projector, &state, first);
        assert!((c.longitude - 70.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_rejected_capture_leaves_state_unchanged() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);

        let err = state.calibrate(&Capture::default(), None).unwrap_err();
        assert_eq!(err, CalibrationError::ZeroSample);

        let zero = Capture {
            orientation: Some(Quaternion::from_xyzw(0.0, 0.0, 0.0, 0.0)),
            ..Default::default()
        };
        assert_eq!(state.calibrate(&zero, None).unwrap_err(), CalibrationError::ZeroSample);

        let nan = Capture {
            orientation: Some(Quaternion::from_xyzw(f64::NAN, 0.0, 0.0, 1.0)),
            ..Default::default()
        };
        assert_eq!(state.calibrate(&nan, None).unwrap_err(), CalibrationError::Malformed);

        let vector_only = Capture {
            pointing: Some(Vector3::x()),
            coordinate: Some(GeoCoordinate::NULL_ISLAND),
            ..Default::default()
        };
        assert_eq!(
            state.calibrate(&vector_only, None).unwrap_err(),
            CalibrationError::MissingOrientation
        );

        assert_eq!(state.phase(), CalibrationPhase::Uncalibrated);
        assert_eq!(state.quaternion(), Quaternion::identity());
    }

    #[test]
    fn test_target_mapping_lands_on_target() {
        let projector = orientation_projector();
        let mut settings = settings(CalibrationStrategy::TargetMapping);
        settings.target = GeoCoordinate::new(35.0, -120.0);
        let mut state = CalibrationState::new(settings, &projector);

        let pose = Quaternion::from_axis_angle_degrees(&Vector3::new(0.3, -1.0, 0.2), 110.0);
        state.calibrate(&projector.capture(&Sample::from_orientation(pose)), None).unwrap();

        let c = project(&projector, &state, pose);
        assert!((c.latitude - 35.0).abs() < TOLERANCE, "{c:?}");
        assert!((c.longitude + 120.0).abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_target_override_and_antipodal_capture() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);

        // Pointing at 180° longitude, asked to map onto Null Island
        let pose = Quaternion::from_axis_angle_degrees(&Vector3::z(), 180.0);
        state
            .calibrate(&projector.capture(&Sample::from_orientation(pose)), Some(GeoCoordinate::NULL_ISLAND))
            .unwrap();

        let c = project(&projector, &state, pose);
        assert!(c.latitude.abs() < TOLERANCE && c.longitude.abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_target_mapping_respects_remap() {
        let projector = Projector::new(
            &ProjectorSettings {
                remap: "+z-x-y".parse().unwrap(),
                ..Default::default()
            },
            Capabilities::ORIENTATION,
        )
        .unwrap();
        let mut settings = settings(CalibrationStrategy::TargetMapping);
        settings.target = GeoCoordinate::new(-10.0, 45.0);
        let mut state = CalibrationState::new(settings, &projector);

        let pose = Quaternion::from_axis_angle_degrees(&Vector3::y(), 25.0);
        state.calibrate(&projector.capture(&Sample::from_orientation(pose)), None).unwrap();

        let c = project(&projector, &state, pose);
        assert!((c.latitude + 10.0).abs() < TOLERANCE, "{c:?}");
        assert!((c.longitude - 45.0).abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_vector_only_projector_uses_offsets() {
        let projector = gravity_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);

        let sample = Sample {
            gravity: Some(Vector3::new(-0.5, -0.5, -0.5_f64.sqrt())),
            ..Default::default()
        };
        let capture = projector.capture(&sample);
        let raw = capture.coordinate.unwrap();
        state.calibrate(&capture, None).unwrap();

        let (lat, lon) = state.offsets();
        assert!((lat + raw.latitude).abs() < 1e-12);
        assert!((lon + raw.longitude).abs() < 1e-12);

        let c = state.apply_offsets(raw);
        assert!(c.latitude.abs() < 1e-9 && c.longitude.abs() < 1e-9);

        state.calibrate(&capture, Some(GeoCoordinate::new(10.0, 170.0))).unwrap();
        let c = state.apply_offsets(raw);
        assert!((c.latitude - 10.0).abs() < 1e-9 && (c.longitude - 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_guided_two_point_sequence() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::Guided), &projector);
        assert_eq!(state.phase(), CalibrationPhase::AwaitingPoint(0));
        assert!(!state.is_ready());
        assert_eq!(state.current_point().unwrap().name, "North Pole");

        // The sensor's world frame is the globe frame turned 30° about X
        let mounting = Quaternion::from_axis_angle_degrees(&Vector3::x(), 30.0);
        let north = mounting.rotate_vector(&Vector3::z());
        let null_island = mounting.rotate_vector(&Vector3::x());

        let phase = state.calibrate(&capture_vector(&projector, north), None).unwrap();
        assert_eq!(phase, CalibrationPhase::AwaitingPoint(1));
        let phase = state.calibrate(&capture_vector(&projector, null_island), None).unwrap();
        assert_eq!(phase, CalibrationPhase::Calibrated);
        assert!(!state.is_degraded());

        let east = mounting.rotate_vector(&Vector3::y());
        let c = project_single(&east, state.frame(), 1e-3).coordinate().unwrap();
        assert!(c.latitude.abs() < TOLERANCE && (c.longitude - 90.0).abs() < TOLERANCE, "{c:?}");
    }

    #[test]
    fn test_guided_fit_with_four_points() {
        let projector = orientation_projector();
        let mut settings = settings(CalibrationStrategy::Guided);
        settings.reference_points = vec![
            ReferencePoint::new("a", GeoCoordinate::new(0.0, 0.0)),
            ReferencePoint::new("b", GeoCoordinate::new(0.0, 90.0)),
            ReferencePoint::new("c", GeoCoordinate::new(45.0, 180.0)),
            ReferencePoint::new("d", GeoCoordinate::new(-30.0, -60.0)),
        ];
        let mut state = CalibrationState::new(settings.clone(), &projector);

        let mounting = Quaternion::from_axis_angle_degrees(&Vector3::new(1.0, 1.0, 0.0), 50.0);
        for point in &settings.reference_points {
            let v = mounting.rotate_vector(&point.location.to_unit_vector());
            state.calibrate(&capture_vector(&projector, v), None).unwrap();
        }
        assert_eq!(state.phase(), CalibrationPhase::Calibrated);

        let spot = GeoCoordinate::new(12.0, 34.0);
        let v = mounting.rotate_vector(&spot.to_unit_vector());
        let c = project_single(&v, state.frame(), 1e-3).coordinate().unwrap();
        assert!((c.latitude - 12.0).abs() < TOLERANCE && (c.longitude - 34.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_guided_skip_marks_degraded() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::Guided), &projector);

        state.calibrate(&capture_vector(&projector, Vector3::z()), None).unwrap();
        let phase = state.skip_point().unwrap();
        assert_eq!(phase, CalibrationPhase::Calibrated);
        assert!(state.is_degraded());

        // A single north capture aligns the pole exactly
        let c = project_single(&Vector3::z(), state.frame(), 1e-3).coordinate().unwrap();
        assert!((c.latitude - 90.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_guided_all_skipped_falls_back_to_canonical() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::Guided), &projector);
        state.skip_point().unwrap();
        state.skip_point().unwrap();
        assert_eq!(state.phase(), CalibrationPhase::Calibrated);
        assert!(state.is_degraded());
        assert_eq!(*state.frame(), GeoFrame::canonical());
    }

    #[test]
    fn test_guided_collinear_captures_restart_sequence() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::Guided), &projector);

        state.calibrate(&capture_vector(&projector, Vector3::x()), None).unwrap();
        let err = state.calibrate(&capture_vector(&projector, Vector3::x()), None).unwrap_err();
        assert!(matches!(err, CalibrationError::Degenerate(_)));
        assert_eq!(state.phase(), CalibrationPhase::AwaitingPoint(0));
    }

    #[test]
    fn test_guided_calibrate_after_completion_restarts() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::Guided), &projector);
        state.skip_point().unwrap();
        state.skip_point().unwrap();

        let phase = state.calibrate(&capture_vector(&projector, Vector3::z()), None).unwrap();
        assert_eq!(phase, CalibrationPhase::AwaitingPoint(0));
        assert!(!state.is_degraded());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let projector = orientation_projector();
        let mut state = CalibrationState::new(settings(CalibrationStrategy::ZeroPoint), &projector);
        let pose = Quaternion::from_axis_angle_degrees(&Vector3::z(), 10.0);
        state.calibrate(&projector.capture(&Sample::from_orientation(pose)), None).unwrap();

        state.reset();
        assert_eq!(state.phase(), CalibrationPhase::Uncalibrated);
        assert_eq!(state.quaternion(), Quaternion::identity());
        assert_eq!(state.offsets(), (0.0, 0.0));
    }

    #[test]
    fn test_triad_rotation_recovers_rotation() {
        let q = Quaternion::from_axis_angle_degrees(&Vector3::new(0.2, 0.9, -0.4), 140.0);
        let known = [Vector3::new(0.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 0.0)];
        let measured = [q.rotate_vector(&known[0]), q.rotate_vector(&known[1])];
        let rotation = triad_rotation(known, measured).unwrap();

        let v = Vector3::new(0.3, -0.7, 0.2);
        assert!((rotation * v - q.rotate_vector(&v)).norm() < 1e-9);
        assert!((rotation.determinant() - 1.0).abs() < 1e-9);
    }
}
