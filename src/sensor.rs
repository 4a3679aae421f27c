//! Sensor collaborator interface
//!
//! A sensor advertises the readings it can produce as a [`Capabilities`] set.
//! The projector declares what it needs, and mismatches are rejected when the
//! configuration is validated rather than when a reading is attempted.

use bitflags::bitflags;
use nalgebra::{Quaternion, Vector3};
use thiserror::Error;
use tracing::warn;

use crate::math::{QuaternionExt, Vector3Ext};

bitflags! {
    /// Readings a sensor can provide
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Fused orientation quaternion
        const ORIENTATION = 1 << 0;
        /// Gravity vector in the sensor frame
        const GRAVITY = 1 << 1;
        /// Magnetic field vector in the sensor frame
        const MAGNETIC = 1 << 2;
    }
}

/// Vector readings selectable through [`OrientationSensor::read_vector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Gravity,
    MagneticField,
}

impl VectorKind {
    pub fn capability(&self) -> Capabilities {
        match self {
            VectorKind::Gravity => Capabilities::GRAVITY,
            VectorKind::MagneticField => Capabilities::MAGNETIC,
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    /// Bus glitch or similar; recovered by reinitializing the connection
    #[error("Transient sensor I/O failure: {0}")]
    Transient(String),
    #[error("Sensor failure: {0}")]
    Permanent(String),
}

impl SensorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorError::Transient(_))
    }
}

impl From<std::io::Error> for SensorError {
    fn from(err: std::io::Error) -> Self {
        SensorError::Transient(err.to_string())
    }
}

/// A source of raw orientation samples
///
/// `Ok(None)` from a read means "no data yet" and is not an error. A sensor
/// may also report the all-zero quaternion, which is treated the same way.
pub trait OrientationSensor {
    fn capabilities(&self) -> Capabilities;

    fn read_orientation(&mut self) -> Result<Option<Quaternion<f64>>, SensorError>;

    /// Reads a vector; `Ok(None)` when unavailable
    fn read_vector(&mut self, kind: VectorKind) -> Result<Option<Vector3<f64>>, SensorError> {
        let _ = kind;
        Ok(None)
    }

    /// Re-establishes the sensor connection after a transient failure
    fn reinitialize(&mut self) -> Result<(), SensorError>;

    /// Releases the underlying device at shutdown
    fn release(&mut self) {}
}

impl<S: OrientationSensor + ?Sized> OrientationSensor for Box<S> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn read_orientation(&mut self) -> Result<Option<Quaternion<f64>>, SensorError> {
        (**self).read_orientation()
    }

    fn read_vector(&mut self, kind: VectorKind) -> Result<Option<Vector3<f64>>, SensorError> {
        (**self).read_vector(kind)
    }

    fn reinitialize(&mut self) -> Result<(), SensorError> {
        (**self).reinitialize()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// One set of readings taken together in a driver iteration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    pub orientation: Option<Quaternion<f64>>,
    pub gravity: Option<Vector3<f64>>,
    pub magnetic: Option<Vector3<f64>>,
}

impl Sample {
    pub fn from_orientation(orientation: Quaternion<f64>) -> Self {
        Self {
            orientation: Some(orientation),
            ..Default::default()
        }
    }
}

/// Reads every capability in `required` from `sensor`
///
/// Returns `Ok(None)` when any required reading is missing, the orientation
/// is the zero sentinel, or a reading has a NaN or infinite component.
pub fn read_sample<S: OrientationSensor + ?Sized>(
    sensor: &mut S,
    required: Capabilities,
) -> Result<Option<Sample>, SensorError> {
    let mut sample = Sample::default();

    if required.contains(Capabilities::ORIENTATION) {
        match sensor.read_orientation()? {
            Some(q) if q.is_unset() => return Ok(None),
            Some(q) if !q.is_finite_quaternion() => {
                warn!(?q, "Discarding non-finite orientation");
                return Ok(None);
            }
            Some(q) => sample.orientation = Some(q),
            None => return Ok(None),
        }
    }

    for kind in [VectorKind::Gravity, VectorKind::MagneticField] {
        if !required.contains(kind.capability()) {
            continue;
        }
        let Some(v) = sensor.read_vector(kind)? else {
            return Ok(None);
        };
        if !v.is_finite_vector() {
            warn!(?kind, ?v, "Discarding non-finite vector");
            return Ok(None);
        }
        match kind {
            VectorKind::Gravity => sample.gravity = Some(v),
            VectorKind::MagneticField => sample.magnetic = Some(v),
        }
    }

    Ok(Some(sample))
}
